use std::fmt::{self, Display};

use crate::errors::{Result, TreapError};

/// A half-open range `[start, end)` on a single key (chromosome or contig),
/// carrying an opaque payload that the index never interprets.
///
/// Intervals can only be built through [`Interval::new`], which rejects an
/// `end` that lies before `start`. Zero-length intervals are legal.
///
/// ```
/// use itreap::Interval;
///
/// let iv = Interval::new("chr1", 100, 200, "peak1").unwrap();
/// assert_eq!(iv.len(), 100);
/// assert_eq!(iv.to_string(), "chr1:[100,200)");
///
/// assert!(Interval::new("chr1", 200, 100, ()).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Interval<T> {
    key: String,
    start: i64,
    end: i64,
    payload: T,
}

impl<T> Interval<T> {
    /// Create a new interval, validating that `end >= start`.
    pub fn new(key: impl Into<String>, start: i64, end: i64, payload: T) -> Result<Self> {
        if end < start {
            return Err(TreapError::RangeOrder { start, end });
        }
        Ok(Interval {
            key: key.into(),
            start,
            end,
            payload,
        })
    }

    /// The partition key (e.g. chromosome) of this interval.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Inclusive start.
    #[inline]
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Exclusive end.
    #[inline]
    pub fn end(&self) -> i64 {
        self.end
    }

    #[inline]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Mutable access to the payload. The bounds stay fixed, so this is safe
    /// to use on an indexed interval.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Width of the interval: `end - start`. Unsigned, so the widest
    /// interval `[i64::MIN, i64::MAX)` still fits.
    #[inline]
    pub fn len(&self) -> u64 {
        self.end.abs_diff(self.start)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Grow the bounds to cover `[start, end)` as well. Never shrinks, so the
    /// ordering invariant is preserved.
    pub(crate) fn widened(mut self, start: i64, end: i64) -> Self {
        self.start = self.start.min(start);
        self.end = self.end.max(end);
        self
    }
}

impl<T> Display for Interval<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:[{},{})", self.key, self.start, self.end)
    }
}
