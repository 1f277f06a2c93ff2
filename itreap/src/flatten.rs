//! Coalescing of ascending query results into flattened spans.

use crate::models::Interval;
use crate::query::Hit;

/// Anything with a key and half-open bounds that can be flattened.
pub trait Bounded {
    fn key(&self) -> &str;
    fn start(&self) -> i64;
    fn end(&self) -> i64;
}

impl<T> Bounded for Interval<T> {
    fn key(&self) -> &str {
        Interval::key(self)
    }

    fn start(&self) -> i64 {
        Interval::start(self)
    }

    fn end(&self) -> i64 {
        Interval::end(self)
    }
}

impl<T> Bounded for &Interval<T> {
    fn key(&self) -> &str {
        Interval::key(self)
    }

    fn start(&self) -> i64 {
        Interval::start(self)
    }

    fn end(&self) -> i64 {
        Interval::end(self)
    }
}

impl<T> Bounded for Hit<'_, T> {
    fn key(&self) -> &str {
        self.interval.key()
    }

    fn start(&self) -> i64 {
        self.interval.start()
    }

    fn end(&self) -> i64 {
        self.interval.end()
    }
}

/// Result of flattening: `flat[i]` covers exactly the items in `groups[i]`.
#[derive(Debug, Clone)]
pub struct Flattened<H> {
    pub flat: Vec<Interval<()>>,
    pub groups: Vec<Vec<H>>,
}

impl<H> Flattened<H> {
    pub fn len(&self) -> usize {
        self.flat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flat.is_empty()
    }

    /// Iterate over `(span, group)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Interval<()>, &[H])> {
        self.flat
            .iter()
            .zip(self.groups.iter().map(Vec::as_slice))
    }
}

impl<H> Default for Flattened<H> {
    fn default() -> Self {
        Flattened {
            flat: Vec::new(),
            groups: Vec::new(),
        }
    }
}

/// Merge a start-sorted run of intervals into flattened spans.
///
/// An item joins the current span unless its start lies more than `tolerance`
/// past the span's end, in which case the span is closed and a new one opened.
/// `tolerance = 0` merges only touching or overlapping items. The last span is
/// always emitted, so any non-empty input yields at least one span.
///
/// ```
/// use itreap::{Interval, flatten::flatten};
///
/// let ivs = vec![
///     Interval::new("x", 0, 4, ()).unwrap(),
///     Interval::new("x", 3, 7, ()).unwrap(),
///     Interval::new("x", 9, 12, ()).unwrap(),
/// ];
/// let flat = flatten(ivs.iter(), 0);
/// assert_eq!(flat.flat.len(), 2);
/// assert_eq!(flat.flat[0].to_string(), "x:[0,7)");
///
/// let flat = flatten(ivs.iter(), 2);
/// assert_eq!(flat.flat.len(), 1);
/// ```
pub fn flatten<H, I>(items: I, tolerance: i64) -> Flattened<H>
where
    H: Bounded,
    I: IntoIterator<Item = H>,
{
    let mut out = Flattened::default();
    let mut current: Option<(i64, i64, Vec<H>)> = None;

    for item in items {
        let (start, end) = (item.start(), item.end());
        if let Some((_, hi, group)) = current
            .as_mut()
            .filter(|(_, hi, _)| start.saturating_sub(*hi) <= tolerance)
        {
            *hi = (*hi).max(end);
            group.push(item);
            continue;
        }
        if let Some(done) = current.take() {
            close(&mut out, done);
        }
        current = Some((start, end, vec![item]));
    }
    if let Some(done) = current {
        close(&mut out, done);
    }
    out
}

fn close<H: Bounded>(out: &mut Flattened<H>, (lo, hi, group): (i64, i64, Vec<H>)) {
    let key = group.first().map(|h| h.key().to_string()).unwrap_or_default();
    // lo <= start <= end <= hi for every member, so this cannot fail
    if let Ok(span) = Interval::new(key, lo, hi, ()) {
        out.flat.push(span);
        out.groups.push(group);
    }
}
