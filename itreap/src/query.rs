//! Overlap-family predicates and the pruned, lazy in-order walk that answers them.
//!
//! All three queries use half-open `[start, end)` arithmetic. With a query
//! `[ps, pe)` and a stored interval `[s, e)`:
//!
//! | predicate | matches when |
//! |---|---|
//! | `Intersect { overlap }` | `ps <= e - overlap && pe >= s + overlap` |
//! | `Contain { slop }` | `s <= ps + slop && e >= pe - slop` |
//! | `Within { slop }` | `s >= ps - slop && e <= pe + slop` |
//!
//! `overlap = 0` lets abutting intervals intersect, a positive overlap demands
//! that much shared length and a negative one bridges a gap. For `Contain` and
//! `Within` a positive slop lets the inner interval stick out by up to `slop`
//! and a negative slop demands it sit that far inside.

use crate::models::Interval;
use crate::node::{Arena, IntervalId};

/// Which intervals a walk yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// Stored intervals overlapping the query by at least `overlap`.
    Intersect { overlap: i64 },
    /// Stored intervals that contain the query.
    Contain { slop: i64 },
    /// Stored intervals that lie within the query.
    Within { slop: i64 },
    /// Every stored interval.
    All,
}

impl Predicate {
    /// Does a stored `[start, end)` satisfy this predicate against the query?
    #[inline]
    pub fn matches(&self, query_start: i64, query_end: i64, start: i64, end: i64) -> bool {
        match *self {
            Predicate::Intersect { overlap } => {
                query_start <= end.saturating_sub(overlap)
                    && query_end >= start.saturating_add(overlap)
            }
            Predicate::Contain { slop } => {
                start <= query_start.saturating_add(slop) && end >= query_end.saturating_sub(slop)
            }
            Predicate::Within { slop } => {
                start >= query_start.saturating_sub(slop) && end <= query_end.saturating_add(slop)
            }
            Predicate::All => true,
        }
    }

    /// Could any interval in a subtree with cached bounds
    /// `[min_start, max_end)` match? `false` means the subtree can be skipped.
    #[inline]
    pub(crate) fn may_match(
        &self,
        query_start: i64,
        query_end: i64,
        min_start: i64,
        max_end: i64,
    ) -> bool {
        if min_start > self.start_ceiling(query_start, query_end) {
            return false;
        }
        match *self {
            Predicate::Intersect { overlap } => query_start <= max_end.saturating_sub(overlap),
            Predicate::Contain { slop } => max_end >= query_end.saturating_sub(slop),
            // a match ends no earlier than it starts, so no earlier than ps - slop
            Predicate::Within { slop } => max_end >= query_start.saturating_sub(slop),
            Predicate::All => true,
        }
    }

    /// Largest start a match can have. Starts grow along the in-order walk,
    /// so passing this value ends the query.
    #[inline]
    pub(crate) fn start_ceiling(&self, query_start: i64, query_end: i64) -> i64 {
        match *self {
            Predicate::Intersect { overlap } => query_end.saturating_sub(overlap),
            Predicate::Contain { slop } => query_start.saturating_add(slop),
            Predicate::Within { slop } => query_end.saturating_add(slop),
            Predicate::All => i64::MAX,
        }
    }
}

/// One query result: the handle of a stored interval and the interval itself.
#[derive(Debug)]
pub struct Hit<'a, T> {
    pub id: IntervalId,
    pub interval: &'a Interval<T>,
}

impl<T> Clone for Hit<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Hit<'_, T> {}

/// Lazy in-order walk over one tree, yielding the intervals that satisfy a
/// [`Predicate`] in ascending start order.
///
/// Subtrees whose cached bounds rule out any match are never entered, and
/// the walk stops as soon as starts pass the predicate's ceiling. Dropping the
/// iterator abandons the walk.
pub struct QueryIter<'a, T> {
    arena: &'a Arena<T>,
    predicate: Predicate,
    query_start: i64,
    query_end: i64,
    stack: Vec<IntervalId>,
}

impl<'a, T> QueryIter<'a, T> {
    pub(crate) fn new(
        arena: &'a Arena<T>,
        root: Option<IntervalId>,
        predicate: Predicate,
        query_start: i64,
        query_end: i64,
    ) -> Self {
        let mut iter = QueryIter {
            arena,
            predicate,
            query_start,
            query_end,
            stack: Vec::new(),
        };
        iter.descend_left(root);
        iter
    }

    /// Push `id` and its chain of left descendants, stopping at the first
    /// subtree that cannot hold a match.
    fn descend_left(&mut self, mut cur: Option<IntervalId>) {
        while let Some(id) = cur {
            let node = self.arena.node(id);
            if !self.predicate.may_match(
                self.query_start,
                self.query_end,
                node.min_start,
                node.max_end,
            ) {
                break;
            }
            self.stack.push(id);
            cur = node.left;
        }
    }
}

impl<'a, T> Iterator for QueryIter<'a, T> {
    type Item = Hit<'a, T>;

    fn next(&mut self) -> Option<Self::Item> {
        let ceiling = self
            .predicate
            .start_ceiling(self.query_start, self.query_end);
        while let Some(id) = self.stack.pop() {
            let node = self.arena.node(id);
            let interval = &node.interval;
            if interval.start() > ceiling {
                self.stack.clear();
                return None;
            }
            self.descend_left(node.right);
            if self.predicate.matches(
                self.query_start,
                self.query_end,
                interval.start(),
                interval.end(),
            ) {
                return Some(Hit { id, interval });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, 4, true)] // query starts inside
    #[case(0, 4, 8, true)] // abutting counts with zero overlap
    #[case(1, 4, 8, false)]
    #[case(1, 3, 8, true)]
    #[case(-2, 6, 8, true)] // gap of two bridged
    #[case(-1, 6, 8, false)]
    fn test_intersect_predicate(
        #[case] overlap: i64,
        #[case] start: i64,
        #[case] end: i64,
        #[case] expected: bool,
    ) {
        // query [0, 4)
        let p = Predicate::Intersect { overlap };
        assert_eq!(p.matches(0, 4, start, end), expected);
    }

    #[rstest]
    #[case(0, 4, 6, true)]
    #[case(0, 5, 6, false)]
    #[case(1, 5, 6, true)] // query may stick out by one
    #[case(-1, 4, 7, false)]
    #[case(-1, 3, 7, true)] // query strictly inside by one
    fn test_contain_predicate(
        #[case] slop: i64,
        #[case] start: i64,
        #[case] end: i64,
        #[case] expected: bool,
    ) {
        // query [4, 6)
        let p = Predicate::Contain { slop };
        assert_eq!(p.matches(4, 6, start, end), expected);
    }

    #[rstest]
    #[case(0, 2, 3, true)]
    #[case(0, 0, 4, false)]
    #[case(1, 0, 4, true)]
    #[case(-1, 1, 4, false)]
    #[case(-1, 2, 4, true)]
    fn test_within_predicate(
        #[case] slop: i64,
        #[case] start: i64,
        #[case] end: i64,
        #[case] expected: bool,
    ) {
        // query [1, 5)
        let p = Predicate::Within { slop };
        assert_eq!(p.matches(1, 5, start, end), expected);
    }

    #[rstest]
    #[case(Predicate::Intersect { overlap: 0 })]
    #[case(Predicate::Intersect { overlap: 3 })]
    #[case(Predicate::Intersect { overlap: -3 })]
    #[case(Predicate::Contain { slop: 0 })]
    #[case(Predicate::Contain { slop: 2 })]
    #[case(Predicate::Within { slop: 0 })]
    #[case(Predicate::Within { slop: -2 })]
    fn test_may_match_never_prunes_a_match(#[case] p: Predicate) {
        // a subtree holding exactly [s, e) must never be pruned if [s, e) matches
        for s in -10..10 {
            for e in s..12 {
                if p.matches(-3, 5, s, e) {
                    assert_eq!(p.may_match(-3, 5, s, e), true, "{p:?} pruned [{s}, {e})");
                    assert_eq!(s <= p.start_ceiling(-3, 5), true);
                }
            }
        }
    }

    #[rstest]
    fn test_saturating_bounds() {
        let p = Predicate::Intersect { overlap: i64::MIN };
        assert_eq!(p.matches(i64::MAX - 1, i64::MAX, 0, 0), true);
        let p = Predicate::Within { slop: i64::MAX };
        assert_eq!(p.matches(0, 1, i64::MIN + 1, i64::MAX), true);
    }
}
