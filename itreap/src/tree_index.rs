//! Genome-wide index: one treap per key (chromosome or contig).
//!
//! # Examples
//!
//! ```
//! use itreap::{Interval, TreeIndex};
//!
//! let mut index = TreeIndex::new();
//! for (chr, start, end, name) in [
//!     ("chr1", 1000, 2000, "BRCA1"),
//!     ("chr1", 5000, 6000, "TP53"),
//!     ("chr2", 1000, 3000, "EGFR"),
//! ] {
//!     index.insert(Interval::new(chr, start, end, name).unwrap());
//! }
//!
//! let query = Interval::new("chr1", 1500, 2500, ()).unwrap();
//! let hits: Vec<&str> = index
//!     .intersect(&query, 0)
//!     .map(|hit| *hit.interval.payload())
//!     .collect();
//! assert_eq!(hits, vec!["BRCA1"]);
//! ```

use fxhash::FxHashMap;
use log::debug;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::IndexConfig;
use crate::flatten::{Flattened, flatten};
use crate::models::Interval;
use crate::node::{Arena, IntervalId, Node, draw_priority};
use crate::query::{Hit, Predicate, QueryIter};
use crate::treap::RangeFix;

/// Root of one key's tree.
#[derive(Debug, Clone)]
pub(crate) struct Tree {
    pub root: IntervalId,
    pub len: usize,
    /// Set by deferred removal until ranges are recomputed.
    pub stale: bool,
}

/// A caller-owned index of half-open intervals, partitioned by key.
///
/// Each key owns an independent treap; keys appear on first insert and
/// disappear when their last interval is removed. Mutation takes `&mut self`
/// and queries take `&self`, so queries can never overlap a mutation.
#[derive(Debug, Clone)]
pub struct TreeIndex<T> {
    pub(crate) arena: Arena<T>,
    pub(crate) trees: FxHashMap<String, Tree>,
    rng: StdRng,
    config: IndexConfig,
}

/// Outcome of [`TreeIndex::merge`].
#[derive(Debug)]
pub struct Merged<T> {
    /// Handles of the newly inserted merged intervals.
    pub inserted: Vec<IntervalId>,
    /// The stored intervals absorbed by the merge, now removed from the index.
    pub replaced: Vec<Interval<T>>,
}

impl<T> Default for TreeIndex<T> {
    fn default() -> Self {
        TreeIndex::new()
    }
}

impl<T> TreeIndex<T> {
    pub fn new() -> Self {
        TreeIndex::with_config(IndexConfig::default())
    }

    pub fn with_config(config: IndexConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        TreeIndex {
            arena: Arena::default(),
            trees: FxHashMap::default(),
            rng,
            config,
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Add an interval to its key's tree, creating the tree if needed.
    ///
    /// A fresh balancing priority is drawn on every call, so an interval that
    /// is removed and inserted again usually lands in a different tree shape.
    pub fn insert(&mut self, interval: Interval<T>) -> IntervalId {
        let priority = draw_priority(&mut self.rng);
        let id = self.arena.alloc(Node::new(interval, priority));
        let key = self.arena.node(id).interval.key();

        match self.trees.get_mut(key) {
            Some(tree) => {
                tree.root = self.arena.insert(Some(tree.root), id);
                tree.len += 1;
            }
            None => {
                debug!("creating interval tree for {key}");
                let key = key.to_string();
                self.trees.insert(
                    key,
                    Tree {
                        root: id,
                        len: 1,
                        stale: false,
                    },
                );
            }
        }
        id
    }

    /// Look up an indexed interval. `None` if the handle was removed.
    pub fn get(&self, id: IntervalId) -> Option<&Interval<T>> {
        self.arena.get(id).map(|node| &node.interval)
    }

    /// Mutable access to a stored payload; bounds cannot be changed in place.
    pub fn payload_mut(&mut self, id: IntervalId) -> Option<&mut T> {
        self.arena
            .get_mut(id)
            .map(|node| node.interval.payload_mut())
    }

    /// Remove an interval and repair the cached ranges of its ancestors.
    pub fn remove(&mut self, id: IntervalId) -> Option<Interval<T>> {
        self.remove_with(id, RangeFix::Eager)
    }

    /// Remove an interval without repairing cached ranges.
    ///
    /// The key's tree is left stale: querying it panics until
    /// [`recompute_ranges`](Self::recompute_ranges) runs. Prefer
    /// [`removal_batch`](Self::removal_batch), which recomputes on drop.
    pub fn fast_remove(&mut self, id: IntervalId) -> Option<Interval<T>> {
        self.remove_with(id, RangeFix::Deferred)
    }

    fn remove_with(&mut self, id: IntervalId, fix: RangeFix) -> Option<Interval<T>> {
        let key = self.arena.get(id)?.interval.key().to_string();
        let Some(tree) = self.trees.get_mut(&key) else {
            panic!("interval {id:?} is stored under {key}, which has no tree");
        };

        let removed = self.arena.remove(tree.root, id, fix, &mut self.rng);
        match removed.root {
            Some(root) => {
                tree.root = root;
                tree.len -= 1;
                tree.stale |= fix == RangeFix::Deferred;
            }
            None => {
                debug!("removed last interval for {key}");
                self.trees.remove(&key);
            }
        }
        Some(removed.interval)
    }

    /// Rebuild every cached subtree range of `key`'s tree.
    pub fn recompute_ranges(&mut self, key: &str) {
        if let Some(tree) = self.trees.get_mut(key) {
            self.arena.recompute_ranges(tree.root);
            tree.stale = false;
        }
    }

    fn recompute_stale(&mut self) {
        for tree in self.trees.values_mut().filter(|tree| tree.stale) {
            self.arena.recompute_ranges(tree.root);
            tree.stale = false;
        }
    }

    /// Start a batch of deferred removals. Ranges of every touched tree are
    /// recomputed when the batch is dropped, and the batch borrows the index
    /// mutably, so nothing can query a stale tree in between.
    pub fn removal_batch(&mut self) -> RemovalBatch<'_, T> {
        RemovalBatch { index: self }
    }

    /// Union `interval` with every stored interval it intersects (by
    /// `overlap`) on its key, remove those, and insert the merged interval.
    ///
    /// The merged interval keeps the payload of `interval`. The merge is a
    /// single pass: intervals that only touch the grown span are left alone.
    pub fn merge(&mut self, interval: Interval<T>, overlap: i64) -> Merged<T> {
        let hits: Vec<IntervalId> = self.intersect(&interval, overlap).map(|h| h.id).collect();

        let mut merged = interval;
        let mut replaced = Vec::with_capacity(hits.len());
        for id in hits {
            if let Some(old) = self.remove(id) {
                merged = merged.widened(old.start(), old.end());
                replaced.push(old);
            }
        }
        debug!("merged {} intervals into {merged}", replaced.len());

        let id = self.insert(merged);
        Merged {
            inserted: vec![id],
            replaced,
        }
    }

    /// Root of `key`'s tree for a range-pruned walk.
    fn query_root(&self, key: &str) -> Option<IntervalId> {
        let tree = self.trees.get(key)?;
        if tree.stale {
            panic!(
                "subtree ranges for {key} are stale after fast_remove; \
                 call recompute_ranges before querying"
            );
        }
        Some(tree.root)
    }

    pub(crate) fn assert_queryable(&self, key: &str) {
        self.query_root(key);
    }

    /// Walk `key`'s tree with an arbitrary predicate against `[start, end)`.
    pub fn query_bounds(
        &self,
        key: &str,
        start: i64,
        end: i64,
        predicate: Predicate,
    ) -> QueryIter<'_, T> {
        match predicate {
            Predicate::All => QueryIter::new(
                &self.arena,
                self.trees.get(key).map(|tree| tree.root),
                predicate,
                start,
                end,
            ),
            _ => QueryIter::new(&self.arena, self.query_root(key), predicate, start, end),
        }
    }

    /// Walk the query's key with an arbitrary predicate.
    pub fn query<Q>(&self, query: &Interval<Q>, predicate: Predicate) -> QueryIter<'_, T> {
        self.query_bounds(query.key(), query.start(), query.end(), predicate)
    }

    /// Stored intervals on the query's key that overlap it by at least
    /// `overlap` (negative values allow a gap), in ascending start order.
    pub fn intersect<Q>(&self, query: &Interval<Q>, overlap: i64) -> QueryIter<'_, T> {
        self.query(query, Predicate::Intersect { overlap })
    }

    /// Stored intervals that contain the query, give or take `slop`.
    pub fn contain<Q>(&self, query: &Interval<Q>, slop: i64) -> QueryIter<'_, T> {
        self.query(query, Predicate::Contain { slop })
    }

    /// Stored intervals that lie within the query, give or take `slop`.
    pub fn within<Q>(&self, query: &Interval<Q>, slop: i64) -> QueryIter<'_, T> {
        self.query(query, Predicate::Within { slop })
    }

    /// [`intersect`](Self::intersect), flattened with `merge_tolerance`.
    pub fn flatten<Q>(
        &self,
        query: &Interval<Q>,
        overlap: i64,
        merge_tolerance: i64,
    ) -> Flattened<Hit<'_, T>> {
        flatten(self.intersect(query, overlap), merge_tolerance)
    }

    /// [`contain`](Self::contain), flattened with `merge_tolerance`.
    pub fn flatten_containing<Q>(
        &self,
        query: &Interval<Q>,
        slop: i64,
        merge_tolerance: i64,
    ) -> Flattened<Hit<'_, T>> {
        flatten(self.contain(query, slop), merge_tolerance)
    }

    /// [`within`](Self::within), flattened with `merge_tolerance`.
    pub fn flatten_within<Q>(
        &self,
        query: &Interval<Q>,
        slop: i64,
        merge_tolerance: i64,
    ) -> Flattened<Hit<'_, T>> {
        flatten(self.within(query, slop), merge_tolerance)
    }

    /// Every interval on `key` in ascending start order.
    pub fn traverse(&self, key: &str) -> QueryIter<'_, T> {
        self.query_bounds(key, 0, 0, Predicate::All)
    }

    /// Every interval in the index, key by key. Order across keys is
    /// unspecified.
    pub fn traverse_all(&self) -> impl Iterator<Item = Hit<'_, T>> {
        self.trees
            .values()
            .flat_map(move |tree| QueryIter::new(&self.arena, Some(tree.root), Predicate::All, 0, 0))
    }

    /// `(min_start, max_end)` over all intervals on `key`.
    pub fn range(&self, key: &str) -> Option<(i64, i64)> {
        let root = self.arena.node(self.query_root(key)?);
        Some((root.min_start, root.max_end))
    }

    /// In-order predecessor of `id` on its key, `None` at the left end.
    pub fn scan_left(&self, id: IntervalId) -> Option<IntervalId> {
        self.arena.get(id)?;
        self.arena.predecessor(id)
    }

    /// In-order successor of `id` on its key, `None` at the right end.
    pub fn scan_right(&self, id: IntervalId) -> Option<IntervalId> {
        self.arena.get(id)?;
        self.arena.successor(id)
    }

    /// Interval with the smallest start on `key`.
    pub fn first(&self, key: &str) -> Option<IntervalId> {
        let tree = self.trees.get(key)?;
        Some(self.arena.leftmost(tree.root))
    }

    /// Interval with the largest start on `key`.
    pub fn last(&self, key: &str) -> Option<IntervalId> {
        let tree = self.trees.get(key)?;
        Some(self.arena.rightmost(tree.root))
    }

    /// Total number of intervals across all keys.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Number of intervals on `key`.
    pub fn len_of(&self, key: &str) -> usize {
        self.trees.get(key).map_or(0, |tree| tree.len)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.trees.keys().map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.trees.contains_key(key)
    }

    /// Verify BST order, heap order, cached ranges, parent links and
    /// bookkeeping for every key, reporting the first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut total = 0;
        for (key, tree) in &self.trees {
            let root_key = self
                .arena
                .get(tree.root)
                .map(|node| node.interval.key())
                .unwrap_or_default();
            if root_key != key {
                return Err(format!("tree for {key} is rooted at an interval on {root_key}"));
            }
            let count = self.arena.check(tree.root)?;
            if count != tree.len {
                return Err(format!(
                    "tree for {key} holds {count} intervals but records {}",
                    tree.len
                ));
            }
            total += count;
        }
        if total != self.arena.len() {
            return Err(format!(
                "{} live intervals but only {total} reachable from a root",
                self.arena.len()
            ));
        }
        Ok(())
    }
}

impl<T> Extend<Interval<T>> for TreeIndex<T> {
    fn extend<I: IntoIterator<Item = Interval<T>>>(&mut self, iter: I) {
        for interval in iter {
            self.insert(interval);
        }
    }
}

impl<T> FromIterator<Interval<T>> for TreeIndex<T> {
    fn from_iter<I: IntoIterator<Item = Interval<T>>>(iter: I) -> Self {
        let mut index = TreeIndex::new();
        index.extend(iter);
        index
    }
}

/// Deferred removals against a [`TreeIndex`]; see
/// [`TreeIndex::removal_batch`].
pub struct RemovalBatch<'a, T> {
    index: &'a mut TreeIndex<T>,
}

impl<T> RemovalBatch<'_, T> {
    pub fn remove(&mut self, id: IntervalId) -> Option<Interval<T>> {
        self.index.fast_remove(id)
    }

    pub fn get(&self, id: IntervalId) -> Option<&Interval<T>> {
        self.index.get(id)
    }
}

impl<T> Drop for RemovalBatch<'_, T> {
    fn drop(&mut self) {
        self.index.recompute_stale();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    fn iv(key: &str, start: i64, end: i64) -> Interval<()> {
        Interval::new(key, start, end, ()).unwrap()
    }

    fn render<'a>(hits: impl Iterator<Item = Hit<'a, ()>>) -> Vec<String> {
        hits.map(|h| h.interval.to_string()).collect()
    }

    #[fixture]
    fn index() -> TreeIndex<()> {
        let mut index = TreeIndex::with_config(IndexConfig::default().with_seed(5));
        for (s, e) in [(0, 4), (8, 12), (2, 3), (5, 10), (3, 7)] {
            index.insert(iv("x", s, e));
        }
        index.insert(iv("y", 100, 200));
        index
    }

    #[rstest]
    fn test_insert_creates_keys(index: TreeIndex<()>) {
        assert_eq!(index.len(), 6);
        assert_eq!(index.len_of("x"), 5);
        assert_eq!(index.len_of("y"), 1);
        assert_eq!(index.len_of("z"), 0);
        let mut keys: Vec<&str> = index.keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["x", "y"]);
        index.check_invariants().unwrap();
    }

    #[rstest]
    fn test_keys_do_not_mix(index: TreeIndex<()>) {
        let hits = render(index.intersect(&iv("y", 0, 12), 0));
        assert_eq!(hits.is_empty(), true);
        let hits = render(index.intersect(&iv("x", 90, 300), 0));
        assert_eq!(hits.is_empty(), true);
        assert_eq!(render(index.intersect(&iv("chrUn", 0, 10), 0)).is_empty(), true);
    }

    #[rstest]
    fn test_traverse_is_sorted(index: TreeIndex<()>) {
        assert_eq!(
            render(index.traverse("x")),
            vec!["x:[0,4)", "x:[2,3)", "x:[3,7)", "x:[5,10)", "x:[8,12)"]
        );
        assert_eq!(index.traverse_all().count(), 6);
    }

    #[rstest]
    fn test_range(index: TreeIndex<()>) {
        assert_eq!(index.range("x"), Some((0, 12)));
        assert_eq!(index.range("y"), Some((100, 200)));
        assert_eq!(index.range("nope"), None);
    }

    #[rstest]
    fn test_remove_last_interval_drops_key(mut index: TreeIndex<()>) {
        let id = index.first("y").unwrap();
        let removed = index.remove(id).unwrap();
        assert_eq!(removed.to_string(), "y:[100,200)");
        assert_eq!(index.contains_key("y"), false);
        assert_eq!(index.range("y"), None);
        assert_eq!(index.get(id).is_none(), true);
        // a stale handle is not an error
        assert_eq!(index.remove(id).is_none(), true);
        index.check_invariants().unwrap();
    }

    #[rstest]
    fn test_remove_updates_range(mut index: TreeIndex<()>) {
        let last = index.last("x").unwrap();
        assert_eq!(index.get(last).unwrap().to_string(), "x:[8,12)");
        index.remove(last);
        assert_eq!(index.range("x"), Some((0, 10)));
        index.check_invariants().unwrap();
    }

    #[rstest]
    fn test_scan_neighbors(index: TreeIndex<()>) {
        let first = index.first("x").unwrap();
        assert_eq!(index.scan_left(first), None);

        let mut seen = vec![index.get(first).unwrap().to_string()];
        let mut cur = first;
        while let Some(next) = index.scan_right(cur) {
            seen.push(index.get(next).unwrap().to_string());
            cur = next;
        }
        assert_eq!(seen, render(index.traverse("x")));
        assert_eq!(Some(cur), index.last("x"));
    }

    #[rstest]
    #[should_panic(expected = "stale")]
    fn test_query_after_fast_remove_panics(mut index: TreeIndex<()>) {
        let id = index.first("x").unwrap();
        index.fast_remove(id);
        let _ = index.intersect(&iv("x", 0, 1), 0).count();
    }

    #[rstest]
    fn test_fast_remove_then_recompute(mut index: TreeIndex<()>) {
        let ids: Vec<IntervalId> = index.traverse("x").map(|h| h.id).collect();
        index.fast_remove(ids[4]);
        index.fast_remove(ids[3]);
        // traversal does not depend on cached ranges
        assert_eq!(index.traverse("x").count(), 3);

        index.recompute_ranges("x");
        assert_eq!(index.range("x"), Some((0, 7)));
        index.check_invariants().unwrap();
    }

    #[rstest]
    fn test_removal_batch_recomputes_on_drop(mut index: TreeIndex<()>) {
        let ids: Vec<IntervalId> = index.traverse("x").map(|h| h.id).collect();
        {
            let mut batch = index.removal_batch();
            for &id in &ids[2..] {
                assert_eq!(batch.get(id).is_some(), true);
                batch.remove(id);
            }
        }
        assert_eq!(index.range("x"), Some((0, 4)));
        index.check_invariants().unwrap();
    }

    #[rstest]
    fn test_merge_absorbs_intersectors(mut index: TreeIndex<()>) {
        let merged = index.merge(iv("x", 9, 20), 0);
        let replaced: Vec<String> = merged.replaced.iter().map(|r| r.to_string()).collect();
        assert_eq!(replaced, vec!["x:[5,10)", "x:[8,12)"]);
        assert_eq!(merged.inserted.len(), 1);
        assert_eq!(
            index.get(merged.inserted[0]).unwrap().to_string(),
            "x:[5,20)"
        );
        assert_eq!(index.len_of("x"), 4);
        index.check_invariants().unwrap();
    }

    #[rstest]
    fn test_merge_on_new_key_just_inserts(mut index: TreeIndex<()>) {
        let merged = index.merge(iv("chr9", 1, 2), 0);
        assert_eq!(merged.replaced.is_empty(), true);
        assert_eq!(index.len_of("chr9"), 1);
    }

    #[rstest]
    fn test_payload_mut(mut index: TreeIndex<()>) {
        let mut named: TreeIndex<String> = TreeIndex::new();
        let id = named.insert(Interval::new("x", 0, 1, "a".to_string()).unwrap());
        named.payload_mut(id).unwrap().push('b');
        assert_eq!(named.get(id).unwrap().payload(), "ab");

        let id = index.first("x").unwrap();
        assert_eq!(index.payload_mut(id).is_some(), true);
    }

    #[rstest]
    fn test_merge_churn_reuses_slots() {
        let mut index = TreeIndex::with_config(IndexConfig::default().with_seed(5));
        let mut id = index.insert(iv("x", 0, 10));
        for i in 0..5_000 {
            let merged = index.merge(iv("x", i % 7, 10 + i % 3), 0);
            assert_eq!(index.get(id).is_none(), true);
            id = merged.inserted[0];
        }
        assert_eq!(index.len(), 1);
        assert_eq!(index.arena.slot_count(), 1);
        assert_eq!(index.range("x"), Some((0, 12)));
    }

    #[rstest]
    fn test_remove_reinsert_churn_keeps_arena_bounded(mut index: TreeIndex<()>) {
        let slots = index.arena.slot_count();
        for _ in 0..2_000 {
            let id = index.first("x").unwrap();
            let old = index.remove(id).unwrap();
            index.insert(old);
            assert_eq!(index.get(id).is_none(), true);
        }
        assert_eq!(index.len(), 6);
        assert_eq!(index.arena.slot_count(), slots);
        index.check_invariants().unwrap();
    }

    #[rstest]
    fn test_reinsert_draws_new_priority() {
        let mut index = TreeIndex::with_config(IndexConfig::default().with_seed(5));
        let mut priorities = Vec::new();
        let mut id = index.insert(iv("x", 0, 10));
        for _ in 0..50 {
            priorities.push(index.arena.node(id).priority);
            let old = index.remove(id).unwrap();
            id = index.insert(old);
        }
        priorities.sort_unstable();
        priorities.dedup();
        assert_eq!(priorities.len() > 1, true);
    }

    #[rstest]
    fn test_from_iterator() {
        let index: TreeIndex<()> = [(0, 1), (5, 9), (2, 3)]
            .into_iter()
            .map(|(s, e)| iv("chr1", s, e))
            .collect();
        assert_eq!(index.len(), 3);
        assert_eq!(render(index.traverse("chr1")).len(), 3);
        index.check_invariants().unwrap();
    }
}
