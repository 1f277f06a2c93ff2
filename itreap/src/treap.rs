//! The treap engine: structural operations on one key's tree inside the shared
//! node [`Arena`].
//!
//! Every tree satisfies, at all times outside of these functions:
//!
//! - BST order on interval start (equal starts keep insertion order),
//! - max-heap order on node priority,
//! - each node caches `min_start`/`max_end` over its whole subtree,
//! - parent links mirror child links.
//!
//! The one exception is [`RangeFix::Deferred`] removal, which leaves cached
//! bounds stale until [`Arena::recompute_ranges`] runs.

use std::collections::HashMap;

use rand::Rng;

use crate::models::Interval;
use crate::node::{Arena, IntervalId};

/// Whether a removal repairs the cached subtree bounds of its ancestors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RangeFix {
    Eager,
    Deferred,
}

/// Outcome of [`Arena::remove`].
pub(crate) struct Removed<T> {
    /// New root of the tree, `None` if the tree is now empty.
    pub root: Option<IntervalId>,
    pub interval: Interval<T>,
}

impl<T> Arena<T> {
    /// Insert the isolated node `id` into the tree rooted at `root` and return
    /// the root afterwards.
    pub(crate) fn insert(&mut self, root: Option<IntervalId>, id: IntervalId) -> IntervalId {
        let Some(root) = root else {
            return id;
        };
        let start = self.node(id).interval.start();

        let mut cur = root;
        loop {
            let node = self.node(cur);
            let next = if start >= node.interval.start() {
                node.right
            } else {
                node.left
            };
            match next {
                Some(child) => cur = child,
                None => break,
            }
        }
        if start >= self.node(cur).interval.start() {
            self.node_mut(cur).right = Some(id);
        } else {
            self.node_mut(cur).left = Some(id);
        }
        self.node_mut(id).parent = Some(cur);

        // bubble up until heap order holds again
        while let Some(parent) = self.node(id).parent {
            if self.node(id).priority <= self.node(parent).priority {
                break;
            }
            if self.node(parent).right == Some(id) {
                self.rotate_left(parent);
            } else {
                self.rotate_right(parent);
            }
        }
        self.fix_upward(self.node(id).parent);

        if self.node(id).parent.is_none() {
            id
        } else {
            root
        }
    }

    /// Promote the right child of `x` into its place.
    fn rotate_left(&mut self, x: IntervalId) {
        let Some(y) = self.node(x).right else {
            panic!("rotate_left at {x:?} without a right child");
        };
        let parent = self.node(x).parent;
        let moved = self.node(y).left;

        self.node_mut(x).right = moved;
        if let Some(m) = moved {
            self.node_mut(m).parent = Some(x);
        }
        self.node_mut(y).left = Some(x);
        self.node_mut(x).parent = Some(y);
        self.node_mut(y).parent = parent;
        self.replace_child(parent, x, Some(y));

        self.update_range(x);
        self.update_range(y);
    }

    /// Promote the left child of `x` into its place.
    fn rotate_right(&mut self, x: IntervalId) {
        let Some(y) = self.node(x).left else {
            panic!("rotate_right at {x:?} without a left child");
        };
        let parent = self.node(x).parent;
        let moved = self.node(y).right;

        self.node_mut(x).left = moved;
        if let Some(m) = moved {
            self.node_mut(m).parent = Some(x);
        }
        self.node_mut(y).right = Some(x);
        self.node_mut(x).parent = Some(y);
        self.node_mut(y).parent = parent;
        self.replace_child(parent, x, Some(y));

        self.update_range(x);
        self.update_range(y);
    }

    /// Point whichever child link of `parent` refers to `old` at `new`. A
    /// `None` parent means `old` was a root and there is nothing to relink.
    fn replace_child(
        &mut self,
        parent: Option<IntervalId>,
        old: IntervalId,
        new: Option<IntervalId>,
    ) {
        let Some(p) = parent else {
            return;
        };
        let node = self.node_mut(p);
        if node.left == Some(old) {
            node.left = new;
        } else if node.right == Some(old) {
            node.right = new;
        } else {
            panic!("{old:?} claims parent {p:?}, which does not link back to it");
        }
    }

    /// Recompute the cached bounds of `id` from its interval and children.
    pub(crate) fn update_range(&mut self, id: IntervalId) {
        let node = self.node(id);
        let mut min_start = node.interval.start();
        let mut max_end = node.interval.end();
        for child in [node.left, node.right].into_iter().flatten() {
            let child = self.node(child);
            min_start = min_start.min(child.min_start);
            max_end = max_end.max(child.max_end);
        }
        let node = self.node_mut(id);
        node.min_start = min_start;
        node.max_end = max_end;
    }

    fn fix_upward(&mut self, from: Option<IntervalId>) {
        let mut cur = from;
        while let Some(id) = cur {
            self.update_range(id);
            cur = self.node(id).parent;
        }
    }

    /// Detach `id` from the tree rooted at `root` and free its slot.
    ///
    /// A node with two children is replaced by its in-order predecessor or
    /// successor (fair coin). The replacement leaves its own spot, which has
    /// at most one child, takes over the removed node's links and swaps
    /// priorities with it, so heap order holds for the remaining nodes.
    pub(crate) fn remove<R: Rng + ?Sized>(
        &mut self,
        root: IntervalId,
        id: IntervalId,
        fix: RangeFix,
        rng: &mut R,
    ) -> Removed<T> {
        let (left, right, parent) = {
            let node = self.node(id);
            (node.left, node.right, node.parent)
        };

        let (replacement, lowest) = match (left, right) {
            (Some(l), Some(r)) => {
                let sub = if rng.random_bool(0.5) {
                    self.rightmost(l)
                } else {
                    self.leftmost(r)
                };

                // splice the replacement out of its current spot
                let sub_parent = self.node(sub).parent;
                let sub_child = {
                    let node = self.node(sub);
                    node.left.or(node.right)
                };
                self.replace_child(sub_parent, sub, sub_child);
                if let Some(c) = sub_child {
                    self.node_mut(c).parent = sub_parent;
                }

                // children may have changed if the replacement was one of them
                let (l, r) = {
                    let node = self.node(id);
                    (node.left, node.right)
                };
                {
                    let node = self.node_mut(sub);
                    node.left = l;
                    node.right = r;
                    node.parent = parent;
                }
                for c in [l, r].into_iter().flatten() {
                    self.node_mut(c).parent = Some(sub);
                }
                self.replace_child(parent, id, Some(sub));

                let removed_priority = self.node(id).priority;
                let sub_priority = self.node(sub).priority;
                self.node_mut(sub).priority = removed_priority;
                self.node_mut(id).priority = sub_priority;

                let lowest = match sub_parent {
                    Some(p) if p != id => p,
                    _ => sub,
                };
                (Some(sub), Some(lowest))
            }
            (child, None) | (None, child) => {
                self.replace_child(parent, id, child);
                if let Some(c) = child {
                    self.node_mut(c).parent = parent;
                }
                (child, parent)
            }
        };

        if fix == RangeFix::Eager {
            self.fix_upward(lowest);
        }

        let root = if parent.is_none() {
            replacement
        } else {
            Some(root)
        };
        Removed {
            root,
            interval: self.free(id).interval,
        }
    }

    /// Recompute every cached bound in the tree, children before parents.
    pub(crate) fn recompute_ranges(&mut self, root: IntervalId) {
        let mut stack = vec![root];
        let mut order = Vec::new();
        while let Some(id) = stack.pop() {
            order.push(id);
            let node = self.node(id);
            stack.extend(node.left);
            stack.extend(node.right);
        }
        for id in order.into_iter().rev() {
            self.update_range(id);
        }
    }

    pub(crate) fn leftmost(&self, mut id: IntervalId) -> IntervalId {
        while let Some(left) = self.node(id).left {
            id = left;
        }
        id
    }

    pub(crate) fn rightmost(&self, mut id: IntervalId) -> IntervalId {
        while let Some(right) = self.node(id).right {
            id = right;
        }
        id
    }

    /// In-order successor, found through parent links.
    pub(crate) fn successor(&self, id: IntervalId) -> Option<IntervalId> {
        if let Some(right) = self.node(id).right {
            return Some(self.leftmost(right));
        }
        let mut cur = id;
        while let Some(parent) = self.node(cur).parent {
            if self.node(parent).left == Some(cur) {
                return Some(parent);
            }
            cur = parent;
        }
        None
    }

    /// In-order predecessor, found through parent links.
    pub(crate) fn predecessor(&self, id: IntervalId) -> Option<IntervalId> {
        if let Some(left) = self.node(id).left {
            return Some(self.rightmost(left));
        }
        let mut cur = id;
        while let Some(parent) = self.node(cur).parent {
            if self.node(parent).right == Some(cur) {
                return Some(parent);
            }
            cur = parent;
        }
        None
    }

    /// Verify every tree invariant below `root` and return the node count.
    pub(crate) fn check(&self, root: IntervalId) -> Result<usize, String> {
        let Some(root_node) = self.get(root) else {
            return Err(format!("root {root:?} is dangling"));
        };
        if root_node.parent.is_some() {
            return Err(format!("root {root:?} has a parent link"));
        }
        let key = root_node.interval.key();

        // (id, lower start bound, upper start bound)
        let mut stack = vec![(root, i64::MIN, i64::MAX)];
        let mut order = Vec::new();
        while let Some((id, lo, hi)) = stack.pop() {
            let Some(node) = self.get(id) else {
                return Err(format!("link to dangling handle {id:?}"));
            };
            let start = node.interval.start();
            if node.interval.key() != key {
                return Err(format!(
                    "{} is indexed under key {key}",
                    node.interval
                ));
            }
            if start < lo || start > hi {
                return Err(format!(
                    "{} breaks start order: expected within [{lo}, {hi}]",
                    node.interval
                ));
            }
            for (child, side_lo, side_hi) in [(node.left, lo, start), (node.right, start, hi)] {
                let Some(child) = child else {
                    continue;
                };
                let Some(child_node) = self.get(child) else {
                    return Err(format!("{} links to dangling handle {child:?}", node.interval));
                };
                if child_node.parent != Some(id) {
                    return Err(format!(
                        "{} does not link back to its parent {}",
                        child_node.interval, node.interval
                    ));
                }
                if child_node.priority > node.priority {
                    return Err(format!(
                        "{} (priority {}) outranks its parent {} (priority {})",
                        child_node.interval, child_node.priority, node.interval, node.priority
                    ));
                }
                stack.push((child, side_lo, side_hi));
            }
            order.push(id);
            if order.len() > self.len() {
                return Err("cycle detected in tree links".to_string());
            }
        }

        let mut bounds: HashMap<IntervalId, (i64, i64)> = HashMap::with_capacity(order.len());
        for &id in order.iter().rev() {
            let node = self.node(id);
            let mut min_start = node.interval.start();
            let mut max_end = node.interval.end();
            for child in [node.left, node.right].into_iter().flatten() {
                let (lo, hi) = bounds[&child];
                min_start = min_start.min(lo);
                max_end = max_end.max(hi);
            }
            if (node.min_start, node.max_end) != (min_start, max_end) {
                return Err(format!(
                    "{} caches subtree range [{}, {}) but the subtree spans [{min_start}, {max_end})",
                    node.interval, node.min_start, node.max_end
                ));
            }
            bounds.insert(id, (min_start, max_end));
        }
        Ok(order.len())
    }
}
