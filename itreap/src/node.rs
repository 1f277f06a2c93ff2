use rand::Rng;

use crate::models::Interval;

/// Handle to an interval stored in a [`TreeIndex`](crate::TreeIndex).
///
/// Handles are arena addresses tagged with the generation of their slot.
/// Freed slots are reused, but reuse bumps the generation, so a stale handle
/// stops resolving instead of pointing at some other interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntervalId {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

impl IntervalId {
    /// The same handle after its arena was appended behind `offset` slots.
    pub(crate) fn shifted(self, offset: usize) -> Self {
        IntervalId {
            index: self.index + offset,
            generation: self.generation,
        }
    }
}

/// One treap node: the interval, its balancing priority, the cached
/// `[min_start, max_end)` bounds of its whole subtree and its links.
#[derive(Debug, Clone)]
pub(crate) struct Node<T> {
    pub interval: Interval<T>,
    pub priority: u32,
    pub min_start: i64,
    pub max_end: i64,
    pub left: Option<IntervalId>,
    pub right: Option<IntervalId>,
    pub parent: Option<IntervalId>,
}

impl<T> Node<T> {
    /// An isolated node, i.e. a valid single-node tree.
    pub fn new(interval: Interval<T>, priority: u32) -> Self {
        Node {
            min_start: interval.start(),
            max_end: interval.end(),
            interval,
            priority,
            left: None,
            right: None,
            parent: None,
        }
    }
}

/// Draw a node priority as `round(-ln(U) / ln 2)` with `U` uniform on `(0, 1]`.
///
/// The draw is geometric-like, so the largest priority in a tree of `n` nodes
/// is about `log2(n)` and expected depth stays logarithmic.
pub(crate) fn draw_priority<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    let u = 1.0 - rng.random::<f64>();
    (-u.ln() / std::f64::consts::LN_2).round() as u32
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    node: Option<Node<T>>,
}

/// Node storage shared by every key's tree. Links between nodes are slot
/// handles, which keeps parent back-references free of ownership cycles.
#[derive(Debug, Clone)]
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    /// Indices of empty slots ready for reuse.
    free: Vec<usize>,
    live: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<T> Arena<T> {
    pub fn alloc(&mut self, node: Node<T>) -> IntervalId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.node = Some(node);
            return IntervalId {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        IntervalId {
            index: self.slots.len() - 1,
            generation: 0,
        }
    }

    /// Take a node out of the arena. Its slot is recycled under a new
    /// generation, unless the generation counter is exhausted, in which case
    /// the slot is retired for good.
    pub fn free(&mut self, id: IntervalId) -> Node<T> {
        let node = self
            .slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.take());
        let Some(node) = node else {
            panic!("attempted to free dangling interval handle {id:?}");
        };

        let slot = &mut self.slots[id.index];
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.free.push(id.index);
        }
        self.live -= 1;
        node
    }

    #[inline]
    pub fn get(&self, id: IntervalId) -> Option<&Node<T>> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, id: IntervalId) -> Option<&mut Node<T>> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Resolve a handle reached through tree links. A dangling link means the
    /// tree structure is broken, so this panics instead of returning `None`.
    #[inline]
    pub fn node(&self, id: IntervalId) -> &Node<T> {
        match self.get(id) {
            Some(node) => node,
            None => panic!("interval tree link points at dangling handle {id:?}"),
        }
    }

    #[inline]
    pub fn node_mut(&mut self, id: IntervalId) -> &mut Node<T> {
        match self.get_mut(id) {
            Some(node) => node,
            None => panic!("interval tree link points at dangling handle {id:?}"),
        }
    }

    /// Number of live nodes across all trees.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Allocated slots, live or free.
    #[cfg(test)]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Move every node of `other` into this arena, behind the existing slots.
    /// Handles into `other` must be [`shifted`](IntervalId::shifted) by the
    /// returned offset.
    pub fn absorb(&mut self, other: Arena<T>) -> usize {
        let offset = self.slots.len();
        let shift = |link: Option<IntervalId>| link.map(|id| id.shifted(offset));

        self.live += other.live;
        self.free.extend(other.free.iter().map(|index| index + offset));
        self.slots.reserve(other.slots.len());
        for mut slot in other.slots {
            if let Some(node) = slot.node.as_mut() {
                node.left = shift(node.left);
                node.right = shift(node.right);
                node.parent = shift(node.parent);
            }
            self.slots.push(slot);
        }
        offset
    }
}
