//! Dynamic genomic interval index built on augmented treaps.
//!
//! Intervals are half-open `[start, end)` ranges on a key such as a
//! chromosome, each carrying an opaque payload. A [`TreeIndex`] keeps one
//! randomized balanced tree per key, so inserts and removals stay
//! logarithmic while overlap-family queries prune whole subtrees using the
//! `[min_start, max_end)` bounds cached in every node.
//!
//! ## Features
//!
//! - **Dynamic**: insert, remove and merge at any time, no rebuild step
//! - **Tolerant queries**: intersect, contain and within, each with a signed
//!   overlap/slop tolerance
//! - **Lazy results**: borrowed [`QueryIter`]s, or threaded [`ResultStream`]s
//!   that can be cancelled mid-way
//! - **Flattening**: coalesce results into disjoint spans with [`flatten()`]
//! - **Persistence**: versioned binary encoding of whole trees
//!
//! ## Quick Start
//!
//! ```rust
//! use itreap::{Interval, TreeIndex};
//!
//! let mut index = TreeIndex::new();
//! index.insert(Interval::new("chr1", 100, 200, "gene1").unwrap());
//! index.insert(Interval::new("chr1", 150, 300, "gene2").unwrap());
//! index.insert(Interval::new("chr1", 400, 500, "gene3").unwrap());
//!
//! let query = Interval::new("chr1", 180, 250, ()).unwrap();
//! let names: Vec<&str> = index
//!     .intersect(&query, 0)
//!     .map(|hit| *hit.interval.payload())
//!     .collect();
//! assert_eq!(names, vec!["gene1", "gene2"]);
//!
//! // merge nearby results into disjoint spans
//! let wide = Interval::new("chr1", 0, 1000, ()).unwrap();
//! let flat = index.flatten(&wide, 0, 0);
//! assert_eq!(flat.flat.len(), 2);
//! assert_eq!(flat.flat[0].to_string(), "chr1:[100,300)");
//! ```
//!
//! ## Saving and loading trees
//!
//! ```rust
//! use itreap::{Interval, TreeIndex};
//!
//! let mut index = TreeIndex::new();
//! index.insert(Interval::new("chr2", 10, 20, 7u32).unwrap());
//!
//! let mut bytes = Vec::new();
//! index.encode_tree("chr2", &mut bytes).unwrap();
//!
//! let mut restored: TreeIndex<u32> = TreeIndex::new();
//! assert_eq!(restored.decode_tree(&mut bytes.as_slice()).unwrap().as_deref(), Some("chr2"));
//! assert_eq!(restored.range("chr2"), Some((10, 20)));
//! ```

pub mod codec;
pub mod config;
pub mod errors;
pub mod flatten;
pub mod models;
pub mod node;
pub mod query;
pub mod stream;
pub mod tree_index;

mod treap;

// re-exports
pub use self::config::IndexConfig;
pub use self::errors::{Result, TreapError};
pub use self::flatten::{Bounded, Flattened, flatten};
pub use self::models::Interval;
pub use self::node::IntervalId;
pub use self::query::{Hit, Predicate, QueryIter};
pub use self::stream::{ResultStream, StreamItem};
pub use self::tree_index::{Merged, RemovalBatch, TreeIndex};

pub mod consts {
    /// Version written into, and required from, every encoded tree.
    pub const FORMAT_VERSION: u8 = 1;
    pub const MAGIC_NUMBER: &[u8; 4] = b"ITRP";
}
