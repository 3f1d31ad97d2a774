//! # B+Tree Index
//!
//! An ordered, fixed-size-block, disk-backed B+Tree mapping fixed-width
//! keys to fixed-width values, persisted entirely through a caller-supplied
//! [`BlockStore`](crate::storage::BlockStore).
//!
//! ## Structure
//!
//! Block 0 is the superblock carrying the tree's geometry, the root block
//! index, and the free-list head. Every other block is either reachable
//! from the root or threaded on the free list, never both.
//!
//! ```text
//!                      [Root]
//!                     /      \
//!            [Interior]      [Interior]
//!            /    |    \       /    \
//!       [Leaf] [Leaf] [Leaf] [Leaf] [Leaf]
//! ```
//!
//! Leaves hold `(key, value)` pairs; interior nodes hold separator keys and
//! child block pointers. A separator is the largest key of its left
//! subtree, and descent takes the left branch on equality, so equal keys
//! are found where they were inserted.
//!
//! ## Module Organization
//!
//! - `node`: the codec: header layout, payload slot math, typed accessors
//! - `tree`: the index façade, free-list allocator, and mutation engine
//! - `display`: tree renderings and the structural sanity checker

mod display;
mod node;
mod tree;

pub use display::DisplayMode;
pub use node::{Node, NodeHeader, NodeType, PayloadKind, NODE_HEADER_SIZE, PTR_SIZE};
pub use tree::{BTreeIndex, Path};
