//! # oakdb - Disk-Backed B+Tree Index
//!
//! oakdb is a small, embeddable B+Tree index over a block-addressable store.
//! It maps fixed-width keys to fixed-width values, keeps every node in
//! exactly one fixed-size block, and drives all persistence through the
//! [`BlockStore`] trait supplied by the caller.
//!
//! ## Quick Start
//!
//! ```ignore
//! use oakdb::{BTreeIndex, MemStore};
//!
//! let mut store = MemStore::new(4096, 256);
//! let mut index = BTreeIndex::create(&mut store, 8, 8)?;
//!
//! index.insert(b"alpha\0\0\0", b"AAAAAAAA")?;
//! let value = index.lookup(b"alpha\0\0\0")?;
//! index.detach()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------+
//! |      Index facade (BTreeIndex)       |
//! +--------------------------------------+
//! |  Navigator | Mutation engine | Sanity|
//! +--------------------------------------+
//! |        Node codec (Node, header)     |
//! +--------------------------------------+
//! |   BlockStore (mem / mmap / cached)   |
//! +--------------------------------------+
//! ```
//!
//! Every operation enters through the façade with the root block index from
//! the superblock, walks codec-materialized blocks, and (for mutations)
//! returns through the mutation engine, which may allocate from the
//! free list and re-serialize several blocks before the call returns.
//!
//! ## What oakdb Is Not
//!
//! There is no write-ahead log, no crash-safe commit, and no support for
//! concurrent writers. Keys and values are fixed-width; deletion is
//! unimplemented. The store owns durability policy.
//!
//! ## Module Overview
//!
//! - [`btree`]: node codec, index façade, mutation engine, display/sanity
//! - [`storage`]: the `BlockStore` trait and the bundled stores
//! - [`error`]: the closed error taxonomy
//! - `cli`: the interactive inspection shell used by the `oakdb` binary

pub mod btree;
pub mod cli;
pub mod error;
pub mod storage;

pub use btree::{BTreeIndex, DisplayMode, Node, NodeType};
pub use error::{IndexError, Result};
pub use storage::{BlockCache, BlockStore, CacheStats, MemStore, MmapStore};
