//! # Error Taxonomy
//!
//! Every fallible operation in oakdb returns [`Result`], carrying one of the
//! closed set of [`IndexError`] kinds. There is no out-of-band exception
//! mechanism: errors propagate eagerly with `?`, and the first non-success
//! code from any codec, allocator, or store call aborts the operation.
//!
//! `Nonexistent` from lookup/update is the only kind a caller is expected to
//! handle routinely. All other kinds indicate structural problems, resource
//! exhaustion, or misuse.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// The free list is empty; no block can be allocated.
    #[error("no free blocks remain")]
    NoSpace,

    /// The requested key is not present in the tree, or a traversal reached
    /// a node with nothing to descend into.
    #[error("key does not exist")]
    Nonexistent,

    /// A slot accessor was asked for an index beyond the node's current
    /// logical size.
    #[error("slot {index} out of bounds (limit {limit})")]
    BadOffset { index: usize, limit: usize },

    /// A block carried a node type the operation cannot accept.
    #[error("unexpected node type {0:#04x}")]
    BadNodeType(u8),

    /// Two adjacent keys in a node violate sort order.
    #[error("keys out of order in block {0}")]
    BadOrder(u32),

    /// A block was reached twice during a traversal; the tree has a cycle.
    #[error("block {0} visited twice during traversal")]
    InnerLoop(u32),

    /// A node holds more keys than its slot capacity permits.
    #[error("block {0} holds more keys than its capacity")]
    NodeOverflow(u32),

    /// The operation is specified but not implemented.
    #[error("operation not implemented")]
    Unimplemented,

    /// A structural invariant that should always hold was observed broken.
    #[error("structural invariant violated: {0}")]
    Insane(&'static str),

    /// A key, value, or buffer argument had the wrong byte length for the
    /// tree's fixed geometry.
    #[error("{what} must be {expected} bytes, got {got}")]
    WrongLength {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// An I/O error from the backing store.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;
