use thiserror::Error;

/// Errors raised by vector clock arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("vector clock has {found} slots, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("vector clock slot {slot} cannot be incremented any further")]
    Exhausted { slot: usize },
}

/// Errors surfaced by [`crate::node::ReplicaNode`] operations.
///
/// None of these are fatal to the node. Malformed peer messages are dropped
/// after logging, and client errors are reported back to the caller.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("no entry at position {index} (board has {len} entries)")]
    NoSuchPosition { index: usize, len: usize },

    #[error(transparent)]
    Clock(#[from] ClockError),
}
