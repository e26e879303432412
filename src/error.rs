//! Error types for the B+tree engine.

use crate::types::NodeHandle;
use thiserror::Error;

/// Result type alias for tree operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tree engine
#[derive(Error, Debug)]
pub enum Error {
    /// A colliding key was encountered and the active policy forbids overwrite
    #[error("duplicate key")]
    DuplicateKey,

    /// The tree structure is corrupt (e.g. the sentinel root lost its single-child shape)
    #[error("invalid tree state: {0}")]
    InvalidTreeState(String),

    /// An internal invariant was violated; indicates an engine bug, not a data condition
    #[error("assertion failed: {0}")]
    AssertionFailed(&'static str),

    /// Requested node was not found in storage
    #[error("node {0} not found")]
    NodeNotFound(NodeHandle),

    /// A frozen node was mutated without going through a transaction
    #[error("node {0} is read-only")]
    ReadOnlyNode(NodeHandle),

    /// Tree options failed validation
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Failure surfaced by the storage collaborator, passed through unchanged
    #[error("storage failure: {0}")]
    Storage(String),
}

impl Error {
    /// Create an invalid tree state error with a message
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidTreeState(msg.into())
    }

    /// Create an invalid options error
    pub fn invalid_options(msg: impl Into<String>) -> Self {
        Self::InvalidOptions(msg.into())
    }

    /// Create a storage failure error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

/// Check an engine invariant, raising [`Error::AssertionFailed`] when it does not hold
pub(crate) fn ensure(condition: bool, msg: &'static str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::AssertionFailed(msg))
    }
}
