//! The engine's public error type.

use thiserror::Error;

/// Errors surfaced by every public tuplespace operation.
///
/// All variants are value-returned outcomes, never panics: matcher and store
/// failures abort the current operation with no partial commit, because the
/// event log and hot-store mutations for a single operation are only applied
/// after a match is fully decided.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TupleSpaceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("matcher failure: {0}")]
    Matcher(String),

    #[error("store failure: {0}")]
    Store(String),

    #[error("installing can be done only on startup")]
    InstallAfterStartup,

    #[error("replay divergence: {0}")]
    ReplayDivergence(String),

    #[error("lock manager failure: {0}")]
    Lock(String),
}

impl TupleSpaceError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        TupleSpaceError::InvalidArgument(msg.into())
    }

    pub fn matcher(msg: impl Into<String>) -> Self {
        TupleSpaceError::Matcher(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        TupleSpaceError::Store(msg.into())
    }

    pub fn replay_divergence(msg: impl Into<String>) -> Self {
        TupleSpaceError::ReplayDivergence(msg.into())
    }

    pub fn lock(msg: impl Into<String>) -> Self {
        TupleSpaceError::Lock(msg.into())
    }
}
