use thiserror::Error;

use crate::retry::Retryable;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Errors returned when checking a connection out of the pool.
pub enum PoolError {
    /// Every slot stayed busy for the whole acquire timeout.
    #[error("connection pool exhausted after waiting {waited_ms}ms")]
    Exhausted { waited_ms: u64 },

    /// A new slot could not be opened.
    #[error("failed to open pooled connection: {reason}")]
    Connect { reason: String },

    /// The pool has been shut down.
    #[error("connection pool is closed")]
    Closed,
}

impl Retryable for PoolError {
    /// Exhaustion is surfaced to the caller rather than retried internally.
    fn is_transient(&self) -> bool {
        matches!(self, PoolError::Connect { .. })
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
