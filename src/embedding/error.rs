use thiserror::Error;

use crate::retry::Retryable;

/// Errors from the embedding provider or the batcher in front of it.
///
/// `Clone` because one failed batch fans the same error out to every waiter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    /// The provider call for a batch failed.
    #[error("embedding provider error: {reason}")]
    Provider { reason: String },

    /// The provider answered with the wrong number of vectors.
    #[error("embedding provider returned {actual} vectors for {expected} texts")]
    CountMismatch { expected: usize, actual: usize },

    /// The provider answered with an empty vector.
    #[error("embedding provider returned an empty vector")]
    EmptyVector,

    /// The batch worker is no longer running.
    #[error("embedding batcher is shut down")]
    ShutDown,
}

impl Retryable for EmbeddingError {
    fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::Provider { .. })
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        EmbeddingError::Provider {
            reason: err.to_string(),
        }
    }
}
