use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::fingerprint::FingerprintError;
use crate::generation::GenerationError;
use crate::vectordb::VectorStoreError;

/// Typed outcome of a failed query. Messages never carry provider payloads.
///
/// `Clone` because every caller coalesced onto one computation receives the
/// same outcome.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid query: {reason}")]
    InvalidInput { reason: String },

    #[error("{component} unavailable: {reason}")]
    UpstreamUnavailable {
        component: &'static str,
        reason: String,
    },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl QueryError {
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, QueryError::InvalidInput { .. })
    }
}

impl From<FingerprintError> for QueryError {
    fn from(e: FingerprintError) -> Self {
        QueryError::InvalidInput {
            reason: e.to_string(),
        }
    }
}

impl From<EmbeddingError> for QueryError {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::Provider { .. } | EmbeddingError::ShutDown => {
                QueryError::UpstreamUnavailable {
                    component: "embedding provider",
                    reason: e.to_string(),
                }
            }
            EmbeddingError::CountMismatch { .. } | EmbeddingError::EmptyVector => {
                QueryError::Internal {
                    reason: e.to_string(),
                }
            }
        }
    }
}

impl From<VectorStoreError> for QueryError {
    fn from(e: VectorStoreError) -> Self {
        match e {
            VectorStoreError::QueryRejected { .. } | VectorStoreError::InvalidResponse { .. } => {
                QueryError::Internal {
                    reason: e.to_string(),
                }
            }
            VectorStoreError::Pool(_) => QueryError::UpstreamUnavailable {
                component: "connection pool",
                reason: e.to_string(),
            },
            _ => QueryError::UpstreamUnavailable {
                component: "vector store",
                reason: e.to_string(),
            },
        }
    }
}

impl From<GenerationError> for QueryError {
    fn from(e: GenerationError) -> Self {
        QueryError::UpstreamUnavailable {
            component: "generator",
            reason: e.to_string(),
        }
    }
}
