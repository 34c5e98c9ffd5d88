use thiserror::Error;

use crate::pool::PoolError;
use crate::retry::Retryable;

#[derive(Debug, Error, Clone)]
/// Errors returned by vector store operations.
pub enum VectorStoreError {
    /// Could not open a connection to the store.
    #[error("failed to connect to vector store at '{url}': {message}")]
    ConnectionFailed {
        /// Endpoint URL.
        url: String,
        /// Error message.
        message: String,
    },

    /// Health probe failed on an open connection.
    #[error("vector store health check failed: {message}")]
    HealthCheckFailed { message: String },

    /// Query failed.
    #[error("failed to query '{collection}': {message}")]
    QueryFailed {
        /// Collection name.
        collection: String,
        /// Error message.
        message: String,
    },

    /// The store refused the query itself (missing collection, wrong vector
    /// size, bad credentials). Repeating it cannot succeed.
    #[error("query on '{collection}' rejected: {message}")]
    QueryRejected {
        /// Collection name.
        collection: String,
        /// Error message.
        message: String,
    },

    /// The store answered with something that cannot be used.
    #[error("invalid vector store response: {message}")]
    InvalidResponse { message: String },

    /// No connection could be checked out.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// gRPC status codes for requests the store rejects on their merits:
/// InvalidArgument, NotFound, PermissionDenied, FailedPrecondition,
/// OutOfRange, Unimplemented and Unauthenticated.
const REJECTED_STATUS_CODES: [i32; 7] = [3, 5, 7, 9, 11, 12, 16];

impl VectorStoreError {
    /// Classifies a failed query by the gRPC status code the store returned,
    /// if any. Failures without a status (transport errors) stay transient.
    pub fn from_query_status(
        collection: impl Into<String>,
        code: Option<i32>,
        message: impl Into<String>,
    ) -> Self {
        let collection = collection.into();
        let message = message.into();
        match code {
            Some(code) if REJECTED_STATUS_CODES.contains(&code) => {
                VectorStoreError::QueryRejected {
                    collection,
                    message,
                }
            }
            _ => VectorStoreError::QueryFailed {
                collection,
                message,
            },
        }
    }
}

impl Retryable for VectorStoreError {
    fn is_transient(&self) -> bool {
        match self {
            VectorStoreError::ConnectionFailed { .. }
            | VectorStoreError::HealthCheckFailed { .. }
            | VectorStoreError::QueryFailed { .. } => true,
            VectorStoreError::QueryRejected { .. } | VectorStoreError::InvalidResponse { .. } => {
                false
            }
            VectorStoreError::Pool(e) => e.is_transient(),
        }
    }
}
