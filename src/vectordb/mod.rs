//! Vector store integration.
//!
//! [`VectorStore`] is the seam the connection pool and the query path are
//! generic over; [`QdrantStore`] is the production adapter.

use std::future::Future;

pub mod client;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod model;

#[cfg(test)]
mod tests;

pub use client::{DEFAULT_TEXT_FIELD, QdrantStore};
pub use error::VectorStoreError;
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockConnection, MockVectorStore};
pub use model::Document;

pub const DEFAULT_COLLECTION_NAME: &str = "documents";

/// Minimal async interface used by the pool and the query path.
pub trait VectorStore: Send + Sync + 'static {
    /// One pooled handle. Cloning must be cheap.
    type Connection: Clone + Send + Sync + 'static;

    /// Opens a new connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, VectorStoreError>> + Send;

    /// Probes an open connection.
    fn health_check(
        &self,
        conn: &Self::Connection,
    ) -> impl Future<Output = Result<(), VectorStoreError>> + Send;

    /// Returns up to `top_k` documents nearest to `vector`, best first.
    fn query(
        &self,
        conn: &Self::Connection,
        vector: &[f32],
        top_k: usize,
    ) -> impl Future<Output = Result<Vec<Document>, VectorStoreError>> + Send;
}
