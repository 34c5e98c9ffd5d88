use std::time::Duration;

use qdrant_client::{Qdrant, QdrantError};
use qdrant_client::qdrant::SearchPointsBuilder;
use tracing::debug;

use super::VectorStore;
use super::error::VectorStoreError;
use super::model::Document;

/// Default payload field holding the document text.
pub const DEFAULT_TEXT_FIELD: &str = "page_content";

#[derive(Debug, Clone)]
/// Qdrant-backed [`VectorStore`]. Each pooled connection is its own client.
pub struct QdrantStore {
    url: String,
    collection: String,
    text_field: String,
    timeout: Duration,
}

impl QdrantStore {
    pub fn new(url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            collection: collection.into(),
            text_field: DEFAULT_TEXT_FIELD.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_text_field(mut self, field: impl Into<String>) -> Self {
        self.text_field = field.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the configured URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl VectorStore for QdrantStore {
    type Connection = Qdrant;

    async fn connect(&self) -> Result<Qdrant, VectorStoreError> {
        Qdrant::from_url(&self.url)
            .timeout(self.timeout)
            .build()
            .map_err(|e| VectorStoreError::ConnectionFailed {
                url: self.url.clone(),
                message: e.to_string(),
            })
    }

    async fn health_check(&self, conn: &Qdrant) -> Result<(), VectorStoreError> {
        conn.health_check()
            .await
            .map_err(|e| VectorStoreError::HealthCheckFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn query(
        &self,
        conn: &Qdrant,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Document>, VectorStoreError> {
        let search = SearchPointsBuilder::new(&self.collection, vector.to_vec(), top_k as u64)
            .with_payload(true);

        let response = conn
            .search_points(search)
            .await
            .map_err(|e| {
                let code = match &e {
                    QdrantError::ResponseError { status } => Some(status.code() as i32),
                    _ => None,
                };
                VectorStoreError::from_query_status(&self.collection, code, e.to_string())
            })?;

        let total = response.result.len();
        let documents: Vec<Document> = response
            .result
            .into_iter()
            .filter_map(|p| Document::from_scored_point(p, &self.text_field))
            .collect();

        if documents.len() < total {
            debug!(
                skipped = total - documents.len(),
                text_field = %self.text_field,
                "Dropped points without a text payload"
            );
        }
        Ok(documents)
    }
}
