use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::{Document, VectorStore, VectorStoreError};
use crate::cache::cosine_similarity;

/// Handle returned by [`MockVectorStore::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConnection {
    pub id: u64,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    vector: Vec<f32>,
    document: Document,
}

/// In-memory vector store with call counters and failure injection.
#[derive(Debug, Default)]
pub struct MockVectorStore {
    documents: RwLock<Vec<StoredDocument>>,
    next_connection: AtomicU64,
    connects: AtomicUsize,
    queries: AtomicUsize,
    health_checks: AtomicUsize,
    fail_queries: AtomicUsize,
    reject_queries: AtomicUsize,
    fail_connects: AtomicUsize,
    unhealthy: AtomicBool,
    latency: Mutex<Option<Duration>>,
    connect_latency: Mutex<Option<Duration>>,
    health_latency: Mutex<Option<Duration>>,
}

impl MockVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a document retrievable by similarity to `vector`.
    pub fn add_document(&self, id: &str, text: &str, vector: Vec<f32>) {
        self.documents.write().push(StoredDocument {
            vector,
            document: Document::new(id, text, 0.0),
        });
    }

    /// The next `n` queries fail with a transient error.
    pub fn fail_next_queries(&self, n: usize) {
        self.fail_queries.store(n, Ordering::SeqCst);
    }

    /// The next `n` queries are refused outright, as for a missing collection.
    pub fn reject_next_queries(&self, n: usize) {
        self.reject_queries.store(n, Ordering::SeqCst);
    }

    /// The next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Makes every health probe fail (or pass again).
    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    /// Delays every query by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Delays every connection attempt by `latency`.
    pub fn set_connect_latency(&self, latency: Duration) {
        *self.connect_latency.lock() = Some(latency);
    }

    pub fn clear_connect_latency(&self) {
        *self.connect_latency.lock() = None;
    }

    /// Delays every health probe by `latency`.
    pub fn set_health_latency(&self, latency: Duration) {
        *self.health_latency.lock() = Some(latency);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn health_check_count(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl VectorStore for MockVectorStore {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection, VectorStoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let latency = *self.connect_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if Self::take_failure(&self.fail_connects) {
            return Err(VectorStoreError::ConnectionFailed {
                url: "mock://".to_string(),
                message: "injected connect failure".to_string(),
            });
        }
        Ok(MockConnection {
            id: self.next_connection.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn health_check(&self, _conn: &MockConnection) -> Result<(), VectorStoreError> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);

        let latency = *self.health_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(VectorStoreError::HealthCheckFailed {
                message: "injected health failure".to_string(),
            });
        }
        Ok(())
    }

    async fn query(
        &self,
        _conn: &MockConnection,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Document>, VectorStoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if Self::take_failure(&self.reject_queries) {
            return Err(VectorStoreError::QueryRejected {
                collection: "mock".to_string(),
                message: "collection not found".to_string(),
            });
        }
        if Self::take_failure(&self.fail_queries) {
            return Err(VectorStoreError::QueryFailed {
                collection: "mock".to_string(),
                message: "injected query failure".to_string(),
            });
        }

        let mut scored: Vec<Document> = self
            .documents
            .read()
            .iter()
            .filter_map(|stored| {
                let score = cosine_similarity(vector, &stored.vector)?;
                let mut document = stored.document.clone();
                document.score = score;
                Some(document)
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }
}
