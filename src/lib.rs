//! Ragline library crate (used by the server binary and integration tests).
//!
//! Ragline sits in front of a retrieval-augmented search backend and makes
//! repeated or near-duplicate queries cheap:
//!
//! - [`FingerprintResolver`] normalizes a query and keys it.
//! - [`ResultCacheHandle`] answers exact and near-duplicate queries.
//! - [`EmbeddingBatcher`] coalesces embedding requests into provider batches.
//! - [`ConnectionPool`] bounds and health-checks vector-store connections.
//! - [`PerformanceMonitor`] keeps windowed metrics and raises alerts.
//! - [`QueryService`] ties them together behind `handle(query)`.
//!
//! ## Test/Mock Support
//! Mock implementations are available behind `#[cfg(any(test, feature = "mock"))]`.

pub mod cache;
pub mod clock;
pub mod config;
pub mod constants;
pub mod embedding;
pub mod fingerprint;
pub mod gateway;
pub mod generation;
pub mod hashing;
pub mod lifecycle;
pub mod monitor;
pub mod pool;
pub mod retry;
pub mod service;
pub mod vectordb;

pub use cache::{CacheStats, CacheStatus, ResultCache, ResultCacheConfig, ResultCacheHandle};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{Config, ConfigError};
pub use embedding::{
    BatcherConfig, BatcherStats, EmbeddingBatcher, EmbeddingError, EmbeddingProvider,
    HttpEmbeddingProvider, StubEmbeddingProvider, WarmReport,
};
#[cfg(any(test, feature = "mock"))]
pub use embedding::MockEmbeddingProvider;
pub use fingerprint::{Fingerprint, FingerprintError, FingerprintResolver, normalize_query};
pub use generation::{GenaiGenerator, GenerationError, Generator, MockGenerator};
pub use lifecycle::MaintenanceTasks;
pub use monitor::{Alert, AlertThresholds, MetricsSnapshot, PerformanceMonitor};
pub use pool::{ConnectionPool, PoolConfig, PoolError, PoolStats, PooledConnection, ReleaseOutcome};
pub use retry::{RetryPolicy, Retryable};
pub use service::{QueryError, QueryResponse, QueryService};
pub use vectordb::{Document, QdrantStore, VectorStore, VectorStoreError};
#[cfg(any(test, feature = "mock"))]
pub use vectordb::MockVectorStore;
