//! Cross-cutting, shared defaults.
//!
//! Every value here is a default only; the runtime value comes from
//! [`crate::config::Config`].

use std::time::Duration;

/// Default cosine similarity required for a near-duplicate result cache hit.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.80;

/// Default lifetime of a cached answer.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Default maximum number of cached answers.
pub const DEFAULT_RESULT_MAX_ENTRIES: usize = 1_000;

/// Default interval between expired-entry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default lifetime of a cached embedding vector.
pub const DEFAULT_EMBEDDING_TTL: Duration = Duration::from_secs(60 * 60);

/// Default maximum number of cached embedding vectors.
pub const DEFAULT_EMBEDDING_MAX_ENTRIES: u64 = 10_000;

/// Default number of distinct texts that triggers an immediate batch flush.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default time a partial batch waits before being flushed.
pub const DEFAULT_BATCH_FLUSH_DELAY: Duration = Duration::from_millis(20);

/// Default maximum number of live vector-store connections.
pub const DEFAULT_POOL_MAX_SIZE: usize = 20;

/// Default time a request waits for a pool slot.
pub const DEFAULT_POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between health probes of unhealthy slots.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Consecutive failed probes after which a slot is closed and replaced.
pub const DEFAULT_MAX_HEALTH_FAILURES: u32 = 3;

/// Default attempts for transient upstream failures.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default backoff cap.
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

/// Default maximum raw query length, in characters.
pub const DEFAULT_MAX_QUERY_LEN: usize = 4_096;

/// Default number of documents fetched from the vector store.
pub const DEFAULT_TOP_K: usize = 5;

/// Prefix applied to every exported metric name.
pub const METRIC_PREFIX: &str = "ragline";

/// Response header carrying the cache outcome of a query.
pub const RAGLINE_CACHE_HEADER: &str = "X-Ragline-Cache";

/// Vector size produced by the stub embedding provider.
pub const STUB_EMBEDDING_DIM: usize = 384;
