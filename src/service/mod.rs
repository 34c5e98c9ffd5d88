//! The query path: fingerprint, result cache, embedding, retrieval, generation.
//!
//! ```text
//! handle(query)
//!   resolve ── InvalidInput
//!   exact lookup ── hit ──────────────────────────────► answer (cached)
//!   join or start the in-flight computation for the key:
//!     exact re-check / similarity lookup ── hit ───────► answer (cached)
//!     embed (batched, then individually with backoff)
//!     pool.with_connection(query top_k) with backoff
//!     generate (or the no-results answer)
//!     insert ──────────────────────────────────────────► answer (computed)
//! ```
//!
//! Concurrent misses on the same key share one computation, so a burst of
//! identical queries costs one embedding, one vector query, and one
//! generation.

mod error;


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{Instrument, debug, info, instrument, warn};

pub use error::QueryError;

use crate::cache::{CacheHit, CacheStats, CacheStatus, QueryAnswer, ResultCacheHandle};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::embedding::{
    BatcherStats, EmbeddingBatcher, EmbeddingError, EmbeddingProvider, Vector, WarmReport,
};
use crate::fingerprint::{Fingerprint, FingerprintResolver, QueryEmbedder, normalize_query};
use crate::generation::{Generator, NO_RESULTS_ANSWER, build_prompt};
use crate::hashing::CacheKey;
use crate::monitor::{Alert, LookupOutcome, MetricEvent, MetricsSnapshot, PerformanceMonitor};
use crate::pool::{ConnectionPool, HealthReport, PoolStats};
use crate::retry::{Retryable, RetryPolicy};
use crate::vectordb::{Document, VectorStore};

/// Answer returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub documents_found: usize,
    pub served_from_cache: bool,
    #[serde(skip)]
    pub cache_status: CacheStatus,
}

impl QueryResponse {
    fn from_hit(hit: CacheHit) -> Self {
        Self {
            cache_status: hit.kind.status(),
            answer: hit.entry.value.answer,
            documents_found: hit.entry.value.documents_found,
            served_from_cache: true,
        }
    }
}

/// Entries removed by one sweep of both caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub results: usize,
    pub embeddings: usize,
}

type InFlight = Shared<BoxFuture<'static, Result<QueryResponse, QueryError>>>;

/// Collaborators assembled by the caller.
pub struct ServiceParts<S: VectorStore> {
    pub resolver: FingerprintResolver,
    pub cache: ResultCacheHandle,
    pub batcher: EmbeddingBatcher,
    pub pool: ConnectionPool<S>,
    pub generator: Arc<dyn Generator>,
    pub monitor: PerformanceMonitor,
    pub retry: RetryPolicy,
    pub top_k: usize,
}

/// Batched embedder that keeps the last failure, so the miss path can retry
/// individually instead of batching the same text a second time.
struct RecordingEmbedder<'a> {
    batcher: &'a EmbeddingBatcher,
    failure: Mutex<Option<EmbeddingError>>,
}

impl<'a> RecordingEmbedder<'a> {
    fn new(batcher: &'a EmbeddingBatcher) -> Self {
        Self {
            batcher,
            failure: Mutex::new(None),
        }
    }

    fn take_failure(&self) -> Option<EmbeddingError> {
        self.failure.lock().take()
    }
}

impl QueryEmbedder for RecordingEmbedder<'_> {
    async fn embed_query(&self, text: &str) -> Result<Vector, EmbeddingError> {
        let result = self.batcher.embed(text).await;
        if let Err(e) = &result {
            *self.failure.lock() = Some(e.clone());
        }
        result
    }
}

struct ServiceInner<S: VectorStore> {
    resolver: FingerprintResolver,
    cache: ResultCacheHandle,
    batcher: EmbeddingBatcher,
    pool: ConnectionPool<S>,
    generator: Arc<dyn Generator>,
    monitor: PerformanceMonitor,
    retry: RetryPolicy,
    top_k: usize,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
}

impl<S: VectorStore> ServiceInner<S> {
    fn record_lookup(&self, outcome: LookupOutcome, started: Instant) {
        self.monitor.record(MetricEvent::ResultCacheLookup {
            outcome,
            latency: started.elapsed(),
        });
    }

    #[instrument(skip_all, fields(key = %fp.short_key()))]
    async fn compute(
        &self,
        fp: &Fingerprint,
        lookup_started: Instant,
    ) -> Result<QueryResponse, QueryError> {
        // A computation for this key may have finished since the first probe.
        if let Some(hit) = self.cache.lookup_exact(fp) {
            self.record_lookup(LookupOutcome::Exact, lookup_started);
            return Ok(QueryResponse::from_hit(hit));
        }

        let embedder = RecordingEmbedder::new(&self.batcher);
        if let Some(hit) = self.cache.lookup_similar(fp, &embedder).await {
            self.record_lookup(LookupOutcome::Similar, lookup_started);
            return Ok(QueryResponse::from_hit(hit));
        }
        self.record_lookup(LookupOutcome::Miss, lookup_started);

        let vector = self.embed(fp, embedder.take_failure()).await?;
        let documents = self.retrieve(&vector).await?;
        let answer = self.answer(fp.normalized(), &documents).await?;

        let value = QueryAnswer {
            answer,
            documents_found: documents.len(),
        };
        self.cache.insert(fp, value.clone(), Some(vector));
        info!(documents_found = value.documents_found, "Answer computed and cached");

        Ok(QueryResponse {
            answer: value.answer,
            documents_found: value.documents_found,
            served_from_cache: false,
            cache_status: CacheStatus::Miss,
        })
    }

    /// Batched first; a transient batch failure falls back to individual
    /// calls with backoff. `batch_failure` is a batched attempt that already
    /// failed for this fingerprint.
    async fn embed(
        &self,
        fp: &Fingerprint,
        batch_failure: Option<EmbeddingError>,
    ) -> Result<Vector, QueryError> {
        if let Some(vector) = fp.embedding() {
            return Ok(vector.clone());
        }

        let batched = match batch_failure {
            Some(e) => Err(e),
            None => self.batcher.embed(fp.normalized()).await,
        };
        match batched {
            Ok(vector) => Ok(vector),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Batched embedding failed, retrying individually");
                self.retry
                    .run(|_| self.batcher.embed_unbatched(fp.normalized()))
                    .await
                    .map(|(vector, _)| vector)
                    .map_err(|(e, _)| e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn retrieve(&self, vector: &Vector) -> Result<Vec<Document>, QueryError> {
        let started = Instant::now();
        let timeout = self.pool.config().acquire_timeout;
        let top_k = self.top_k;

        let result = self
            .retry
            .run(|_| {
                let store = Arc::clone(self.pool.store());
                let vector = vector.clone();
                self.pool.with_connection(timeout, move |conn| async move {
                    store.query(&conn, &vector, top_k).await
                })
            })
            .await;

        let (ok, attempts) = match &result {
            Ok((_, attempts)) => (true, *attempts),
            Err((_, attempts)) => (false, *attempts),
        };
        self.monitor.record(MetricEvent::VectorQuery {
            latency: started.elapsed(),
            attempts,
            ok,
        });
        debug!(attempts, ok, "Vector query finished");

        result.map(|(docs, _)| docs).map_err(|(e, _)| e.into())
    }

    async fn answer(&self, query: &str, documents: &[Document]) -> Result<String, QueryError> {
        if documents.is_empty() {
            debug!("No documents retrieved, skipping generation");
            return Ok(NO_RESULTS_ANSWER.to_string());
        }

        let prompt = build_prompt(query, documents);
        let started = Instant::now();
        let result = self.retry.run(|_| self.generator.generate(&prompt)).await;
        self.monitor.record(MetricEvent::Generation {
            latency: started.elapsed(),
            ok: result.is_ok(),
        });

        result.map(|(answer, _)| answer).map_err(|(e, _)| e.into())
    }
}

/// Clears the in-flight entry for `key` when its computation task ends,
/// including by panic or abort.
struct FlightGuard<S: VectorStore> {
    inner: Arc<ServiceInner<S>>,
    key: CacheKey,
}

impl<S: VectorStore> Drop for FlightGuard<S> {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.key);
    }
}

/// Cheaply cloneable handle to the query service.
pub struct QueryService<S: VectorStore> {
    inner: Arc<ServiceInner<S>>,
}

impl<S: VectorStore> Clone for QueryService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: VectorStore> QueryService<S> {
    pub fn from_parts(parts: ServiceParts<S>) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                resolver: parts.resolver,
                cache: parts.cache,
                batcher: parts.batcher,
                pool: parts.pool,
                generator: parts.generator,
                monitor: parts.monitor,
                retry: parts.retry,
                top_k: parts.top_k.max(1),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Wires every component from `config`. Must be called inside a Tokio
    /// runtime (the batcher spawns its worker).
    pub fn build(
        config: &Config,
        store: Arc<S>,
        provider: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
        clock: SharedClock,
    ) -> Self {
        let monitor = PerformanceMonitor::new(config.alerts, clock.clone());
        let cache = ResultCacheHandle::new(config.result_cache, clock.clone());
        let batcher = EmbeddingBatcher::spawn(
            provider,
            config.batcher,
            config.embedding_cache,
            clock.clone(),
            monitor.clone(),
        );
        let pool = ConnectionPool::new(store, config.pool, clock, monitor.clone());

        Self::from_parts(ServiceParts {
            resolver: FingerprintResolver::new(config.max_query_len),
            cache,
            batcher,
            pool,
            generator,
            monitor,
            retry: config.retry,
            top_k: config.top_k,
        })
    }

    /// Answers `query`, from the result cache when possible.
    #[instrument(skip(self, query), fields(query_len = query.len(), cache = tracing::field::Empty))]
    pub async fn handle(&self, query: &str) -> Result<QueryResponse, QueryError> {
        let started = Instant::now();
        let result = self.serve(query).await;

        match &result {
            Ok(response) => {
                tracing::Span::current()
                    .record("cache", response.cache_status.as_header_value());
            }
            Err(e) if e.is_invalid_input() => {
                debug!(error = %e, "Rejected query");
                return result;
            }
            Err(e) => warn!(error = %e, "Query failed"),
        }

        self.inner.monitor.record(MetricEvent::Request {
            latency: started.elapsed(),
            ok: result.is_ok(),
            served_from_cache: result.as_ref().is_ok_and(|r| r.served_from_cache),
        });
        result
    }

    async fn serve(&self, query: &str) -> Result<QueryResponse, QueryError> {
        let inner = &self.inner;
        let fp = inner.resolver.resolve(query)?;

        let lookup_started = Instant::now();
        if let Some(hit) = inner.cache.lookup_exact(&fp) {
            inner.record_lookup(LookupOutcome::Exact, lookup_started);
            return Ok(QueryResponse::from_hit(hit));
        }

        let key = *fp.key();
        let flight = {
            let mut in_flight = inner.in_flight.lock();
            match in_flight.get(&key) {
                Some(flight) => {
                    debug!(key = %fp.short_key(), "Joining in-flight computation");
                    flight.clone()
                }
                None => {
                    // Detached: dropping every caller does not cancel it.
                    // The guard needs this lock, so removal follows the insert.
                    let guard = FlightGuard {
                        inner: Arc::clone(inner),
                        key,
                    };
                    let task = tokio::spawn(
                        async move {
                            let result = guard.inner.compute(&fp, lookup_started).await;
                            drop(guard);
                            result
                        }
                        .in_current_span(),
                    );
                    let flight = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(QueryError::Internal {
                                reason: format!("query computation did not finish: {}", e),
                            })
                        })
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key, flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Drops every cached answer; returns how many were removed.
    pub fn clear_cache(&self) -> usize {
        let removed = self.inner.cache.invalidate_all();
        info!(removed, "Result cache cleared");
        removed
    }

    pub fn clear_embedding_cache(&self) {
        self.inner.batcher.clear_cache();
        info!("Embedding cache cleared");
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    pub fn batcher_stats(&self) -> BatcherStats {
        self.inner.batcher.stats()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.monitor.snapshot()
    }

    /// Prometheus text exposition, including current cache and pool sizes.
    pub fn metrics_text(&self) -> String {
        let cache = self.inner.cache.stats();
        let pool = self.inner.pool.stats();
        let batcher = self.inner.batcher.stats();

        self.inner.monitor.render_prometheus(&[
            ("result_cache_entries", cache.size as f64),
            ("result_cache_hit_rate", cache.hit_rate),
            ("embedding_cache_entries", batcher.cache_size as f64),
            ("pool_active", pool.active as f64),
            ("pool_idle", pool.idle as f64),
            ("pool_unhealthy", pool.unhealthy as f64),
            ("pool_max_size", pool.max_size as f64),
            ("pool_utilization", pool.utilization),
        ])
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.inner.monitor.check_alerts()
    }

    /// Pre-computes query embeddings so the first similarity lookup for each
    /// of `queries` skips the provider.
    pub async fn warm<I, T>(&self, queries: I) -> WarmReport
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let normalized: Vec<String> = queries
            .into_iter()
            .map(|q| normalize_query(q.as_ref()))
            .filter(|q| !q.is_empty())
            .collect();
        self.inner.batcher.warm(normalized).await
    }

    /// Removes expired entries from both caches.
    pub fn sweep_caches(&self) -> SweepReport {
        SweepReport {
            results: self.inner.cache.sweep_expired(),
            embeddings: self.inner.batcher.sweep_expired(),
        }
    }

    pub async fn run_health_check(&self) -> HealthReport {
        self.inner.pool.run_health_check().await
    }

    /// Number of distinct keys currently being computed.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    pub fn cache(&self) -> &ResultCacheHandle {
        &self.inner.cache
    }

    pub fn batcher(&self) -> &EmbeddingBatcher {
        &self.inner.batcher
    }

    pub fn pool(&self) -> &ConnectionPool<S> {
        &self.inner.pool
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.inner.monitor
    }

    /// Stops the batcher (flushing pending work) and closes the pool.
    pub async fn shutdown(&self) {
        self.inner.batcher.shutdown().await;
        self.inner.pool.close();
        info!("Query service stopped");
    }
}

impl<S: VectorStore> std::fmt::Debug for QueryService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService")
            .field("cache", &*self.inner.cache)
            .field("batcher", &self.inner.batcher)
            .field("pool", &self.inner.pool)
            .field("top_k", &self.inner.top_k)
            .finish_non_exhaustive()
    }
}
