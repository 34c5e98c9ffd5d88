//! Embedding batcher: coalesces concurrent `embed` calls into provider batches.
//!
//! Callers check the text cache, then enqueue over an mpsc channel and wait on
//! a oneshot reply. A single worker task owns the pending window and flushes it
//! when it holds `batch_size` distinct texts or `flush_delay` after its first
//! request, whichever comes first. Each flush runs as its own task so a slow
//! provider call never delays the next window.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::cache::EmbeddingCache;
use super::error::EmbeddingError;
use super::provider::EmbeddingProvider;
use super::Vector;
use crate::clock::SharedClock;
use crate::constants::{
    DEFAULT_BATCH_FLUSH_DELAY, DEFAULT_BATCH_SIZE, DEFAULT_EMBEDDING_MAX_ENTRIES,
    DEFAULT_EMBEDDING_TTL,
};
use crate::fingerprint::QueryEmbedder;
use crate::monitor::{MetricEvent, PerformanceMonitor};

/// Batch window settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Distinct texts that trigger an immediate flush.
    pub batch_size: usize,
    /// Maximum time the first request of a window waits.
    pub flush_delay: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_delay: DEFAULT_BATCH_FLUSH_DELAY,
        }
    }
}

/// Embedding cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingCacheConfig {
    pub max_entries: u64,
    pub ttl: Duration,
}

impl Default for EmbeddingCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_EMBEDDING_MAX_ENTRIES,
            ttl: DEFAULT_EMBEDDING_TTL,
        }
    }
}

/// Point-in-time batcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct BatcherStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_size: u64,
    pub hit_rate: f64,
    pub batches_flushed: u64,
    pub batches_failed: u64,
    pub embeddings_created: u64,
    pub deduplicated: u64,
    pub unbatched_calls: u64,
}

/// Outcome of [`EmbeddingBatcher::warm`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct WarmReport {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
}

type Reply = oneshot::Sender<Result<Vector, EmbeddingError>>;

struct EmbedRequest {
    text: String,
    reply: Reply,
}

/// Pending window: distinct texts in arrival order, each with its waiters.
#[derive(Default)]
struct Window {
    order: Vec<String>,
    waiters: HashMap<String, Vec<Reply>>,
}

impl Window {
    /// Adds a request; returns `true` if its text was already pending.
    fn push(&mut self, request: EmbedRequest) -> bool {
        match self.waiters.entry(request.text) {
            Entry::Occupied(mut e) => {
                e.get_mut().push(request.reply);
                true
            }
            Entry::Vacant(e) => {
                self.order.push(e.key().clone());
                e.insert(vec![request.reply]);
                false
            }
        }
    }

    fn distinct(&self) -> usize {
        self.order.len()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Default)]
struct Counters {
    batches_flushed: AtomicU64,
    batches_failed: AtomicU64,
    embeddings_created: AtomicU64,
    deduplicated: AtomicU64,
    unbatched_calls: AtomicU64,
}

/// State shared between callers, the worker, and flush tasks.
struct Shared {
    provider: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
    monitor: PerformanceMonitor,
    counters: Counters,
    config: BatcherConfig,
}

impl Shared {
    fn validate(
        &self,
        expected: usize,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Vec<Vector>, EmbeddingError> {
        if vectors.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                actual: vectors.len(),
            });
        }
        if vectors.iter().any(Vec::is_empty) {
            return Err(EmbeddingError::EmptyVector);
        }
        Ok(vectors.into_iter().map(Vector::from).collect())
    }

    async fn flush(self: Arc<Self>, window: Window) {
        let Window { order, mut waiters } = window;
        let size = order.len();
        let started = Instant::now();

        let result = self
            .provider
            .embed_batch(&order)
            .await
            .and_then(|vectors| self.validate(size, vectors));
        let latency = started.elapsed();
        let ok = result.is_ok();

        match result {
            Ok(vectors) => {
                self.counters.batches_flushed.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .embeddings_created
                    .fetch_add(size as u64, Ordering::Relaxed);

                for (text, vector) in order.iter().zip(vectors) {
                    self.cache.insert(text, vector.clone());
                    for reply in waiters.remove(text).unwrap_or_default() {
                        let _ = reply.send(Ok(vector.clone()));
                    }
                }
                debug!(batch_size = size, latency_ms = latency.as_millis() as u64, "Batch flushed");
            }
            Err(e) => {
                self.counters.batches_failed.fetch_add(1, Ordering::Relaxed);
                warn!(batch_size = size, error = %e, "Batch failed, failing all waiters");
                for reply in waiters.into_values().flatten() {
                    let _ = reply.send(Err(e.clone()));
                }
            }
        }

        self.monitor.record(MetricEvent::EmbeddingBatch {
            size,
            latency,
            ok,
        });
    }
}

async fn worker_loop(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<EmbedRequest>) {
    let mut window = Window::default();
    let mut deadline: Option<Instant> = None;
    let mut in_flight = JoinSet::new();

    loop {
        let sleep = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));

        tokio::select! {
            received = rx.recv() => match received {
                Some(request) => {
                    if window.is_empty() {
                        deadline = Some(Instant::now() + shared.config.flush_delay);
                    }
                    if window.push(request) {
                        shared.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
                    }
                    if window.distinct() >= shared.config.batch_size {
                        in_flight.spawn(shared.clone().flush(std::mem::take(&mut window)));
                        deadline = None;
                    }
                }
                None => break,
            },

            _ = sleep, if deadline.is_some() => {
                in_flight.spawn(shared.clone().flush(std::mem::take(&mut window)));
                deadline = None;
            }

            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
        }
    }

    if !window.is_empty() {
        in_flight.spawn(shared.clone().flush(window));
    }
    while in_flight.join_next().await.is_some() {}
    debug!("Embedding batch worker drained");
}

/// Batching, caching front end for an [`EmbeddingProvider`].
#[derive(Clone)]
pub struct EmbeddingBatcher {
    shared: Arc<Shared>,
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<EmbedRequest>>>>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EmbeddingBatcher {
    /// Creates the batcher and spawns its worker. Must be called inside a Tokio runtime.
    pub fn spawn(
        provider: Arc<dyn EmbeddingProvider>,
        config: BatcherConfig,
        cache_config: EmbeddingCacheConfig,
        clock: SharedClock,
        monitor: PerformanceMonitor,
    ) -> Self {
        let cache = EmbeddingCache::new(
            provider.model(),
            cache_config.max_entries,
            cache_config.ttl,
            clock,
        );
        let shared = Arc::new(Shared {
            provider,
            cache,
            monitor,
            counters: Counters::default(),
            config: BatcherConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(worker_loop(shared.clone(), rx));

        info!(
            batch_size = shared.config.batch_size,
            flush_delay_ms = shared.config.flush_delay.as_millis() as u64,
            "Embedding batcher started"
        );

        Self {
            shared,
            sender: Arc::new(Mutex::new(Some(tx))),
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// Returns the embedding for `text`, from cache or through the next batch.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn embed(&self, text: &str) -> Result<Vector, EmbeddingError> {
        if let Some(vector) = self.cached(text) {
            return Ok(vector);
        }

        let (reply, wait) = oneshot::channel();
        {
            let sender = self.sender.lock();
            let sender = sender.as_ref().ok_or(EmbeddingError::ShutDown)?;
            sender
                .send(EmbedRequest {
                    text: text.to_string(),
                    reply,
                })
                .map_err(|_| EmbeddingError::ShutDown)?;
        }

        wait.await.map_err(|_| EmbeddingError::ShutDown)?
    }

    /// Embeds `text` with a dedicated single-text provider call.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn embed_unbatched(&self, text: &str) -> Result<Vector, EmbeddingError> {
        if let Some(vector) = self.cached(text) {
            return Ok(vector);
        }

        self.shared
            .counters
            .unbatched_calls
            .fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let result = self
            .shared
            .provider
            .embed_batch(&[text.to_string()])
            .await
            .and_then(|vectors| self.shared.validate(1, vectors));
        self.shared.monitor.record(MetricEvent::EmbeddingBatch {
            size: 1,
            latency: started.elapsed(),
            ok: result.is_ok(),
        });

        let vector = result?
            .pop()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                actual: 0,
            })?;
        self.shared
            .counters
            .embeddings_created
            .fetch_add(1, Ordering::Relaxed);
        self.shared.cache.insert(text, vector.clone());
        Ok(vector)
    }

    /// Pre-computes embeddings for `texts`. Failures are counted, not returned.
    pub async fn warm<I, S>(&self, texts: I) -> WarmReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let texts: Vec<S> = texts.into_iter().collect();
        let results = join_all(texts.iter().map(|t| self.embed(t.as_ref()))).await;

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let report = WarmReport {
            requested: results.len(),
            succeeded,
            failed: results.len() - succeeded,
        };
        info!(
            requested = report.requested,
            succeeded = report.succeeded,
            failed = report.failed,
            "Embedding cache warmed"
        );
        report
    }

    fn cached(&self, text: &str) -> Option<Vector> {
        let hit = self.shared.cache.get(text);
        self.shared.monitor.record(MetricEvent::EmbeddingCacheLookup {
            hit: hit.is_some(),
        });
        hit
    }

    /// Drops expired embeddings; returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.shared.cache.sweep_expired()
    }

    pub fn clear_cache(&self) {
        self.shared.cache.clear();
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.shared.cache
    }

    pub fn config(&self) -> BatcherConfig {
        self.shared.config
    }

    pub fn stats(&self) -> BatcherStats {
        let cache = &self.shared.cache;
        let counters = &self.shared.counters;
        let cache_hits = cache.hits();
        let cache_misses = cache.misses();
        let lookups = cache_hits + cache_misses;

        BatcherStats {
            cache_hits,
            cache_misses,
            cache_size: cache.len(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                cache_hits as f64 / lookups as f64
            },
            batches_flushed: counters.batches_flushed.load(Ordering::Relaxed),
            batches_failed: counters.batches_failed.load(Ordering::Relaxed),
            embeddings_created: counters.embeddings_created.load(Ordering::Relaxed),
            deduplicated: counters.deduplicated.load(Ordering::Relaxed),
            unbatched_calls: counters.unbatched_calls.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting requests, flushes the pending window, and waits for
    /// every in-flight batch to finish. Idempotent.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Embedding batch worker panicked");
            }
            info!("Embedding batcher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }
}

impl QueryEmbedder for EmbeddingBatcher {
    async fn embed_query(&self, text: &str) -> Result<Vector, EmbeddingError> {
        self.embed(text).await
    }
}

impl std::fmt::Debug for EmbeddingBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingBatcher")
            .field("provider", &self.shared.provider)
            .field("config", &self.shared.config)
            .field("running", &self.is_running())
            .finish()
    }
}
