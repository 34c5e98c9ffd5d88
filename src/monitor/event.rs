use std::time::{Duration, Instant};

/// How a result cache lookup was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LookupOutcome {
    Exact,
    Similar,
    Miss,
}

impl LookupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupOutcome::Exact => "exact",
            LookupOutcome::Similar => "similar",
            LookupOutcome::Miss => "miss",
        }
    }

    pub fn is_hit(&self) -> bool {
        !matches!(self, LookupOutcome::Miss)
    }
}

/// How a pool checkout ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AcquireOutcome {
    Acquired,
    Exhausted,
    Failed,
}

impl AcquireOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquireOutcome::Acquired => "acquired",
            AcquireOutcome::Exhausted => "exhausted",
            AcquireOutcome::Failed => "failed",
        }
    }
}

/// Something worth counting, emitted by a pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    ResultCacheLookup {
        outcome: LookupOutcome,
        latency: Duration,
    },
    EmbeddingCacheLookup {
        hit: bool,
    },
    EmbeddingBatch {
        size: usize,
        latency: Duration,
        ok: bool,
    },
    PoolAcquire {
        wait: Duration,
        outcome: AcquireOutcome,
    },
    VectorQuery {
        latency: Duration,
        attempts: u32,
        ok: bool,
    },
    Generation {
        latency: Duration,
        ok: bool,
    },
    Request {
        latency: Duration,
        ok: bool,
        served_from_cache: bool,
    },
}

/// Counters accumulate; observations feed latency and size windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Count,
    Observe,
}

pub type Tags = Vec<(&'static str, &'static str)>;

/// One timestamped data point.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: &'static str,
    pub kind: SampleKind,
    pub value: f64,
    pub timestamp: Instant,
    pub tags: Tags,
}

pub(super) fn status(ok: bool) -> &'static str {
    if ok { "ok" } else { "error" }
}

fn ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

impl MetricEvent {
    /// Expands the event into the samples it contributes.
    pub fn into_samples(self, timestamp: Instant) -> Vec<MetricSample> {
        let count = |name, tags| MetricSample {
            name,
            kind: SampleKind::Count,
            value: 1.0,
            timestamp,
            tags,
        };
        let observe = |name, value| MetricSample {
            name,
            kind: SampleKind::Observe,
            value,
            timestamp,
            tags: Vec::new(),
        };

        match self {
            MetricEvent::ResultCacheLookup { outcome, latency } => vec![
                count("result_cache_lookups", vec![("outcome", outcome.as_str())]),
                observe("result_cache_latency_ms", ms(latency)),
            ],
            MetricEvent::EmbeddingCacheLookup { hit } => vec![count(
                "embedding_cache_lookups",
                vec![("outcome", if hit { "hit" } else { "miss" })],
            )],
            MetricEvent::EmbeddingBatch { size, latency, ok } => vec![
                count("embedding_batches", vec![("status", status(ok))]),
                observe("embedding_batch_size", size as f64),
                observe("embedding_latency_ms", ms(latency)),
            ],
            MetricEvent::PoolAcquire { wait, outcome } => vec![
                count("pool_acquires", vec![("outcome", outcome.as_str())]),
                observe("pool_wait_ms", ms(wait)),
            ],
            MetricEvent::VectorQuery {
                latency,
                attempts,
                ok,
            } => vec![
                count("vector_queries", vec![("status", status(ok))]),
                observe("vector_query_attempts", attempts as f64),
                observe("vector_query_latency_ms", ms(latency)),
            ],
            MetricEvent::Generation { latency, ok } => vec![
                count("generations", vec![("status", status(ok))]),
                observe("generation_latency_ms", ms(latency)),
            ],
            MetricEvent::Request {
                latency,
                ok,
                served_from_cache,
            } => vec![
                count(
                    "requests",
                    vec![
                        ("source", if served_from_cache { "cache" } else { "computed" }),
                        ("status", status(ok)),
                    ],
                ),
                observe("request_latency_ms", ms(latency)),
            ],
        }
    }
}
