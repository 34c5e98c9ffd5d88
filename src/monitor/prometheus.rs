//! Prometheus exposition through `metrics` and `metrics-exporter-prometheus`.
//!
//! Each monitor owns its own recorder, so several services (or tests) in one
//! process never share series.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use super::event::{MetricEvent, status};
use crate::constants::METRIC_PREFIX;

const REQUESTS: &str = "ragline_requests_total";
const REQUEST_DURATION: &str = "ragline_request_duration_seconds";
const RESULT_CACHE_LOOKUPS: &str = "ragline_result_cache_lookups_total";
const RESULT_CACHE_LOOKUP_DURATION: &str = "ragline_result_cache_lookup_duration_seconds";
const EMBEDDING_CACHE_LOOKUPS: &str = "ragline_embedding_cache_lookups_total";
const EMBEDDING_BATCHES: &str = "ragline_embedding_batches_total";
const EMBEDDING_BATCH_SIZE: &str = "ragline_embedding_batch_size";
const EMBEDDING_BATCH_DURATION: &str = "ragline_embedding_batch_duration_seconds";
const POOL_ACQUIRES: &str = "ragline_pool_acquires_total";
const POOL_WAIT: &str = "ragline_pool_wait_seconds";
const VECTOR_QUERIES: &str = "ragline_vector_queries_total";
const VECTOR_QUERY_ATTEMPTS: &str = "ragline_vector_query_attempts";
const VECTOR_QUERY_DURATION: &str = "ragline_vector_query_duration_seconds";
const GENERATIONS: &str = "ragline_generations_total";
const GENERATION_DURATION: &str = "ragline_generation_duration_seconds";

pub(super) struct PrometheusExporter {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl PrometheusExporter {
    pub(super) fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self { recorder, handle }
    }

    pub(super) fn emit(&self, event: &MetricEvent) {
        metrics::with_local_recorder(&self.recorder, || match *event {
            MetricEvent::ResultCacheLookup { outcome, latency } => {
                counter!(RESULT_CACHE_LOOKUPS, "outcome" => outcome.as_str()).increment(1);
                histogram!(RESULT_CACHE_LOOKUP_DURATION).record(latency.as_secs_f64());
            }
            MetricEvent::EmbeddingCacheLookup { hit } => {
                let outcome = if hit { "hit" } else { "miss" };
                counter!(EMBEDDING_CACHE_LOOKUPS, "outcome" => outcome).increment(1);
            }
            MetricEvent::EmbeddingBatch { size, latency, ok } => {
                counter!(EMBEDDING_BATCHES, "status" => status(ok)).increment(1);
                histogram!(EMBEDDING_BATCH_SIZE).record(size as f64);
                histogram!(EMBEDDING_BATCH_DURATION).record(latency.as_secs_f64());
            }
            MetricEvent::PoolAcquire { wait, outcome } => {
                counter!(POOL_ACQUIRES, "outcome" => outcome.as_str()).increment(1);
                histogram!(POOL_WAIT).record(wait.as_secs_f64());
            }
            MetricEvent::VectorQuery {
                latency,
                attempts,
                ok,
            } => {
                counter!(VECTOR_QUERIES, "status" => status(ok)).increment(1);
                histogram!(VECTOR_QUERY_ATTEMPTS).record(f64::from(attempts));
                histogram!(VECTOR_QUERY_DURATION).record(latency.as_secs_f64());
            }
            MetricEvent::Generation { latency, ok } => {
                counter!(GENERATIONS, "status" => status(ok)).increment(1);
                histogram!(GENERATION_DURATION).record(latency.as_secs_f64());
            }
            MetricEvent::Request {
                latency,
                ok,
                served_from_cache,
            } => {
                let source = if served_from_cache { "cache" } else { "computed" };
                counter!(REQUESTS, "source" => source, "status" => status(ok)).increment(1);
                histogram!(REQUEST_DURATION).record(latency.as_secs_f64());
            }
        });
    }

    /// Sets point-in-time gauges; names get the crate metric prefix.
    pub(super) fn set_gauges(&self, gauges: &[(&str, f64)]) {
        metrics::with_local_recorder(&self.recorder, || {
            for (name, value) in gauges {
                gauge!(format!("{}_{}", METRIC_PREFIX, name)).set(*value);
            }
        });
    }

    pub(super) fn render(&self) -> String {
        self.handle.render()
    }
}
