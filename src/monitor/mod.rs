//! Performance monitor: a passive observer of the query pipeline.
//!
//! [`PerformanceMonitor::record`] updates the Prometheus recorder and pushes
//! onto a bounded queue, so a request never waits on a reader. Queued events
//! are folded into counters and rolling windows (1 min and 5 min) whenever a
//! reader asks for a snapshot or alerts, or by the recording task itself once
//! the queue is full.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

mod alerts;
mod event;
mod prometheus;

pub use alerts::{Alert, AlertKind, AlertThresholds, Severity};
pub use event::{AcquireOutcome, LookupOutcome, MetricEvent, MetricSample, SampleKind, Tags};

use crate::clock::SharedClock;
use prometheus::PrometheusExporter;

/// Short rolling window, used for request rate.
pub const SHORT_WINDOW: Duration = Duration::from_secs(60);
/// Long rolling window, used for percentiles, ratios, and alerts.
pub const LONG_WINDOW: Duration = Duration::from_secs(5 * 60);
/// Samples kept per series regardless of age.
pub const MAX_WINDOW_SAMPLES: usize = 10_000;
/// Events buffered between readers before the recording task folds them in.
pub const EVENT_QUEUE_CAPACITY: usize = 4_096;

/// Windowed latency (or size) distribution for one series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: usize,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl LatencySummary {
    fn from_values(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by(f64::total_cmp);
        let count = values.len();
        let sum: f64 = values.iter().sum();
        Self {
            count,
            avg: sum / count as f64,
            p50: percentile(&values, 0.50),
            p95: percentile(&values, 0.95),
            p99: percentile(&values, 0.99),
            max: values[count - 1],
        }
    }
}

/// Nearest-rank percentile of an ascending, non-empty slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Point-in-time view of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub requests_total: u64,
    pub errors_total: u64,
    pub served_from_cache_total: u64,
    /// Requests per second over the short window.
    pub requests_per_second: f64,
    /// Failed share of requests over the long window.
    pub error_rate: f64,
    pub result_cache_exact_hits: u64,
    pub result_cache_similar_hits: u64,
    pub result_cache_misses: u64,
    /// Result cache hit rate over the long window.
    pub result_cache_hit_rate: f64,
    /// Embedding cache hit rate over the long window.
    pub embedding_cache_hit_rate: f64,
    /// Timed-out share of pool checkouts over the long window.
    pub pool_exhaustion_rate: f64,
    pub embedding_batches_total: u64,
    pub embedding_batches_failed: u64,
    /// Per-series distributions over the long window (`*_ms` series are milliseconds).
    pub stages: BTreeMap<&'static str, LatencySummary>,
}

fn has_tag(tags: &Tags, (key, value): (&str, &str)) -> bool {
    tags.iter().any(|(k, v)| *k == key && *v == value)
}

#[derive(Debug, Default)]
struct Series {
    window: VecDeque<(Instant, f64)>,
}

#[derive(Debug)]
struct State {
    started: Instant,
    counters: BTreeMap<(&'static str, Tags), u64>,
    recent_counts: VecDeque<MetricSample>,
    series: BTreeMap<&'static str, Series>,
}

impl State {
    fn new(started: Instant) -> Self {
        Self {
            started,
            counters: BTreeMap::new(),
            recent_counts: VecDeque::new(),
            series: BTreeMap::new(),
        }
    }

    fn apply(&mut self, sample: MetricSample) {
        match sample.kind {
            SampleKind::Count => {
                *self
                    .counters
                    .entry((sample.name, sample.tags.clone()))
                    .or_default() += sample.value as u64;
                self.recent_counts.push_back(sample);
                if self.recent_counts.len() > MAX_WINDOW_SAMPLES * 4 {
                    self.recent_counts.pop_front();
                }
            }
            SampleKind::Observe => {
                let series = self.series.entry(sample.name).or_default();
                series.window.push_back((sample.timestamp, sample.value));
                if series.window.len() > MAX_WINDOW_SAMPLES {
                    series.window.pop_front();
                }
            }
        }
    }

    fn trim(&mut self, now: Instant) {
        let expired = |t: Instant| now.saturating_duration_since(t) > LONG_WINDOW;
        while self
            .recent_counts
            .front()
            .is_some_and(|s| expired(s.timestamp))
        {
            self.recent_counts.pop_front();
        }
        for series in self.series.values_mut() {
            while series.window.front().is_some_and(|(t, _)| expired(*t)) {
                series.window.pop_front();
            }
        }
    }

    fn total(&self, name: &str, tag: Option<(&str, &str)>) -> u64 {
        self.counters
            .iter()
            .filter(|((n, tags), _)| *n == name && tag.is_none_or(|t| has_tag(tags, t)))
            .map(|(_, v)| *v)
            .sum()
    }

    fn windowed(&self, name: &str, since: Instant, tag: Option<(&str, &str)>) -> u64 {
        self.recent_counts
            .iter()
            .filter(|s| {
                s.name == name
                    && s.timestamp >= since
                    && tag.is_none_or(|t| has_tag(&s.tags, t))
            })
            .count() as u64
    }

    /// `part / whole` over the long window, `None` when `whole` is below `min`.
    fn windowed_ratio(
        &self,
        name: &str,
        now: Instant,
        part: &[(&str, &str)],
        min: u64,
    ) -> Option<(f64, u64)> {
        let since = now.checked_sub(LONG_WINDOW).unwrap_or(self.started);
        let whole = self.windowed(name, since, None);
        if whole == 0 || whole < min {
            return None;
        }
        let part: u64 = part
            .iter()
            .map(|t| self.windowed(name, since, Some(*t)))
            .sum();
        Some((part as f64 / whole as f64, whole))
    }

    fn summary(&self, name: &str) -> LatencySummary {
        self.series
            .get(name)
            .map(|s| LatencySummary::from_values(s.window.iter().map(|(_, v)| *v).collect()))
            .unwrap_or_default()
    }
}

struct Inner {
    tx: mpsc::Sender<(Instant, MetricEvent)>,
    rx: Mutex<mpsc::Receiver<(Instant, MetricEvent)>>,
    state: Mutex<State>,
    exporter: PrometheusExporter,
    thresholds: AlertThresholds,
    clock: SharedClock,
}

/// Cheaply cloneable monitor handle.
#[derive(Clone)]
pub struct PerformanceMonitor {
    inner: Arc<Inner>,
}

impl PerformanceMonitor {
    pub fn new(thresholds: AlertThresholds, clock: SharedClock) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let started = clock.now();
        Self {
            inner: Arc::new(Inner {
                tx,
                rx: Mutex::new(rx),
                state: Mutex::new(State::new(started)),
                exporter: PrometheusExporter::new(),
                thresholds,
                clock,
            }),
        }
    }

    /// Records an event without waiting for a reader.
    pub fn record(&self, event: MetricEvent) {
        self.inner.exporter.emit(&event);

        if let Err(TrySendError::Full((at, event))) =
            self.inner.tx.try_send((self.inner.clock.now(), event))
        {
            let mut state = self.drain();
            for sample in event.into_samples(at) {
                state.apply(sample);
            }
        }
    }

    /// Events recorded but not yet folded into the windows.
    pub fn queued_events(&self) -> usize {
        self.inner.tx.max_capacity() - self.inner.tx.capacity()
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.inner.thresholds
    }

    fn drain(&self) -> parking_lot::MutexGuard<'_, State> {
        let mut state = self.inner.state.lock();
        {
            let mut rx = self.inner.rx.lock();
            while let Ok((at, event)) = rx.try_recv() {
                for sample in event.into_samples(at) {
                    state.apply(sample);
                }
            }
        }
        state.trim(self.inner.clock.now());
        state
    }

    /// Aggregates everything recorded so far.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = self.inner.clock.now();
        let state = self.drain();

        let uptime = now.saturating_duration_since(state.started);
        let short_since = now.checked_sub(SHORT_WINDOW).unwrap_or(state.started);
        let rate_span = uptime.min(SHORT_WINDOW).as_secs_f64();
        let recent_requests = state.windowed("requests", short_since, None);

        let ratio = |name, part: &[(&str, &str)]| {
            state
                .windowed_ratio(name, now, part, 0)
                .map(|(r, _)| r)
                .unwrap_or(0.0)
        };

        MetricsSnapshot {
            uptime_secs: uptime.as_secs_f64(),
            requests_total: state.total("requests", None),
            errors_total: state.total("requests", Some(("status", "error"))),
            served_from_cache_total: state.total("requests", Some(("source", "cache"))),
            requests_per_second: if rate_span > 0.0 {
                recent_requests as f64 / rate_span
            } else {
                0.0
            },
            error_rate: ratio("requests", &[("status", "error")]),
            result_cache_exact_hits: state.total("result_cache_lookups", Some(("outcome", "exact"))),
            result_cache_similar_hits: state
                .total("result_cache_lookups", Some(("outcome", "similar"))),
            result_cache_misses: state.total("result_cache_lookups", Some(("outcome", "miss"))),
            result_cache_hit_rate: ratio(
                "result_cache_lookups",
                &[("outcome", "exact"), ("outcome", "similar")],
            ),
            embedding_cache_hit_rate: ratio("embedding_cache_lookups", &[("outcome", "hit")]),
            pool_exhaustion_rate: ratio("pool_acquires", &[("outcome", "exhausted")]),
            embedding_batches_total: state.total("embedding_batches", None),
            embedding_batches_failed: state.total("embedding_batches", Some(("status", "error"))),
            stages: state
                .series
                .keys()
                .map(|name| (*name, state.summary(name)))
                .collect(),
        }
    }

    /// Compares the long window against the configured thresholds.
    pub fn check_alerts(&self) -> Vec<Alert> {
        let now = self.inner.clock.now();
        let thresholds = self.inner.thresholds;
        let state = self.drain();
        let mut alerts = Vec::new();

        if let Some((rate, _)) = state.windowed_ratio(
            "requests",
            now,
            &[("status", "error")],
            thresholds.min_samples,
        ) && rate > thresholds.max_error_rate
        {
            alerts.push(Alert::new(
                AlertKind::ErrorRate,
                rate,
                thresholds.max_error_rate,
                format!(
                    "Error rate ({:.2}%) above threshold ({:.2}%)",
                    rate * 100.0,
                    thresholds.max_error_rate * 100.0
                ),
            ));
        }

        let latency = state.summary("request_latency_ms");
        let limit_ms = thresholds.max_p95_latency.as_nanos() as f64 / 1_000_000.0;
        if latency.count as u64 >= thresholds.min_samples && latency.p95 > limit_ms {
            alerts.push(Alert::new(
                AlertKind::ResponseTime,
                latency.p95,
                limit_ms,
                format!(
                    "P95 response time ({:.0}ms) above threshold ({:.0}ms)",
                    latency.p95, limit_ms
                ),
            ));
        }

        if let Some((rate, _)) = state.windowed_ratio(
            "pool_acquires",
            now,
            &[("outcome", "exhausted")],
            thresholds.min_samples,
        ) && rate > thresholds.max_pool_exhaustion_rate
        {
            alerts.push(Alert::new(
                AlertKind::PoolExhaustion,
                rate,
                thresholds.max_pool_exhaustion_rate,
                format!(
                    "Pool exhaustion rate ({:.2}%) above threshold ({:.2}%)",
                    rate * 100.0,
                    thresholds.max_pool_exhaustion_rate * 100.0
                ),
            ));
        }

        if let Some((rate, _)) = state.windowed_ratio(
            "result_cache_lookups",
            now,
            &[("outcome", "exact"), ("outcome", "similar")],
            thresholds.min_samples,
        ) && rate < thresholds.min_cache_hit_rate
        {
            alerts.push(Alert::new(
                AlertKind::CachePerformance,
                rate,
                thresholds.min_cache_hit_rate,
                format!(
                    "Cache hit rate ({:.2}%) below threshold ({:.2}%)",
                    rate * 100.0,
                    thresholds.min_cache_hit_rate * 100.0
                ),
            ));
        }

        for alert in &alerts {
            warn!(kind = ?alert.kind, severity = ?alert.severity, value = alert.value, "{}", alert.message);
        }
        alerts
    }

    /// Renders every recorded series plus `gauges` in the Prometheus text
    /// exposition format.
    pub fn render_prometheus(&self, gauges: &[(&str, f64)]) -> String {
        self.inner.exporter.set_gauges(gauges);
        self.inner.exporter.render()
    }
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("thresholds", &self.inner.thresholds)
            .field("handles", &Arc::strong_count(&self.inner))
            .finish()
    }
}

#[cfg(test)]
mod tests;
