use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Limits that [`super::PerformanceMonitor::check_alerts`] compares against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    /// Highest tolerated share of failed requests.
    pub max_error_rate: f64,
    /// Highest tolerated P95 request latency.
    pub max_p95_latency: Duration,
    /// Highest tolerated share of pool checkouts that time out.
    pub max_pool_exhaustion_rate: f64,
    /// Lowest acceptable result cache hit rate.
    pub min_cache_hit_rate: f64,
    /// Rates are not judged on fewer samples than this.
    pub min_samples: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_error_rate: 0.05,
            max_p95_latency: Duration::from_millis(2_000),
            max_pool_exhaustion_rate: 0.05,
            min_cache_hit_rate: 0.7,
            min_samples: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ErrorRate,
    ResponseTime,
    PoolExhaustion,
    CachePerformance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// Advisory threshold breach.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    /// Builds an alert; a value at least twice as far from the threshold is critical.
    pub(crate) fn new(kind: AlertKind, value: f64, threshold: f64, message: String) -> Self {
        let critical = match kind {
            AlertKind::CachePerformance => value < threshold / 2.0,
            _ => value > threshold * 2.0,
        };
        Self {
            kind,
            severity: if critical {
                Severity::Critical
            } else {
                Severity::Warning
            },
            message,
            value,
            threshold,
            raised_at: Utc::now(),
        }
    }
}
