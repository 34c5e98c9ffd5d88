use std::time::Duration;

use super::*;
use crate::clock::ManualClock;

fn monitor_with(thresholds: AlertThresholds) -> (PerformanceMonitor, Arc<ManualClock>) {
    let clock = ManualClock::shared();
    (PerformanceMonitor::new(thresholds, clock.clone()), clock)
}

fn request(ms: u64, ok: bool, cached: bool) -> MetricEvent {
    MetricEvent::Request {
        latency: Duration::from_millis(ms),
        ok,
        served_from_cache: cached,
    }
}

fn lookup(outcome: LookupOutcome) -> MetricEvent {
    MetricEvent::ResultCacheLookup {
        outcome,
        latency: Duration::from_micros(50),
    }
}

#[test]
fn test_percentile_nearest_rank() {
    let values: Vec<f64> = (1..=100).map(f64::from).collect();
    assert_eq!(percentile(&values, 0.50), 50.0);
    assert_eq!(percentile(&values, 0.95), 95.0);
    assert_eq!(percentile(&values, 0.99), 99.0);
    assert_eq!(percentile(&[7.0], 0.99), 7.0);
}

#[test]
fn test_snapshot_counts_requests_and_cache_outcomes() {
    let (monitor, _clock) = monitor_with(AlertThresholds::default());

    monitor.record(request(10, true, false));
    monitor.record(request(2, true, true));
    monitor.record(request(30, false, false));
    monitor.record(lookup(LookupOutcome::Miss));
    monitor.record(lookup(LookupOutcome::Exact));
    monitor.record(lookup(LookupOutcome::Similar));
    monitor.record(lookup(LookupOutcome::Exact));

    let snap = monitor.snapshot();
    assert_eq!(snap.requests_total, 3);
    assert_eq!(snap.errors_total, 1);
    assert_eq!(snap.served_from_cache_total, 1);
    assert_eq!(snap.result_cache_exact_hits, 2);
    assert_eq!(snap.result_cache_similar_hits, 1);
    assert_eq!(snap.result_cache_misses, 1);
    assert!((snap.result_cache_hit_rate - 0.75).abs() < 1e-9);
    assert!((snap.error_rate - 1.0 / 3.0).abs() < 1e-9);

    let latency = snap.stages["request_latency_ms"];
    assert_eq!(latency.count, 3);
    assert_eq!(latency.max, 30.0);
    assert_eq!(latency.p50, 10.0);
}

#[test]
fn test_windows_roll_over_but_totals_do_not() {
    let (monitor, clock) = monitor_with(AlertThresholds::default());

    monitor.record(request(10, false, false));
    clock.advance(LONG_WINDOW + Duration::from_secs(1));
    monitor.record(request(10, true, false));

    let snap = monitor.snapshot();
    assert_eq!(snap.requests_total, 2);
    assert_eq!(snap.errors_total, 1);
    assert_eq!(snap.error_rate, 0.0);
    assert_eq!(snap.stages["request_latency_ms"].count, 1);
}

#[test]
fn test_requests_per_second_uses_short_window() {
    let (monitor, clock) = monitor_with(AlertThresholds::default());
    clock.advance(Duration::from_secs(120));

    for _ in 0..30 {
        monitor.record(request(1, true, false));
    }

    let snap = monitor.snapshot();
    assert!((snap.requests_per_second - 0.5).abs() < 1e-9);
}

#[test]
fn test_no_alerts_below_min_samples() {
    let (monitor, _clock) = monitor_with(AlertThresholds::default());
    for _ in 0..5 {
        monitor.record(request(10, false, false));
    }
    assert!(monitor.check_alerts().is_empty());
}

#[test]
fn test_error_rate_alert() {
    let (monitor, _clock) = monitor_with(AlertThresholds {
        min_samples: 10,
        ..Default::default()
    });

    for i in 0..10 {
        monitor.record(request(10, i >= 2, false));
    }

    let alerts = monitor.check_alerts();
    let alert = alerts
        .iter()
        .find(|a| a.kind == AlertKind::ErrorRate)
        .expect("error rate alert");
    assert!((alert.value - 0.2).abs() < 1e-9);
    assert_eq!(alert.severity, Severity::Critical);
}

#[test]
fn test_latency_alert_uses_p95() {
    let (monitor, _clock) = monitor_with(AlertThresholds {
        min_samples: 20,
        max_p95_latency: Duration::from_millis(100),
        ..Default::default()
    });

    for _ in 0..18 {
        monitor.record(request(10, true, false));
    }
    monitor.record(request(150, true, false));
    monitor.record(request(150, true, false));

    let alerts = monitor.check_alerts();
    let alert = alerts
        .iter()
        .find(|a| a.kind == AlertKind::ResponseTime)
        .expect("latency alert");
    assert_eq!(alert.value, 150.0);
    assert_eq!(alert.severity, Severity::Warning);
}

#[test]
fn test_cache_hit_rate_and_pool_exhaustion_alerts() {
    let (monitor, _clock) = monitor_with(AlertThresholds {
        min_samples: 4,
        ..Default::default()
    });

    monitor.record(lookup(LookupOutcome::Exact));
    for _ in 0..3 {
        monitor.record(lookup(LookupOutcome::Miss));
    }
    for outcome in [
        AcquireOutcome::Acquired,
        AcquireOutcome::Acquired,
        AcquireOutcome::Exhausted,
        AcquireOutcome::Acquired,
    ] {
        monitor.record(MetricEvent::PoolAcquire {
            wait: Duration::ZERO,
            outcome,
        });
    }

    let kinds: Vec<AlertKind> = monitor.check_alerts().iter().map(|a| a.kind).collect();
    assert!(kinds.contains(&AlertKind::CachePerformance));
    assert!(kinds.contains(&AlertKind::PoolExhaustion));
    assert!(!kinds.contains(&AlertKind::ErrorRate));
}

#[test]
fn test_prometheus_exposition_format() {
    let (monitor, _clock) = monitor_with(AlertThresholds::default());
    monitor.record(request(12, true, true));
    monitor.record(MetricEvent::EmbeddingBatch {
        size: 3,
        latency: Duration::from_millis(5),
        ok: true,
    });

    let text = monitor.render_prometheus(&[("pool_idle", 4.0)]);

    assert!(text.contains("# TYPE ragline_requests_total counter"));
    let requests = text
        .lines()
        .find(|l| l.starts_with("ragline_requests_total{"))
        .expect("request counter line");
    assert!(requests.contains("source=\"cache\""));
    assert!(requests.contains("status=\"ok\""));
    assert!(requests.ends_with(" 1"));
    assert!(text.contains("ragline_embedding_batches_total{status=\"ok\"} 1"));
    assert!(text.contains("ragline_request_duration_seconds_count 1"));
    assert!(text.contains("ragline_embedding_batch_size_sum 3"));
    assert!(text.contains("# TYPE ragline_pool_idle gauge"));
    assert!(text.contains("ragline_pool_idle 4"));
}

#[test]
fn test_monitors_do_not_share_series() {
    let (first, _) = monitor_with(AlertThresholds::default());
    let (second, _) = monitor_with(AlertThresholds::default());
    first.record(request(1, true, false));

    assert!(first.render_prometheus(&[]).contains("ragline_requests_total"));
    assert!(!second.render_prometheus(&[]).contains("ragline_requests_total"));
}

#[test]
fn test_unread_events_stay_bounded() {
    let (monitor, _clock) = monitor_with(AlertThresholds::default());

    for _ in 0..(EVENT_QUEUE_CAPACITY * 50) {
        monitor.record(request(1, true, false));
    }

    assert!(monitor.queued_events() <= EVENT_QUEUE_CAPACITY);
    let snap = monitor.snapshot();
    assert_eq!(snap.requests_total, (EVENT_QUEUE_CAPACITY * 50) as u64);
    assert_eq!(monitor.queued_events(), 0);
}

#[tokio::test]
async fn test_record_is_usable_from_many_tasks() {
    let (monitor, _clock) = monitor_with(AlertThresholds::default());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let monitor = monitor.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    monitor.record(MetricEvent::EmbeddingCacheLookup { hit: true });
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let snap = monitor.snapshot();
    assert_eq!(snap.embedding_cache_hit_rate, 1.0);
}
