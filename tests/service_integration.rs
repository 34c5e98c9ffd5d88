//! Service-level integration tests against in-memory backends.

mod common;

use std::time::Duration;

use futures_util::future::join_all;
use ragline::cache::CacheStatus;
use ragline::lifecycle::MaintenanceTasks;
use ragline::service::QueryError;

use common::harness::{TestStack, axis, test_config};

#[tokio::test]
async fn test_concurrent_identical_queries_compute_once() {
    let stack = TestStack::new(test_config()).with_hb1();
    stack.generator.set_latency(Duration::from_millis(50));

    let results = join_all((0..50).map(|_| {
        let service = stack.service.clone();
        async move { service.handle("Summarize HB1").await }
    }))
    .await;

    for result in &results {
        let response = result.as_ref().expect("every query should succeed");
        assert_eq!(response.answer, "Mock response for: summarize hb1");
        assert_eq!(response.documents_found, 1);
    }
    assert_eq!(stack.provider.texts_embedded(), 1);
    assert_eq!(stack.store.query_count(), 1);
    assert_eq!(stack.generator.call_count(), 1);
    assert_eq!(stack.service.cache_stats().size, 1);
    assert_eq!(stack.service.in_flight(), 0);
}

#[tokio::test]
async fn test_near_duplicate_query_hits_similarity_cache() {
    let stack = TestStack::new(test_config()).with_hb1();
    let mut close = axis(0);
    close[1] = 0.3;
    stack.provider.set_vector("give me a summary of hb1", close);

    stack.service.handle("Summarize HB1").await.unwrap();
    let hit = stack.service.handle("Give me a summary of HB1").await.unwrap();

    assert_eq!(hit.cache_status, CacheStatus::HitSimilar);
    assert!(hit.served_from_cache);
    assert_eq!(hit.answer, "Mock response for: summarize hb1");
    assert_eq!(stack.generator.call_count(), 1);
}

#[tokio::test]
async fn test_pool_never_exceeds_max_size() {
    let mut config = test_config();
    config.pool.max_size = 3;
    config.pool.acquire_timeout = Duration::from_secs(5);
    config.result_cache.similarity_threshold = None;
    let stack = TestStack::new(config);
    stack.store.set_latency(Duration::from_millis(20));

    let queries: Vec<String> = (0..12).map(|i| format!("distinct topic {i}")).collect();
    let results = join_all(queries.iter().map(|q| {
        let service = stack.service.clone();
        async move { service.handle(q).await }
    }))
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(stack.store.query_count(), 12);
    assert!(stack.store.connect_count() <= 3);

    let stats = stack.service.pool_stats();
    assert!(stats.created <= 3);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.exhausted, 0);
}

#[tokio::test]
async fn test_poisoned_text_does_not_sink_batch_neighbours() {
    let stack = TestStack::new(test_config());
    stack.provider.poison("unembeddable query");

    let service = stack.service.clone();
    let (good, bad) = tokio::join!(
        service.handle("ordinary query"),
        service.handle("unembeddable query"),
    );

    assert!(good.is_ok());
    match bad {
        Err(QueryError::UpstreamUnavailable { component, .. }) => {
            assert_eq!(component, "embedding provider")
        }
        other => panic!("Expected embedding outage, got {:?}", other),
    }
    assert!(stack.service.batcher_stats().batches_failed >= 1);
}

#[tokio::test]
async fn test_batch_failure_fails_every_waiter() {
    let stack = TestStack::new(test_config());
    stack.provider.poison("bad text");
    let batcher = stack.service.batcher();

    let (good, bad) = tokio::join!(batcher.embed("good text"), batcher.embed("bad text"));

    assert!(good.is_err());
    assert!(bad.is_err());
    assert_eq!(stack.provider.batches().len(), 1);
    assert_eq!(batcher.stats().batches_failed, 1);
}

#[tokio::test]
async fn test_store_outage_recovers_through_health_check() {
    let stack = TestStack::new(test_config()).with_hb1();
    stack.store.fail_next_queries(1);

    let response = stack.service.handle("Summarize HB1").await.unwrap();
    assert_eq!(response.documents_found, 1);
    assert_eq!(stack.service.pool_stats().unhealthy, 1);

    let tasks = MaintenanceTasks::start(
        &stack.service,
        Duration::from_secs(60),
        Duration::from_millis(10),
    );
    tokio::time::timeout(Duration::from_secs(2), async {
        while stack.service.pool_stats().unhealthy > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("health checker should recover the slot");
    tasks.stop().await;

    let stats = stack.service.pool_stats();
    assert_eq!(stats.recovered, 1);
    assert_eq!(stats.idle, 2);
}

#[tokio::test]
async fn test_shutdown_rejects_new_work() {
    let stack = TestStack::new(test_config()).with_hb1();
    stack.service.handle("Summarize HB1").await.unwrap();

    stack.service.shutdown().await;

    let cached = stack.service.handle("summarize hb1").await.unwrap();
    assert!(cached.served_from_cache);

    let err = stack.service.handle("a brand new query").await.unwrap_err();
    assert!(matches!(err, QueryError::UpstreamUnavailable { .. }));
}
