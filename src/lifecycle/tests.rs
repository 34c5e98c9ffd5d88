use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::clock::ManualClock;
use crate::config::Config;
use crate::embedding::MockEmbeddingProvider;
use crate::generation::MockGenerator;
use crate::pool::ReleaseOutcome;
use crate::vectordb::MockVectorStore;

fn service_with(
    clock: Arc<ManualClock>,
) -> (QueryService<MockVectorStore>, Arc<MockVectorStore>) {
    let mut config = Config::default();
    config.batcher.flush_delay = Duration::from_millis(1);
    let store = Arc::new(MockVectorStore::new());
    let service = QueryService::build(
        &config,
        Arc::clone(&store),
        Arc::new(MockEmbeddingProvider::new()),
        Arc::new(MockGenerator::new()),
        clock,
    );
    (service, store)
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_sweeper_removes_expired_answers() {
    let clock = ManualClock::shared();
    let (service, _store) = service_with(clock.clone());
    service.handle("Summarize HB1").await.unwrap();
    assert_eq!(service.cache_stats().size, 1);

    let tasks = MaintenanceTasks::start(&service, Duration::from_millis(10), Duration::from_secs(60));
    clock.advance(Duration::from_secs(31 * 60));

    assert!(wait_until(|| service.cache_stats().size == 0).await);
    tasks.stop().await;
}

#[tokio::test]
async fn test_health_checker_recovers_unhealthy_slots() {
    let clock = ManualClock::shared();
    let (service, store) = service_with(clock);
    service
        .pool()
        .get()
        .await
        .unwrap()
        .release(ReleaseOutcome::Failure);
    assert_eq!(service.pool_stats().unhealthy, 1);

    let tasks = MaintenanceTasks::start(&service, Duration::from_secs(60), Duration::from_millis(10));

    assert!(wait_until(|| service.pool_stats().unhealthy == 0).await);
    assert_eq!(service.pool_stats().idle, 1);
    assert!(store.health_check_count() >= 1);
    tasks.stop().await;
}

#[tokio::test]
async fn test_stop_is_prompt_and_idempotent() {
    let (service, _store) = service_with(ManualClock::shared());
    let tasks = MaintenanceTasks::start(&service, Duration::from_secs(3600), Duration::from_secs(3600));
    assert!(tasks.is_running());

    tokio::time::timeout(Duration::from_secs(1), tasks.stop())
        .await
        .expect("stop should not wait for the next tick");
    assert!(!tasks.is_running());

    tasks.stop().await;
}
