//! Periodic maintenance: expired-entry sweeps and pool health checks.
//!
//! Each job runs on its own Tokio interval and stops at the next tick (or
//! immediately, via a wake-up) once [`MaintenanceTasks::stop`] is called.

#[cfg(test)]
mod tests;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::service::QueryService;
use crate::vectordb::VectorStore;

/// Handles to the background maintenance jobs.
pub struct MaintenanceTasks {
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl MaintenanceTasks {
    /// Starts the cache sweeper and the pool health checker for `service`.
    pub fn start<S: VectorStore>(
        service: &QueryService<S>,
        sweep_interval: Duration,
        health_check_interval: Duration,
    ) -> Self {
        let tasks = Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            handles: Mutex::new(Vec::new()),
        };

        let sweeper = service.clone();
        tasks.spawn("cache-sweep", sweep_interval, move || {
            let service = sweeper.clone();
            async move {
                let report = service.sweep_caches();
                if report.results > 0 || report.embeddings > 0 {
                    info!(
                        results = report.results,
                        embeddings = report.embeddings,
                        "Swept expired cache entries"
                    );
                }
            }
        });

        let checker = service.clone();
        tasks.spawn("pool-health", health_check_interval, move || {
            let service = checker.clone();
            async move {
                service.run_health_check().await;
            }
        });

        info!(
            sweep_secs = sweep_interval.as_secs_f64(),
            health_check_secs = health_check_interval.as_secs_f64(),
            "Maintenance tasks started"
        );
        tasks
    }

    fn spawn<F, Fut>(&self, name: &'static str, period: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = Arc::clone(&self.shutdown);
        let wake = Arc::clone(&self.wake);
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let woken = wake.notified();
                tokio::pin!(woken);
                woken.as_mut().enable();

                // Acquire: pairs with the Release store in stop().
                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                tokio::select! {
                    _ = interval.tick() => {}
                    _ = &mut woken => continue,
                }

                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                job().await;
            }
            debug!(task = name, "Maintenance task stopped");
        });

        self.handles.lock().push(handle);
    }

    /// Signals every job to stop and waits for them. Idempotent.
    pub async fn stop(&self) {
        // AcqRel: only the first caller drains the handles.
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.wake.notify_waiters();

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Maintenance task panicked");
            }
        }
        info!("Maintenance tasks stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for MaintenanceTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceTasks")
            .field("running", &self.is_running())
            .field("tasks", &self.handles.lock().len())
            .finish()
    }
}
