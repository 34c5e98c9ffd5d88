//! Bounded pool of reusable vector-store connections.
//!
//! Slot lifecycle:
//!
//! ```text
//! Idle --checkout--> InUse --release(Success)--> Idle
//!                    InUse --release(Failure)--> Unhealthy
//! Unhealthy --probe ok--> Idle
//! Unhealthy --max_health_failures probes failed--> Closed (replaced)
//! ```
//!
//! Slot bookkeeping lives behind one mutex; waiters park on a [`Notify`] that
//! every release signals. Live slots (idle + in use + unhealthy + being
//! opened or probed) never exceed `max_size`.

mod error;


use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

pub use error::{PoolError, PoolResult};

use crate::clock::SharedClock;
use crate::constants::{
    DEFAULT_HEALTH_CHECK_INTERVAL, DEFAULT_MAX_HEALTH_FAILURES, DEFAULT_POOL_ACQUIRE_TIMEOUT,
    DEFAULT_POOL_MAX_SIZE,
};
use crate::monitor::{AcquireOutcome, MetricEvent, PerformanceMonitor};
use crate::retry::Retryable;
use crate::vectordb::VectorStore;

/// Pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_size: usize,
    pub acquire_timeout: Duration,
    pub health_check_interval: Duration,
    /// Consecutive failed probes before a slot is closed and replaced.
    pub max_health_failures: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_POOL_MAX_SIZE,
            acquire_timeout: DEFAULT_POOL_ACQUIRE_TIMEOUT,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            max_health_failures: DEFAULT_MAX_HEALTH_FAILURES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Idle,
    InUse,
    Unhealthy,
}

/// How a checked-out connection performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Success,
    Failure,
}

struct Slot<C> {
    id: u64,
    conn: C,
    state: SlotState,
    last_used_at: Instant,
    health_failures: u32,
}

struct PoolState<C> {
    idle: VecDeque<Slot<C>>,
    unhealthy: Vec<Slot<C>>,
    in_use: usize,
    /// Slots being opened or probed; they count against `max_size`.
    reserved: usize,
    closed: bool,
    next_id: u64,
}

impl<C> PoolState<C> {
    fn live(&self) -> usize {
        self.idle.len() + self.unhealthy.len() + self.in_use + self.reserved
    }
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    reused: AtomicU64,
    exhausted: AtomicU64,
    connect_failures: AtomicU64,
    failed_releases: AtomicU64,
    closed_slots: AtomicU64,
    recovered: AtomicU64,
}

/// Admin view of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub active: usize,
    pub idle: usize,
    pub unhealthy: usize,
    pub max_size: usize,
    pub total: usize,
    pub created: u64,
    pub reused: u64,
    pub exhausted: u64,
    pub failed: u64,
    pub closed_slots: u64,
    pub recovered: u64,
    pub utilization: f64,
}

/// Result of one health-check pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub probed: usize,
    pub recovered: usize,
    pub still_unhealthy: usize,
    pub closed: usize,
    pub replaced: usize,
}

struct PoolInner<S: VectorStore> {
    store: Arc<S>,
    config: PoolConfig,
    state: Mutex<PoolState<S::Connection>>,
    released: Notify,
    counters: Counters,
    clock: SharedClock,
    monitor: PerformanceMonitor,
}

impl<S: VectorStore> PoolInner<S> {
    fn new_slot(&self, conn: S::Connection) -> Slot<S::Connection> {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        Slot {
            id,
            conn,
            state: SlotState::InUse,
            last_used_at: self.clock.now(),
            health_failures: 0,
        }
    }

    fn release(&self, mut slot: Slot<S::Connection>, outcome: ReleaseOutcome) {
        slot.last_used_at = self.clock.now();
        {
            let mut state = self.state.lock();
            state.in_use -= 1;

            if state.closed {
                debug!(slot = slot.id, "Dropping connection released after close");
            } else {
                match outcome {
                    ReleaseOutcome::Success => {
                        slot.state = SlotState::Idle;
                        state.idle.push_back(slot);
                    }
                    ReleaseOutcome::Failure => {
                        self.counters.failed_releases.fetch_add(1, Ordering::Relaxed);
                        warn!(slot = slot.id, "Connection marked unhealthy");
                        slot.state = SlotState::Unhealthy;
                        state.unhealthy.push(slot);
                    }
                }
            }
        }
        self.released.notify_one();
    }
}

/// One unit of `reserved` capacity held while a slot is opened or probed.
/// Dropping an unsettled reservation (a cancelled connect or probe) hands the
/// capacity back and wakes a waiter.
struct Reservation<S: VectorStore> {
    pool: Arc<PoolInner<S>>,
    armed: bool,
}

impl<S: VectorStore> Reservation<S> {
    /// The caller has already counted this reservation in `state.reserved`.
    fn new(pool: Arc<PoolInner<S>>) -> Self {
        Self { pool, armed: true }
    }

    /// Releases the reservation under a lock the caller already holds.
    fn settle(mut self, state: &mut PoolState<S::Connection>) {
        state.reserved -= 1;
        self.armed = false;
    }
}

impl<S: VectorStore> Drop for Reservation<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.pool.state.lock().reserved -= 1;
        self.pool.released.notify_one();
        debug!("Abandoned pool reservation returned");
    }
}

/// Cheaply cloneable handle to a bounded connection pool.
pub struct ConnectionPool<S: VectorStore> {
    inner: Arc<PoolInner<S>>,
}

impl<S: VectorStore> Clone for ConnectionPool<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: VectorStore> ConnectionPool<S> {
    /// Creates an empty pool; connections are opened on demand.
    pub fn new(
        store: Arc<S>,
        config: PoolConfig,
        clock: SharedClock,
        monitor: PerformanceMonitor,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                store,
                config: PoolConfig {
                    max_size: config.max_size.max(1),
                    ..config
                },
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    unhealthy: Vec::new(),
                    in_use: 0,
                    reserved: 0,
                    closed: false,
                    next_id: 0,
                }),
                released: Notify::new(),
                counters: Counters::default(),
                clock,
                monitor,
            }),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Checks out a connection with the configured default timeout.
    pub async fn get(&self) -> PoolResult<PooledConnection<S>> {
        self.acquire(self.inner.config.acquire_timeout).await
    }

    /// Checks out a connection: reuse an idle slot, else open one if below
    /// `max_size`, else wait up to `timeout` for a release.
    #[instrument(skip(self), fields(timeout_ms = timeout.as_millis() as u64))]
    pub async fn acquire(&self, timeout: Duration) -> PoolResult<PooledConnection<S>> {
        let started = tokio::time::Instant::now();
        let deadline = started + timeout;
        let result = self.acquire_until(deadline).await;

        let outcome = match &result {
            Ok(_) => AcquireOutcome::Acquired,
            Err(PoolError::Exhausted { .. }) => AcquireOutcome::Exhausted,
            Err(_) => AcquireOutcome::Failed,
        };
        self.inner.monitor.record(MetricEvent::PoolAcquire {
            wait: started.elapsed(),
            outcome,
        });
        result
    }

    async fn acquire_until(
        &self,
        deadline: tokio::time::Instant,
    ) -> PoolResult<PooledConnection<S>> {
        let inner = &self.inner;
        let started = tokio::time::Instant::now();

        loop {
            let notified = inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let reservation = {
                let mut state = inner.state.lock();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                if let Some(mut slot) = state.idle.pop_front() {
                    slot.state = SlotState::InUse;
                    state.in_use += 1;
                    inner.counters.reused.fetch_add(1, Ordering::Relaxed);
                    return Ok(self.guard(slot));
                }
                if state.live() < inner.config.max_size {
                    state.reserved += 1;
                    Some(Reservation::new(Arc::clone(inner)))
                } else {
                    None
                }
            };

            if let Some(reservation) = reservation {
                return self.open_slot(reservation).await;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                inner.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(waited_ms, "Connection pool exhausted");
                return Err(PoolError::Exhausted { waited_ms });
            }
        }
    }

    /// Opens a connection into reserved capacity.
    async fn open_slot(&self, reservation: Reservation<S>) -> PoolResult<PooledConnection<S>> {
        let inner = &self.inner;
        let opened = inner.store.connect().await;

        let mut state = inner.state.lock();
        reservation.settle(&mut state);
        match opened {
            Ok(conn) if !state.closed => {
                state.in_use += 1;
                drop(state);
                inner.counters.created.fetch_add(1, Ordering::Relaxed);
                let slot = inner.new_slot(conn);
                debug!(slot = slot.id, "Opened pooled connection");
                Ok(self.guard(slot))
            }
            Ok(_) => Err(PoolError::Closed),
            Err(e) => {
                drop(state);
                inner
                    .counters
                    .connect_failures
                    .fetch_add(1, Ordering::Relaxed);
                inner.released.notify_one();
                warn!(error = %e, "Failed to open pooled connection");
                Err(PoolError::Connect {
                    reason: e.to_string(),
                })
            }
        }
    }

    fn guard(&self, slot: Slot<S::Connection>) -> PooledConnection<S> {
        PooledConnection {
            pool: Arc::clone(&self.inner),
            slot: Some(slot),
        }
    }

    /// Runs `f` with a checked-out connection. The slot is returned on every
    /// exit path; transient errors from `f` mark it unhealthy.
    pub async fn with_connection<T, E, F, Fut>(&self, timeout: Duration, f: F) -> Result<T, E>
    where
        F: FnOnce(S::Connection) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<PoolError> + Retryable,
    {
        let pooled = self.acquire(timeout).await?;
        let result = f(pooled.connection().clone()).await;

        let outcome = match &result {
            Err(e) if e.is_transient() => ReleaseOutcome::Failure,
            _ => ReleaseOutcome::Success,
        };
        pooled.release(outcome);
        result
    }

    /// Probes every unhealthy slot once. Passing slots return to idle; a slot
    /// that reaches `max_health_failures` is closed and, if possible, replaced.
    #[instrument(skip(self))]
    pub async fn run_health_check(&self) -> HealthReport {
        let inner = &self.inner;
        let slots: Vec<_> = {
            let mut state = inner.state.lock();
            let slots = std::mem::take(&mut state.unhealthy);
            state.reserved += slots.len();
            slots
                .into_iter()
                .map(|slot| (slot, Reservation::new(Arc::clone(inner))))
                .collect()
        };

        let mut report = HealthReport {
            probed: slots.len(),
            ..Default::default()
        };

        for (mut slot, reservation) in slots {
            let probe = tokio::time::timeout(
                inner.config.acquire_timeout,
                inner.store.health_check(&slot.conn),
            )
            .await;
            let healthy = matches!(probe, Ok(Ok(())));

            if healthy {
                slot.health_failures = 0;
                slot.state = SlotState::Idle;
                report.recovered += 1;
                inner.counters.recovered.fetch_add(1, Ordering::Relaxed);
                self.return_probed(reservation, Some(slot));
                continue;
            }

            slot.health_failures += 1;
            if slot.health_failures < inner.config.max_health_failures {
                report.still_unhealthy += 1;
                debug!(
                    slot = slot.id,
                    failures = slot.health_failures,
                    "Health probe failed"
                );
                self.return_probed(reservation, Some(slot));
                continue;
            }

            report.closed += 1;
            inner.counters.closed_slots.fetch_add(1, Ordering::Relaxed);
            warn!(
                slot = slot.id,
                failures = slot.health_failures,
                "Closing connection after repeated health failures"
            );
            drop(slot);

            match inner.store.connect().await {
                Ok(conn) => {
                    inner.counters.created.fetch_add(1, Ordering::Relaxed);
                    let mut replacement = inner.new_slot(conn);
                    replacement.state = SlotState::Idle;
                    report.replaced += 1;
                    self.return_probed(reservation, Some(replacement));
                }
                Err(e) => {
                    inner
                        .counters
                        .connect_failures
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Failed to replace closed connection");
                    self.return_probed(reservation, None);
                }
            }
        }

        if report.probed > 0 {
            info!(
                probed = report.probed,
                recovered = report.recovered,
                closed = report.closed,
                replaced = report.replaced,
                "Pool health check complete"
            );
        }
        report
    }

    /// Settles a probe reservation, placing `slot` by its state.
    fn return_probed(&self, reservation: Reservation<S>, slot: Option<Slot<S::Connection>>) {
        {
            let mut state = self.inner.state.lock();
            reservation.settle(&mut state);
            match slot {
                Some(slot) if !state.closed => match slot.state {
                    SlotState::Idle => state.idle.push_back(slot),
                    _ => state.unhealthy.push(slot),
                },
                _ => {}
            }
        }
        self.inner.released.notify_one();
    }

    /// Closes the pool: idle and unhealthy slots are dropped now, in-use
    /// slots when they are released, and every waiter fails with `Closed`.
    pub fn close(&self) {
        let dropped = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let dropped = state.idle.len() + state.unhealthy.len();
            state.idle.clear();
            state.unhealthy.clear();
            dropped
        };
        self.inner.released.notify_waiters();
        info!(dropped, "Connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn stats(&self) -> PoolStats {
        let (active, idle, unhealthy, total) = {
            let state = self.inner.state.lock();
            (
                state.in_use,
                state.idle.len(),
                state.unhealthy.len(),
                state.live(),
            )
        };
        let counters = &self.inner.counters;
        let max_size = self.inner.config.max_size;

        PoolStats {
            active,
            idle,
            unhealthy,
            max_size,
            total,
            created: counters.created.load(Ordering::Relaxed),
            reused: counters.reused.load(Ordering::Relaxed),
            exhausted: counters.exhausted.load(Ordering::Relaxed),
            failed: counters.connect_failures.load(Ordering::Relaxed)
                + counters.failed_releases.load(Ordering::Relaxed),
            closed_slots: counters.closed_slots.load(Ordering::Relaxed),
            recovered: counters.recovered.load(Ordering::Relaxed),
            utilization: active as f64 / max_size as f64,
        }
    }
}

impl<S: VectorStore> std::fmt::Debug for ConnectionPool<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A checked-out connection. Dropping it returns the slot as idle; use
/// [`PooledConnection::release`] to report a failure instead.
pub struct PooledConnection<S: VectorStore> {
    pool: Arc<PoolInner<S>>,
    slot: Option<Slot<S::Connection>>,
}

impl<S: VectorStore> PooledConnection<S> {
    pub fn connection(&self) -> &S::Connection {
        match &self.slot {
            Some(slot) => &slot.conn,
            None => unreachable!("slot is only taken on release"),
        }
    }

    pub fn slot_id(&self) -> u64 {
        self.slot.as_ref().map(|s| s.id).unwrap_or_default()
    }

    /// Returns the slot to the pool with an explicit outcome.
    pub fn release(mut self, outcome: ReleaseOutcome) {
        if let Some(slot) = self.slot.take() {
            self.pool.release(slot, outcome);
        }
    }
}

impl<S: VectorStore> Drop for PooledConnection<S> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.release(slot, ReleaseOutcome::Success);
        }
    }
}

impl<S: VectorStore> std::fmt::Debug for PooledConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("slot", &self.slot_id())
            .finish()
    }
}
