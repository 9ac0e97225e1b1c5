//! Background promotion of delayed messages and reclaim of timed-out ones.
//!
//! Every process runs both loops, but each loop only scans while its process
//! holds the loop's lease. A loop sleeps for its current backoff delay, then
//! tries to take the lease for exactly that long:
//!
//! - on success it leads, starting a periodic scan task if none is running
//! - on contention or a lock error it follows, stopping any scan task
//!
//! Either way the backoff advances one Fibonacci step. Scans are single
//! atomic procedures over every registered queue, so an occasional duplicate
//! scan by two processes is harmless.

use crate::backoff::FibonacciBackoff;
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::QueueError;
use crate::lock::LockService;
use crate::procedure::{Procedure, ProcedureRunner, Procedures};
use crate::queue::{QUEUE_KEY_PREFIX, QUEUE_REGISTRY_KEY};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;

const EVENT_CAPACITY: usize = 256;

// ============================================================================
// Public types
// ============================================================================

/// The two independent polling loops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    /// Moves due messages from scheduled to active
    Promotion,
    /// Moves expired messages from processing back to active
    Reclaim,
}

impl std::fmt::Display for LoopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Promotion => write!(f, "promotion"),
            Self::Reclaim => write!(f, "reclaim"),
        }
    }
}

/// Leadership state of one loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the next leadership attempt
    Backoff,
    /// Lease acquisition in flight
    Electing,
    /// Holds the lease and scans periodically
    Leading,
    /// Another process holds the lease; no local scanning
    Following,
}

/// Notifications emitted by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// The promotion lease was acquired
    StartScheduler,
    /// The reclaim lease was acquired
    StartTimeout,
    /// A promotion scan finished; carries the entries still scheduled
    Expire(i64),
    /// A reclaim scan finished; carries the entries still in flight
    Timeout(i64),
    /// `stop` completed
    Stop,
    Error(String),
}

// ============================================================================
// Loop bookkeeping
// ============================================================================

struct LoopControl {
    lock_name: String,
    interval: Duration,
    state: Mutex<LoopState>,
    backoff: Mutex<FibonacciBackoff>,
    scanner: Mutex<Option<JoinHandle<()>>>,
}

impl LoopControl {
    fn new(lock_name: String, interval: Duration, config: &SchedulerConfig) -> Self {
        Self {
            lock_name,
            interval,
            state: Mutex::new(LoopState::Backoff),
            backoff: Mutex::new(FibonacciBackoff::new(
                config.initial_backoff(),
                config.max_backoff(),
            )),
            scanner: Mutex::new(None),
        }
    }

    fn set_state(&self, state: LoopState) {
        *guard(&self.state) = state;
    }

    fn state(&self) -> LoopState {
        *guard(&self.state)
    }

    fn next_delay(&self) -> Duration {
        guard(&self.backoff).next_delay()
    }

    fn has_scanner(&self) -> bool {
        guard(&self.scanner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn stop_scanner(&self) {
        if let Some(handle) = guard(&self.scanner).take() {
            handle.abort();
        }
    }

    fn reset(&self) {
        self.stop_scanner();
        guard(&self.backoff).reset();
        self.set_state(LoopState::Backoff);
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct Running {
    cancel: CancellationToken,
    loops: Vec<JoinHandle<()>>,
}

struct SchedulerInner {
    runner: ProcedureRunner,
    locks: LockService,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<SchedulerEvent>,
    promotion: LoopControl,
    reclaim: LoopControl,
    running: Mutex<Option<Running>>,
}

// ============================================================================
// Scheduler
// ============================================================================

/// Lease-gated promotion and reclaim loops
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(
        runner: ProcedureRunner,
        locks: LockService,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let promotion = LoopControl::new(
            config.scheduler_lock.clone(),
            config.promote_interval(),
            &config,
        );
        let reclaim = LoopControl::new(
            config.timeout_lock.clone(),
            config.reclaim_interval(),
            &config,
        );

        Self {
            inner: Arc::new(SchedulerInner {
                runner,
                locks,
                clock,
                events,
                promotion,
                reclaim,
                running: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        guard(&self.inner.running).is_some()
    }

    pub fn loop_state(&self, kind: LoopKind) -> LoopState {
        self.inner.control(kind).state()
    }

    /// Identity under which this scheduler takes leases
    pub fn owner(&self) -> &str {
        self.inner.locks.owner()
    }

    /// Spawn both loops. Calling it while already running does nothing.
    pub fn start(&self) {
        let mut running = guard(&self.inner.running);
        if running.is_some() {
            debug!("Scheduler already running");
            return;
        }

        let cancel = CancellationToken::new();
        let loops = [LoopKind::Promotion, LoopKind::Reclaim]
            .into_iter()
            .map(|kind| {
                let inner = Arc::clone(&self.inner);
                let cancel = cancel.clone();
                tokio::spawn(async move { inner.run_loop(kind, cancel).await })
            })
            .collect();

        *running = Some(Running { cancel, loops });
        info!(owner = self.owner(), "Scheduler started");
    }

    /// Stop both loops and give up both leases.
    ///
    /// In-flight lease attempts are allowed to finish before the leases are
    /// released. A release failure is published as [`SchedulerEvent::Error`]
    /// and does not prevent the other release. Stopping a scheduler that is
    /// not running does nothing.
    pub async fn stop(&self) {
        let Some(running) = guard(&self.inner.running).take() else {
            return;
        };

        running.cancel.cancel();
        for handle in running.loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler loop ended abnormally");
            }
        }

        for control in [&self.inner.promotion, &self.inner.reclaim] {
            control.reset();
        }

        for control in [&self.inner.promotion, &self.inner.reclaim] {
            if let Err(e) = self.inner.locks.release(&control.lock_name).await {
                error!(lock = %control.lock_name, error = %e, "Failed to release scheduler lease");
                self.inner.emit(SchedulerEvent::Error(e.to_string()));
            }
        }

        info!(owner = self.owner(), "Scheduler stopped");
        self.inner.emit(SchedulerEvent::Stop);
    }

    /// Move every due scheduled message to active across all queues.
    ///
    /// Returns the number of entries still scheduled.
    pub async fn promote_due(&self) -> Result<i64, QueueError> {
        self.inner.scan(LoopKind::Promotion).await
    }

    /// Return every expired in-flight message to active across all queues.
    ///
    /// Returns the number of entries still in flight.
    pub async fn reclaim_expired(&self) -> Result<i64, QueueError> {
        self.inner.scan(LoopKind::Reclaim).await
    }
}

impl SchedulerInner {
    fn control(&self, kind: LoopKind) -> &LoopControl {
        match kind {
            LoopKind::Promotion => &self.promotion,
            LoopKind::Reclaim => &self.reclaim,
        }
    }

    fn emit(&self, event: SchedulerEvent) {
        // Having no subscribers is normal.
        let _ = self.events.send(event);
    }

    fn procedure(kind: LoopKind) -> &'static Procedure {
        match kind {
            LoopKind::Promotion => &Procedures::get().promote_scheduled,
            LoopKind::Reclaim => &Procedures::get().reclaim_timed_out,
        }
    }

    async fn scan(&self, kind: LoopKind) -> Result<i64, QueueError> {
        let keys = [QUEUE_REGISTRY_KEY.to_string()];
        let args = [
            self.clock.epoch_seconds().to_string(),
            QUEUE_KEY_PREFIX.to_string(),
        ];
        self.runner
            .run_integer(Self::procedure(kind), &keys, &args)
            .await
    }

    async fn run_loop(self: Arc<Self>, kind: LoopKind, cancel: CancellationToken) {
        let control = self.control(kind);

        loop {
            let delay = control.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            control.set_state(LoopState::Electing);
            match self.locks.acquire(&control.lock_name, delay).await {
                Ok(true) => {
                    control.set_state(LoopState::Leading);
                    self.emit(match kind {
                        LoopKind::Promotion => SchedulerEvent::StartScheduler,
                        LoopKind::Reclaim => SchedulerEvent::StartTimeout,
                    });
                    if !control.has_scanner() {
                        debug!(loop_kind = %kind, "Lease acquired; starting scans");
                        let scanner = Arc::clone(&self).spawn_scanner(kind);
                        *guard(&control.scanner) = Some(scanner);
                    }
                }
                Ok(false) => {
                    if control.state() != LoopState::Following {
                        debug!(loop_kind = %kind, "Lease held elsewhere; following");
                    }
                    control.set_state(LoopState::Following);
                    control.stop_scanner();
                }
                Err(e) => {
                    error!(loop_kind = %kind, error = %e, "Lease acquisition failed");
                    self.emit(SchedulerEvent::Error(e.to_string()));
                    control.set_state(LoopState::Following);
                    control.stop_scanner();
                }
            }
        }
    }

    fn spawn_scanner(self: Arc<Self>, kind: LoopKind) -> JoinHandle<()> {
        let period = self.control(kind).interval;
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticks.tick().await;
                match self.scan(kind).await {
                    Ok(remaining) => {
                        debug!(loop_kind = %kind, remaining, "Scan completed");
                        self.emit(match kind {
                            LoopKind::Promotion => SchedulerEvent::Expire(remaining),
                            LoopKind::Reclaim => SchedulerEvent::Timeout(remaining),
                        });
                    }
                    Err(e) => {
                        error!(loop_kind = %kind, error = %e, "Scan failed");
                        self.emit(SchedulerEvent::Error(e.to_string()));
                    }
                }
            }
        })
    }
}
