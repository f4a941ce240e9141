//! Broadcast scheduler: probes the whole registry on a fixed period.
//!
//! One cycle runs per tick and ticks never overlap: a cycle that outlasts
//! the period delays the next tick. Cancelling clears the health table and
//! guarantees no later commit from this scheduler.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};

use pingu_services::SharedPeerTable;

use crate::probe::Prober;

/// Per-cycle timeout used when the caller passes zero.
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(5);

/// Shortest accepted tick period.
pub const MIN_BROADCAST_PERIOD: Duration = Duration::from_millis(1);

/// Lifecycle of the engine's broadcast scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No scheduler has been started.
    Idle,
    Running,
    /// Cancelled directly or by stopping the engine.
    Stopped,
}

/// Handle to a running scheduler. Clones refer to the same scheduler.
#[derive(Debug, Clone)]
pub struct BroadcastHandle {
    state: Arc<Mutex<SchedulerState>>,
    peers: SharedPeerTable,
    cancel: broadcast::Sender<()>,
}

impl BroadcastHandle {
    /// Stop ticking and clear the health table. Idempotent: a handle whose
    /// scheduler is already stopped leaves the table alone, so a stale handle
    /// cannot wipe results of a scheduler started later.
    ///
    /// The state lock is held while clearing, and cycles commit under the
    /// same lock, so no result lands after this returns.
    pub fn cancel(&self) {
        {
            let mut state = self.lock_state();
            if *state != SchedulerState::Running {
                return;
            }
            *state = SchedulerState::Stopped;
            self.peers.lock().clear_health();
        }
        // No receiver means the task has already exited.
        let _ = self.cancel.send(());
    }

    pub fn state(&self) -> SchedulerState {
        *self.lock_state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Spawn a scheduler task and return its handle.
pub(crate) fn spawn(
    prober: Prober,
    peers: SharedPeerTable,
    period: Duration,
    timeout: Duration,
    verbose: bool,
) -> BroadcastHandle {
    let (cancel, cancel_rx) = broadcast::channel(1);
    let handle = BroadcastHandle {
        state: Arc::new(Mutex::new(SchedulerState::Running)),
        peers,
        cancel,
    };

    let period = period.max(MIN_BROADCAST_PERIOD);
    let timeout = if timeout.is_zero() {
        DEFAULT_BROADCAST_TIMEOUT
    } else {
        timeout
    };

    if verbose {
        tracing::info!(?period, ?timeout, "broadcast scheduler starting");
    }

    let task = BroadcastTask {
        prober,
        handle: handle.clone(),
        period,
        timeout,
        verbose,
        cancel: cancel_rx,
    };
    tokio::spawn(task.run());

    handle
}

struct BroadcastTask {
    prober: Prober,
    handle: BroadcastHandle,
    period: Duration,
    timeout: Duration,
    verbose: bool,
    cancel: broadcast::Receiver<()>,
}

impl BroadcastTask {
    async fn run(mut self) {
        // First cycle one period after start, like a plain ticker.
        let mut ticker = time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.recv() => break,

                _ = ticker.tick() => {
                    if !self.cycle().await {
                        break;
                    }
                }
            }
        }

        if self.verbose {
            tracing::info!("broadcast scheduler stopped");
        }
    }

    /// One probe of every registered peer. Returns false once cancelled.
    async fn cycle(&mut self) -> bool {
        let targets = self.handle.peers.lock().peers();
        if targets.is_empty() {
            if self.verbose {
                tracing::debug!("broadcast tick with no registered peers");
            }
            return true;
        }

        let outcome = tokio::select! {
            _ = self.cancel.recv() => return false,
            outcome = self.prober.probe(targets, self.timeout) => outcome,
        };

        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                if self.verbose {
                    tracing::warn!(error = %e, "broadcast cycle skipped");
                }
                return true;
            }
        };

        let state = self.handle.lock_state();
        if *state != SchedulerState::Running {
            return false;
        }
        let written = self.handle.peers.lock().commit(&outcome.alive);
        drop(state);

        if self.verbose {
            let alive = outcome.alive.values().filter(|a| **a).count();
            tracing::debug!(written, alive, "broadcast cycle committed");
        }
        true
    }
}
