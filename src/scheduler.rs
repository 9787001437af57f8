//! Scheduling Loop - drives balance reconciliation and status polling
//!
//! One coordinating task waits for either the fixed poll tick or a wake
//! signal, then runs an interval-debounced reconciliation and a polling
//! pass side by side. A separate tick source raises the wake signal at most
//! once per minimum poll interval while orders are active.
//!
//! Shutdown is a `watch` flag. It interrupts the wait and any cycle in
//! progress; the loop returns normally.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::balances::{BalanceReconciler, ReconcileOutcome};
use crate::order::SharedRegistry;
use crate::poller::StatusPoller;

/// Reconciliation passes are serialized through this lock.
pub type SharedReconciler = Arc<Mutex<BalanceReconciler>>;

/// Resolves once shutdown is requested or the sender is gone.
pub async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

pub struct Scheduler {
    poller: Arc<StatusPoller>,
    reconciler: SharedReconciler,
    wake: Arc<Notify>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        poller: Arc<StatusPoller>,
        reconciler: SharedReconciler,
        wake: Arc<Notify>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            poller,
            reconciler,
            wake,
            poll_interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("[SCHED] starting, poll interval {:?}", self.poll_interval);

        tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => {
                info!("[SCHED] cancelled during startup reconciliation");
                return;
            }
            outcome = reconcile(&self.reconciler, true) => {
                debug!("[SCHED] startup reconciliation: {:?}", outcome);
            }
        }

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut cycles: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                _ = self.wake.notified() => {}
                _ = ticker.tick() => {}
            }

            let cycle = join(reconcile(&self.reconciler, false), self.poller.poll_once());
            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => {
                    debug!("[SCHED] cycle {} abandoned", cycles);
                    break;
                }
                (balances, report) = cycle => {
                    cycles += 1;
                    if report.polled > 0 || report.awaiting_id > 0 {
                        debug!("[SCHED] cycle {}: {:?} | {:?}", cycles, balances, report);
                    }
                }
            }
        }

        info!("[SCHED] stopped after {} cycles", cycles);
    }
}

async fn reconcile(reconciler: &SharedReconciler, force: bool) -> Option<ReconcileOutcome> {
    // failures are logged by the reconciler and retried next cycle
    reconciler.lock().await.reconcile(force).await.ok()
}

/// Raise `wake` at most once per `min_interval`, and only while orders are active.
pub async fn run_tick_source(
    registry: SharedRegistry,
    wake: Arc<Notify>,
    min_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(min_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => break,
            _ = ticker.tick() => {
                if registry.read().await.has_active() {
                    wake.notify_one();
                }
            }
        }
    }
    debug!("[SCHED] tick source stopped");
}
