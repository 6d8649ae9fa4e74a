//! Reconciler: keeps live workers in step with the stored paused flags.
//!
//! Each cycle takes a full snapshot from the store, diffs it against the
//! registry under the registry lock, and applies the resulting starts and
//! stops. The loop runs on a fixed interval until shut down; a failed store
//! read skips the cycle and never ends the loop.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::DatabaseError;
use crate::store::{AccountHolder, AccountId, AccountStore};
use crate::worker::WorkerRegistry;

/// Starts and stops needed to make the registry match a listing.
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    pub to_start: Vec<AccountHolder>,
    pub to_stop: Vec<AccountId>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_start.is_empty() && self.to_stop.is_empty()
    }
}

/// Diff a store listing against the ids that currently have workers.
///
/// An account absent from the listing is treated the same as a paused one.
/// If an id appears more than once, the last row wins. Output is ordered by id.
pub fn plan(listing: &[AccountHolder], running: &HashSet<AccountId>) -> ReconcilePlan {
    let latest: BTreeMap<AccountId, &AccountHolder> =
        listing.iter().map(|a| (a.id, a)).collect();

    let to_start = latest
        .values()
        .filter(|a| !a.paused && !running.contains(&a.id))
        .map(|a| (*a).clone())
        .collect();

    let mut to_stop: Vec<AccountId> = running
        .iter()
        .copied()
        .filter(|id| latest.get(id).is_none_or(|a| a.paused))
        .collect();
    to_stop.sort();

    ReconcilePlan { to_start, to_stop }
}

/// What one reconciliation cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<AccountId>,
    pub stopped: Vec<AccountId>,
    /// Starts that failed; retried on the next cycle.
    pub failed_starts: Vec<AccountId>,
    /// Workers that had exited on their own before this cycle.
    pub reaped: Vec<AccountId>,
    /// Live workers after the cycle.
    pub running: usize,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        !(self.started.is_empty()
            && self.stopped.is_empty()
            && self.failed_starts.is_empty()
            && self.reaped.is_empty())
    }
}

/// Periodic control loop driving the registry toward the store's desired state.
pub struct Reconciler {
    store: Arc<dyn AccountStore>,
    registry: Arc<WorkerRegistry>,
    poll_interval: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn AccountStore>,
        registry: Arc<WorkerRegistry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            poll_interval,
        }
    }

    /// The registry this reconciler drives.
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Run a single cycle: snapshot → diff → apply.
    ///
    /// A store error is returned before the registry is touched, so a failed
    /// listing never stops a worker.
    pub async fn tick(&self) -> Result<ReconcileReport, DatabaseError> {
        let listing = self.store.list_account_holders().await?;

        let mut guard = self.registry.lock().await;
        let reaped = guard.reap_finished();
        let plan = plan(&listing, &guard.running_ids());

        let mut report = ReconcileReport {
            reaped,
            ..ReconcileReport::default()
        };

        if plan.is_empty() {
            report.running = guard.running_ids().len();
            return Ok(report);
        }

        debug!(
            to_start = plan.to_start.len(),
            to_stop = plan.to_stop.len(),
            "Applying reconcile plan"
        );

        for (id, outcome) in guard.stop_many(&plan.to_stop).await {
            debug!(account_id = %id, ?outcome, "Stop applied");
            report.stopped.push(id);
        }

        for account in &plan.to_start {
            match guard.start(account) {
                Ok(_) => report.started.push(account.id),
                Err(e) => {
                    warn!(account_id = %account.id, "Failed to start worker, will retry: {e}");
                    report.failed_starts.push(account.id);
                }
            }
        }

        report.running = guard.running_ids().len();
        Ok(report)
    }

    /// Spawn the reconciliation loop as a background task.
    ///
    /// The first cycle runs immediately, then once per poll interval.
    pub fn spawn(self) -> ReconcilerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::clone(&self.registry);

        let task = tokio::spawn(async move {
            info!(
                "Reconciler started, polling every {}ms",
                self.poll_interval.as_millis()
            );

            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                match self.tick().await {
                    Ok(report) if report.changed() => {
                        info!(
                            started = report.started.len(),
                            stopped = report.stopped.len(),
                            failed = report.failed_starts.len(),
                            reaped = report.reaped.len(),
                            running = report.running,
                            "Reconciled workers"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Failed to list account holders, skipping cycle: {e}");
                    }
                }
            }

            info!("Reconciler shutting down");
        });

        ReconcilerHandle {
            shutdown: shutdown_tx,
            task,
            registry,
        }
    }
}

/// Handle to a running reconciliation loop.
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    registry: Arc<WorkerRegistry>,
}

impl ReconcilerHandle {
    /// The registry driven by the loop.
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Check whether the loop task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop, then stop every live worker.
    ///
    /// Returns the number of workers that were stopped.
    pub async fn shutdown(self) -> usize {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Reconciler task ended abnormally: {e}");
        }
        self.registry.stop_all().await
    }
}
