//! Worker registry: the single owner of live per-account workers.
//!
//! Every mutation of the worker map happens under one `tokio::sync::Mutex`.
//! `stop` keeps the lock until the worker acknowledges cancellation (or the
//! stop timeout aborts it), so a later `start` for the same account can never
//! overlap with a worker that is still winding down.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::store::{AccountHolder, AccountId};
use crate::worker::state::{WorkerState, WorkerStatus};
use crate::worker::worker::{CredentialSink, Worker, WorkerExit};

/// Registry-owned handle to one live worker.
struct WorkerHandle {
    id: AccountId,
    username: String,
    cancel: watch::Sender<bool>,
    task: JoinHandle<WorkerExit>,
    started_at: DateTime<Utc>,
}

impl WorkerHandle {
    fn state(&self) -> WorkerState {
        if self.task.is_finished() {
            WorkerState::Stopped
        } else {
            WorkerState::Running
        }
    }
}

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new worker was spawned.
    Started,
    /// A worker for this account already exists; nothing changed.
    AlreadyRunning,
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker observed cancellation and exited.
    Acknowledged,
    /// The worker did not exit within the stop timeout and was aborted.
    TimedOut,
    /// No worker existed for this account.
    NotRunning,
}

/// Tracks live workers keyed by account id.
pub struct WorkerRegistry {
    workers: Mutex<HashMap<AccountId, WorkerHandle>>,
    sink: Arc<dyn CredentialSink>,
    work_period: Duration,
    stop_timeout: Duration,
    max_workers: usize,
}

impl WorkerRegistry {
    /// Create an empty registry whose workers feed `sink`.
    pub fn new(config: &WorkerConfig, sink: Arc<dyn CredentialSink>) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            sink,
            work_period: config.work_period,
            stop_timeout: config.stop_timeout,
            max_workers: config.max_workers,
        }
    }

    /// Take exclusive access to the worker map.
    pub async fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            registry: self,
            workers: self.workers.lock().await,
        }
    }

    /// Start a worker for `account` unless one already exists.
    pub async fn start(&self, account: &AccountHolder) -> Result<StartOutcome, WorkerError> {
        self.lock().await.start(account)
    }

    /// Stop the worker for `id` and wait for it to exit.
    pub async fn stop(&self, id: AccountId) -> StopOutcome {
        self.lock().await.stop(id).await
    }

    /// Stop every live worker. Returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        self.lock().await.stop_all().await
    }

    /// Check if a worker handle exists for `id`.
    pub async fn is_running(&self, id: AccountId) -> bool {
        self.workers.lock().await.contains_key(&id)
    }

    /// Get count of live workers.
    pub async fn running_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Snapshot of every registry entry, ordered by account id.
    pub async fn snapshot(&self) -> Vec<WorkerStatus> {
        let workers = self.workers.lock().await;
        let mut statuses: Vec<WorkerStatus> = workers
            .values()
            .map(|h| WorkerStatus {
                id: h.id,
                username: h.username.clone(),
                state: h.state(),
                started_at: h.started_at,
            })
            .collect();
        statuses.sort_by_key(|s| s.id);
        statuses
    }
}

/// Exclusive access to the registry's worker map.
///
/// Every other registry operation waits while a guard is held. The reconciler
/// holds one for an entire diff-and-apply cycle.
pub struct RegistryGuard<'a> {
    registry: &'a WorkerRegistry,
    workers: MutexGuard<'a, HashMap<AccountId, WorkerHandle>>,
}

impl RegistryGuard<'_> {
    /// Ids that currently have a handle.
    pub fn running_ids(&self) -> HashSet<AccountId> {
        self.workers.keys().copied().collect()
    }

    /// Drop handles whose task already ended without being stopped.
    ///
    /// Returns the reaped ids; they count as stopped from here on.
    pub fn reap_finished(&mut self) -> Vec<AccountId> {
        let finished: Vec<AccountId> = self
            .workers
            .values()
            .filter(|h| h.state() == WorkerState::Stopped)
            .map(|h| h.id)
            .collect();

        for id in &finished {
            self.workers.remove(id);
            warn!(account_id = %id, "Worker exited on its own, reaped");
        }
        finished
    }

    /// Start a worker for `account` unless one already exists.
    pub fn start(&mut self, account: &AccountHolder) -> Result<StartOutcome, WorkerError> {
        let current = if self.workers.contains_key(&account.id) {
            WorkerState::Running
        } else {
            WorkerState::Stopped
        };
        if !current.can_transition_to(WorkerState::Running) {
            return Ok(StartOutcome::AlreadyRunning);
        }

        if self.workers.len() >= self.registry.max_workers {
            return Err(WorkerError::CapacityExceeded {
                max: self.registry.max_workers,
            });
        }

        let (cancel, cancel_rx) = watch::channel(false);
        let worker = Worker::new(
            account.clone(),
            self.registry.work_period,
            Arc::clone(&self.registry.sink),
            cancel_rx,
        );
        let task = tokio::spawn(worker.run());

        self.workers.insert(
            account.id,
            WorkerHandle {
                id: account.id,
                username: account.username.clone(),
                cancel,
                task,
                started_at: Utc::now(),
            },
        );

        info!(account_id = %account.id, username = %account.username, "Worker started");
        Ok(StartOutcome::Started)
    }

    /// Stop the worker for `id` and wait for it to acknowledge.
    pub async fn stop(&mut self, id: AccountId) -> StopOutcome {
        match self.workers.remove(&id) {
            Some(handle) => shutdown_worker(handle, self.registry.stop_timeout).await,
            None => StopOutcome::NotRunning,
        }
    }

    /// Stop the workers for `ids` concurrently and wait for all of them.
    ///
    /// The whole batch is bounded by one stop timeout rather than one per id.
    /// Outcomes are returned in the order of `ids`.
    pub async fn stop_many(&mut self, ids: &[AccountId]) -> Vec<(AccountId, StopOutcome)> {
        let timeout = self.registry.stop_timeout;
        let handles: Vec<(AccountId, Option<WorkerHandle>)> =
            ids.iter().map(|id| (*id, self.workers.remove(id))).collect();

        join_all(handles.into_iter().map(|(id, handle)| async move {
            match handle {
                Some(handle) => (id, shutdown_worker(handle, timeout).await),
                None => (id, StopOutcome::NotRunning),
            }
        }))
        .await
    }

    /// Stop every live worker concurrently. Returns how many were stopped.
    pub async fn stop_all(&mut self) -> usize {
        let ids: Vec<AccountId> = self.workers.keys().copied().collect();
        let count = self.stop_many(&ids).await.len();

        if count > 0 {
            info!(count, "Stopped all workers");
        }
        count
    }
}

/// Assert cancellation and wait (bounded) for the worker task to finish.
async fn shutdown_worker(mut handle: WorkerHandle, timeout: Duration) -> StopOutcome {
    // Send fails only if the worker already dropped its receiver, i.e. exited.
    let _ = handle.cancel.send(true);

    match tokio::time::timeout(timeout, &mut handle.task).await {
        Ok(Ok(exit)) => {
            info!(account_id = %handle.id, ?exit, "Worker stopped");
            StopOutcome::Acknowledged
        }
        Ok(Err(e)) => {
            warn!(account_id = %handle.id, "Worker task ended abnormally: {e}");
            StopOutcome::Acknowledged
        }
        Err(_) => {
            handle.task.abort();
            warn!(
                account_id = %handle.id,
                ?timeout,
                "Worker did not acknowledge stop in time, aborted"
            );
            StopOutcome::TimedOut
        }
    }
}
