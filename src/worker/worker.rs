//! Per-account worker execution.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::store::AccountHolder;

/// The recurring unit of work a worker performs for its account.
#[async_trait]
pub trait CredentialSink: Send + Sync {
    /// Process the account's credential pair once.
    async fn emit(&self, account: &AccountHolder) -> Result<(), WorkerError>;
}

/// Default sink: logs the credential pair with the secret redacted.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl CredentialSink for LogSink {
    async fn emit(&self, account: &AccountHolder) -> Result<(), WorkerError> {
        info!(
            account_id = %account.id,
            username = %account.username,
            password = "[REDACTED]",
            "Account holder credentials"
        );
        Ok(())
    }
}

/// How a worker task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Cancellation was asserted.
    Cancelled,
    /// The registry dropped the cancellation sender.
    Orphaned,
}

/// Worker bound to a single account.
pub struct Worker {
    account: AccountHolder,
    period: Duration,
    sink: Arc<dyn CredentialSink>,
    cancel: watch::Receiver<bool>,
}

impl Worker {
    /// Create a new worker for an account.
    pub fn new(
        account: AccountHolder,
        period: Duration,
        sink: Arc<dyn CredentialSink>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            account,
            period,
            sink,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// The first unit of work happens immediately, then once per period.
    /// Cancellation wins over a tick that becomes ready at the same time.
    pub async fn run(mut self) -> WorkerExit {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(account_id = %self.account.id, "Worker started");

        let exit = loop {
            tokio::select! {
                biased;
                changed = self.cancel.changed() => {
                    if changed.is_err() {
                        break WorkerExit::Orphaned;
                    }
                    if *self.cancel.borrow_and_update() {
                        break WorkerExit::Cancelled;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if *self.cancel.borrow() {
                break WorkerExit::Cancelled;
            }

            if let Err(e) = self.sink.emit(&self.account).await {
                warn!(account_id = %self.account.id, "Unit of work failed: {e}");
            }
        };

        debug!(account_id = %self.account.id, ?exit, "Worker exited");
        exit
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use secrecy::SecretString;

    use super::*;
    use crate::store::AccountId;

    /// Sink that records which accounts it saw, in order.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) seen: Mutex<Vec<AccountId>>,
    }

    impl RecordingSink {
        pub(crate) fn count_for(&self, id: AccountId) -> usize {
            self.seen.lock().unwrap().iter().filter(|s| **s == id).count()
        }
    }

    #[async_trait]
    impl CredentialSink for RecordingSink {
        async fn emit(&self, account: &AccountHolder) -> Result<(), WorkerError> {
            self.seen.lock().unwrap().push(account.id);
            Ok(())
        }
    }

    /// Sink that holds every unit of work open for `hold` and tracks how many
    /// workers are inside `emit` at the same time.
    pub(crate) struct LiveSink {
        hold: Duration,
        live: AtomicUsize,
        peak: AtomicUsize,
    }

    impl LiveSink {
        pub(crate) fn new(hold: Duration) -> Self {
            Self {
                hold,
                live: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        pub(crate) fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }

        pub(crate) fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    /// Decrements the live count even when the emitting task is aborted.
    struct LiveGuard<'a>(&'a AtomicUsize);

    impl Drop for LiveGuard<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CredentialSink for LiveSink {
        async fn emit(&self, _account: &AccountHolder) -> Result<(), WorkerError> {
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let _guard = LiveGuard(&self.live);
            tokio::time::sleep(self.hold).await;
            Ok(())
        }
    }

    /// Sink that never returns, so the worker can't observe cancellation.
    pub(crate) struct StuckSink;

    #[async_trait]
    impl CredentialSink for StuckSink {
        async fn emit(&self, _account: &AccountHolder) -> Result<(), WorkerError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl CredentialSink for FailingSink {
        async fn emit(&self, account: &AccountHolder) -> Result<(), WorkerError> {
            Err(WorkerError::Emit {
                id: account.id,
                reason: "downstream unavailable".to_string(),
            })
        }
    }

    pub(crate) fn account(id: i64, paused: bool) -> AccountHolder {
        AccountHolder {
            id: AccountId(id),
            username: format!("user{id}"),
            password: SecretString::from(format!("pw{id}")),
            holder_name: format!("Holder {id}"),
            paused,
        }
    }

    #[tokio::test]
    async fn emits_immediately_then_stops_on_cancel() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = watch::channel(false);
        let worker = Worker::new(account(1, false), Duration::from_secs(60), sink.clone(), rx);
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.count_for(AccountId(1)), 1);

        tx.send(true).unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should exit well before its 60s period")
            .unwrap();
        assert_eq!(exit, WorkerExit::Cancelled);
        assert_eq!(sink.count_for(AccountId(1)), 1);
    }

    #[tokio::test]
    async fn emits_once_per_period() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = watch::channel(false);
        let worker = Worker::new(account(2, false), Duration::from_millis(20), sink.clone(), rx);
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(110)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let count = sink.count_for(AccountId(2));
        assert!(count >= 3, "expected several emissions, got {count}");
    }

    #[tokio::test]
    async fn pre_cancelled_worker_does_no_work() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let worker = Worker::new(account(3, false), Duration::from_millis(10), sink.clone(), rx);

        assert_eq!(worker.run().await, WorkerExit::Cancelled);
        assert_eq!(sink.count_for(AccountId(3)), 0);
    }

    #[tokio::test]
    async fn dropped_sender_orphans_worker() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = watch::channel(false);
        let worker = Worker::new(account(4, false), Duration::from_secs(60), sink, rx);
        let handle = tokio::spawn(worker.run());

        drop(tx);
        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, WorkerExit::Orphaned);
    }

    #[tokio::test]
    async fn cancel_lets_in_flight_work_finish_before_exit() {
        let sink = Arc::new(LiveSink::new(Duration::from_millis(40)));
        let (tx, rx) = watch::channel(false);
        let worker = Worker::new(account(6, false), Duration::from_secs(60), sink.clone(), rx);
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sink.live(), 1);

        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), WorkerExit::Cancelled);
        assert_eq!(sink.live(), 0);
    }

    #[tokio::test]
    async fn emit_failure_keeps_worker_alive() {
        let (tx, rx) = watch::channel(false);
        let worker = Worker::new(account(5, false), Duration::from_millis(10), Arc::new(FailingSink), rx);
        let handle = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!handle.is_finished());

        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), WorkerExit::Cancelled);
    }
}
