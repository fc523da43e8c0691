//! The offline transaction engine: durable queue, state machine, drain.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};

use talon_core::{RemoteError, Transaction, TxnId, TxnKind, TxnStatus};

use crate::bus::{TxnEvent, TxnEventBus};
use crate::config::EngineConfig;
use crate::executor::Executor;
use crate::store::{QueueSnapshot, SnapshotStore, StoreError};

/// Engine-surface error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transaction not found: {0}")]
    NotFound(TxnId),

    #[error("transaction {id} is {}, only failed transactions can be retried", status.as_str())]
    NotFailed { id: TxnId, status: TxnStatus },

    #[error("transaction {0} is already confirmed")]
    AlreadyConfirmed(TxnId),

    #[error("transaction {0} has an attempt in flight; cancel after it resolves")]
    SyncInFlight(TxnId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-transaction overrides at enqueue time.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    /// Retry budget override; defaults to the engine's policy.
    pub max_retries: Option<u32>,
}

/// Queue counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    pub confirmed: usize,
    pub conflict: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    transactions: Vec<Transaction>,
    last_sync_at: Option<chrono::DateTime<Utc>>,
}

impl QueueState {
    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            transactions: self.transactions.clone(),
            last_sync_at: self.last_sync_at,
        }
    }

    fn find_mut(&mut self, id: TxnId) -> Option<&mut Transaction> {
        self.transactions.iter_mut().find(|t| t.id == id)
    }
}

/// One authoritative in-memory queue mirroring one durable store.
///
/// Construct explicitly at the composition root and share via `Arc`; there
/// is no process-wide singleton, so tests can run isolated engines over
/// isolated stores. Every mutation is persisted before the engine moves
/// on, so a crash loses at most the most recent transition.
pub struct SyncEngine {
    queue: Mutex<QueueState>,
    store: Arc<dyn SnapshotStore>,
    executor: Arc<dyn Executor>,
    bus: TxnEventBus,
    config: EngineConfig,
    draining: AtomicBool,
    drain_requests: Notify,
}

impl SyncEngine {
    /// Hydrate the engine from the durable store.
    ///
    /// A record persisted as `syncing` means a crash interrupted an attempt
    /// whose outcome was lost; it is re-admitted as `pending` (the remote
    /// de-duplicates re-attempts, so trying again is safe).
    pub async fn open(
        store: Arc<dyn SnapshotStore>,
        executor: Arc<dyn Executor>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let snapshot = store.load().await?.unwrap_or_default();

        let mut transactions = snapshot.transactions;
        let mut readmitted = 0usize;
        for txn in &mut transactions {
            if txn.status == TxnStatus::Syncing {
                txn.status = TxnStatus::Pending;
                readmitted += 1;
            }
        }
        if readmitted > 0 {
            tracing::warn!(
                count = readmitted,
                "re-admitted in-flight transactions found at startup"
            );
        }

        tracing::info!(queued = transactions.len(), "transaction queue hydrated");

        Ok(Self {
            queue: Mutex::new(QueueState {
                transactions,
                last_sync_at: snapshot.last_sync_at,
            }),
            store,
            executor,
            bus: TxnEventBus::new(),
            config,
            draining: AtomicBool::new(false),
            drain_requests: Notify::new(),
        })
    }

    /// Lifecycle event bus; subscribe here for UI/gamification hooks.
    pub fn events(&self) -> &TxnEventBus {
        &self.bus
    }

    /// Record a user mutation durably and request a drain.
    ///
    /// This is the only engine entry point that surfaces a persistence
    /// failure to its caller; executor failures are observed via
    /// `get_failed`, `get_status`, or the `failed` event.
    pub async fn enqueue(&self, kind: TxnKind) -> Result<Transaction, EngineError> {
        self.enqueue_with(kind, EnqueueOptions::default()).await
    }

    pub async fn enqueue_with(
        &self,
        kind: TxnKind,
        opts: EnqueueOptions,
    ) -> Result<Transaction, EngineError> {
        let max_retries = opts.max_retries.unwrap_or(self.config.retry.max_retries);
        let txn = Transaction::with_max_retries(kind, max_retries);

        let mut queue = self.queue.lock().await;
        queue.transactions.push(txn.clone());
        if let Err(e) = self.persist(&queue).await {
            // Keep memory and disk consistent: an unpersisted record is not
            // durable and must not linger in the queue.
            queue.transactions.pop();
            return Err(e);
        }
        drop(queue);

        tracing::info!(txn = %txn.id, kind = txn.kind.type_name(), "transaction enqueued");
        self.bus.emit(&TxnEvent::Created(txn.clone()));
        self.request_drain();
        Ok(txn)
    }

    /// Re-admit a failed transaction: budget and error reset, back to
    /// pending, drain requested.
    pub async fn retry(&self, id: TxnId) -> Result<(), EngineError> {
        let mut queue = self.queue.lock().await;
        let txn = queue.find_mut(id).ok_or(EngineError::NotFound(id))?;
        if txn.status != TxnStatus::Failed {
            return Err(EngineError::NotFailed {
                id,
                status: txn.status,
            });
        }
        txn.reset_for_retry();
        self.persist(&queue).await?;
        drop(queue);

        tracing::info!(txn = %id, "transaction re-admitted by user retry");
        self.request_drain();
        Ok(())
    }

    /// Remove a transaction that has not been delivered.
    ///
    /// A confirmed transaction cannot be cancelled, and one with an attempt
    /// in flight must wait for that attempt to resolve.
    pub async fn cancel(&self, id: TxnId) -> Result<(), EngineError> {
        let mut queue = self.queue.lock().await;
        let txn = queue.find_mut(id).ok_or(EngineError::NotFound(id))?;
        match txn.status {
            TxnStatus::Confirmed => return Err(EngineError::AlreadyConfirmed(id)),
            TxnStatus::Syncing => return Err(EngineError::SyncInFlight(id)),
            _ => {}
        }

        let removed = txn.clone();
        queue.transactions.retain(|t| t.id != id);
        self.persist(&queue).await?;
        drop(queue);

        tracing::info!(txn = %id, "transaction cancelled");
        self.bus.emit(&TxnEvent::Cancelled(removed));
        Ok(())
    }

    pub async fn get_pending(&self) -> Vec<Transaction> {
        self.by_status(TxnStatus::Pending).await
    }

    pub async fn get_failed(&self) -> Vec<Transaction> {
        self.by_status(TxnStatus::Failed).await
    }

    async fn by_status(&self, status: TxnStatus) -> Vec<Transaction> {
        let queue = self.queue.lock().await;
        queue
            .transactions
            .iter()
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    pub async fn get_status(&self) -> StatusCounts {
        let queue = self.queue.lock().await;
        let mut counts = StatusCounts::default();
        for txn in &queue.transactions {
            match txn.status {
                TxnStatus::Pending => counts.pending += 1,
                TxnStatus::Syncing => counts.syncing += 1,
                TxnStatus::Failed => counts.failed += 1,
                TxnStatus::Confirmed => counts.confirmed += 1,
                TxnStatus::Conflict => counts.conflict += 1,
            }
        }
        counts
    }

    /// Housekeeping sweep: delete confirmed transactions older than
    /// `max_age`. Returns how many were removed.
    pub async fn clear_old_confirmed(&self, max_age: Duration) -> Result<usize, EngineError> {
        // A retention window beyond the representable time range keeps
        // everything; nothing can be older than that.
        let Ok(age) = chrono::Duration::from_std(max_age) else {
            return Ok(0);
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return Ok(0);
        };

        let mut queue = self.queue.lock().await;
        let before = queue.transactions.len();
        queue.transactions.retain(|t| {
            t.status != TxnStatus::Confirmed
                || t.last_attempt_at.unwrap_or(t.created_at) >= cutoff
        });
        let removed = before - queue.transactions.len();
        if removed > 0 {
            self.persist(&queue).await?;
            tracing::debug!(removed, "cleared old confirmed transactions");
        }
        Ok(removed)
    }

    /// Whether any transaction is eligible for a drain pass.
    pub async fn has_eligible(&self) -> bool {
        let queue = self.queue.lock().await;
        queue.transactions.iter().any(Transaction::is_eligible)
    }

    /// Ask the scheduler for an immediate drain. Never blocks; coalesces
    /// with any drain request already outstanding.
    pub fn request_drain(&self) {
        self.drain_requests.notify_one();
    }

    /// Resolves when a drain has been requested. Used by the scheduler.
    pub(crate) async fn drain_requested(&self) {
        self.drain_requests.notified().await;
    }

    /// One drain pass over the queue.
    ///
    /// Single-flight: if a pass is already running this call is a no-op
    /// (remaining work is picked up by the next tick or request). The set
    /// of eligible transactions is snapshotted at the start and processed
    /// strictly in creation order, one attempt at a time; operations on the
    /// same item stay in the order the user issued them.
    pub async fn process_queue(&self) -> Result<(), EngineError> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("drain already in flight; request ignored");
            return Ok(());
        }

        let result = self.drain_pass().await;
        self.draining.store(false, Ordering::Release);
        result
    }

    async fn drain_pass(&self) -> Result<(), EngineError> {
        let eligible: Vec<TxnId> = {
            let queue = self.queue.lock().await;
            queue
                .transactions
                .iter()
                .filter(|t| t.is_eligible())
                .map(|t| t.id)
                .collect()
        };

        if eligible.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = eligible.len(), "drain pass starting");

        let mut confirmed_any = false;
        for id in eligible {
            // Re-check under the lock: the record may have been cancelled
            // or already resolved since the pass snapshot was taken.
            let picked = {
                let mut queue = self.queue.lock().await;
                match queue.find_mut(id) {
                    Some(txn) if txn.is_eligible() => {
                        txn.begin_attempt();
                        let picked = txn.clone();
                        self.persist(&queue).await?;
                        Some(picked)
                    }
                    _ => None,
                }
            };
            let Some(txn) = picked else { continue };
            self.bus.emit(&TxnEvent::Syncing(txn.clone()));

            // The remote call runs without the queue lock so enqueue and
            // reads stay non-blocking during the attempt.
            let outcome = self.executor.execute(&txn).await;

            let mut queue = self.queue.lock().await;
            let Some(txn) = queue.find_mut(id) else {
                continue;
            };

            match outcome {
                Ok(result) => {
                    txn.confirm(result.remote_id);
                    let confirmed = txn.clone();
                    self.persist(&queue).await?;
                    drop(queue);
                    confirmed_any = true;

                    tracing::info!(
                        txn = %id,
                        confirmed_id = confirmed.confirmed_id.as_deref().unwrap_or(""),
                        attempts = confirmed.retry_count,
                        "transaction confirmed"
                    );
                    self.bus.emit(&TxnEvent::Confirmed {
                        transaction: confirmed,
                        result: result.body,
                    });
                }
                Err(err) => self.settle_failure(queue, id, err).await?,
            }
        }

        if confirmed_any {
            let mut queue = self.queue.lock().await;
            queue.last_sync_at = Some(Utc::now());
            self.persist(&queue).await?;
        }

        Ok(())
    }

    async fn settle_failure(
        &self,
        mut queue: tokio::sync::MutexGuard<'_, QueueState>,
        id: TxnId,
        err: RemoteError,
    ) -> Result<(), EngineError> {
        let Some(txn) = queue.find_mut(id) else {
            return Ok(());
        };

        if err.is_conflict() {
            txn.mark_conflict(err.to_string());
            let settled = txn.clone();
            self.persist(&queue).await?;
            drop(queue);

            tracing::warn!(txn = %id, error = %err, "transaction in conflict; needs resolution");
            self.bus.emit(&TxnEvent::Failed(settled));
            return Ok(());
        }

        let retry = &self.config.retry;
        if retry.should_retry(&err, txn.retry_count, txn.max_retries) {
            txn.fail(err.to_string(), false);
            let attempt = txn.retry_count;
            self.persist(&queue).await?;
            drop(queue);

            // Log-level signal only; the next tick provides the spacing.
            tracing::debug!(
                txn = %id,
                attempt,
                backoff_hint_secs = retry.backoff_hint(attempt).as_secs(),
                error = %err,
                "attempt failed; eligible again on a later tick"
            );
        } else {
            txn.fail(err.to_string(), true);
            let settled = txn.clone();
            self.persist(&queue).await?;
            drop(queue);

            tracing::warn!(txn = %id, error = %err, "transaction terminally failed");
            self.bus.emit(&TxnEvent::Failed(settled));
        }
        Ok(())
    }

    async fn persist(&self, queue: &QueueState) -> Result<(), EngineError> {
        self.store.save(&queue.snapshot()).await?;
        Ok(())
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("draining", &self.draining.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
