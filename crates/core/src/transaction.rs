//! The transaction record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{OptimisticId, TxnId};
use crate::kind::TxnKind;
use crate::retry::DEFAULT_MAX_RETRIES;

/// Lifecycle status of a queued transaction.
///
/// `pending → syncing → confirmed | failed`; `failed → pending` only via an
/// explicit retry. `conflict` is reserved for remote-detected irreconcilable
/// conflicts and has no automatic transition out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnStatus {
    Pending,
    Syncing,
    Confirmed,
    Failed,
    Conflict,
}

impl TxnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnStatus::Pending => "pending",
            TxnStatus::Syncing => "syncing",
            TxnStatus::Confirmed => "confirmed",
            TxnStatus::Failed => "failed",
            TxnStatus::Conflict => "conflict",
        }
    }
}

/// One durable record of a user-initiated mutation awaiting (or having
/// completed) delivery to the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxnId,
    #[serde(flatten)]
    pub kind: TxnKind,
    pub status: TxnStatus,
    /// Attempts made so far. Incremented at the start of each attempt,
    /// reset only by an explicit retry.
    pub retry_count: u32,
    /// Retry budget, fixed at creation.
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub optimistic_id: OptimisticId,
    /// Remote identifier of the affected resource. Present iff confirmed.
    pub confirmed_id: Option<String>,
    /// Last failure reason, for user display. Cleared on manual retry.
    pub error_message: Option<String>,
    /// Whether the last failure was classified non-retryable. A terminal
    /// failure is never picked up automatically, whatever budget remains;
    /// only an explicit retry clears it.
    #[serde(default)]
    pub terminal: bool,
}

impl Transaction {
    pub fn new(kind: TxnKind) -> Self {
        Self::with_max_retries(kind, DEFAULT_MAX_RETRIES)
    }

    pub fn with_max_retries(kind: TxnKind, max_retries: u32) -> Self {
        Self {
            id: TxnId::new(),
            kind,
            status: TxnStatus::Pending,
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            last_attempt_at: None,
            optimistic_id: OptimisticId::new(),
            confirmed_id: None,
            error_message: None,
            terminal: false,
        }
    }

    /// Eligible for pick-up in a drain pass: pending, or failed
    /// retryably with remaining retry budget.
    pub fn is_eligible(&self) -> bool {
        match self.status {
            TxnStatus::Pending => true,
            TxnStatus::Failed => !self.terminal && self.retry_count < self.max_retries,
            _ => false,
        }
    }

    /// Mark the start of one execution attempt.
    pub fn begin_attempt(&mut self) {
        self.status = TxnStatus::Syncing;
        self.last_attempt_at = Some(Utc::now());
        self.retry_count += 1;
    }

    /// Record executor success. Falls back to the optimistic id when the
    /// remote response carries no identifier.
    pub fn confirm(&mut self, remote_id: Option<String>) {
        self.confirmed_id = Some(remote_id.unwrap_or_else(|| self.optimistic_id.to_string()));
        self.status = TxnStatus::Confirmed;
    }

    /// Record executor failure. `terminal` marks a non-retryable
    /// classification (or an exhausted budget): no automatic pick-up will
    /// follow, only an explicit retry.
    pub fn fail(&mut self, message: impl Into<String>, terminal: bool) {
        self.error_message = Some(message.into());
        self.status = TxnStatus::Failed;
        self.terminal = terminal;
    }

    /// Record a remote-detected irreconcilable conflict. Terminal; requires
    /// external resolution.
    pub fn mark_conflict(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.terminal = true;
        self.status = TxnStatus::Conflict;
    }

    /// Re-admit a failed transaction at the user's request: budget and
    /// error are reset, status returns to pending.
    pub fn reset_for_retry(&mut self) {
        debug_assert_eq!(self.status, TxnStatus::Failed);
        self.retry_count = 0;
        self.error_message = None;
        self.terminal = false;
        self.status = TxnStatus::Pending;
    }
}
