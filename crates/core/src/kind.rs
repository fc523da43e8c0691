//! The closed set of user mutations the engine can deliver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user-initiated mutation, with its strongly-typed payload.
///
/// The set is closed because each variant maps to exactly one remote
/// operation shape; the executor's dispatch over it is exhaustive. The
/// serialized form is adjacently tagged (`type` + `payload`), matching the
/// persisted queue layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum TxnKind {
    /// Capture a new item.
    Capture {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deadline: Option<DateTime<Utc>>,
    },
    /// Mark an item done.
    Strike { claw_id: String },
    /// Push an item's deadline out.
    ExtendDeadline {
        claw_id: String,
        new_deadline: DateTime<Utc>,
    },
    /// Release an item without completing it.
    Release { claw_id: String },
    /// Schedule a reminder for an item.
    SetAlarm {
        claw_id: String,
        remind_at: DateTime<Utc>,
    },
    /// Mirror an item's deadline into the user's calendar.
    AddToCalendar {
        claw_id: String,
        title: String,
        starts_at: DateTime<Utc>,
    },
}

impl TxnKind {
    pub fn capture(content: impl Into<String>) -> Self {
        Self::Capture {
            content: content.into(),
            deadline: None,
        }
    }

    pub fn strike(claw_id: impl Into<String>) -> Self {
        Self::Strike {
            claw_id: claw_id.into(),
        }
    }

    pub fn extend_deadline(claw_id: impl Into<String>, new_deadline: DateTime<Utc>) -> Self {
        Self::ExtendDeadline {
            claw_id: claw_id.into(),
            new_deadline,
        }
    }

    pub fn release(claw_id: impl Into<String>) -> Self {
        Self::Release {
            claw_id: claw_id.into(),
        }
    }

    /// Stable name of the operation kind, as persisted in the `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            TxnKind::Capture { .. } => "capture",
            TxnKind::Strike { .. } => "strike",
            TxnKind::ExtendDeadline { .. } => "extend_deadline",
            TxnKind::Release { .. } => "release",
            TxnKind::SetAlarm { .. } => "set_alarm",
            TxnKind::AddToCalendar { .. } => "add_to_calendar",
        }
    }

    /// The existing item this mutation targets, if any.
    ///
    /// `Capture` creates a new item and has no target.
    pub fn claw_id(&self) -> Option<&str> {
        match self {
            TxnKind::Capture { .. } => None,
            TxnKind::Strike { claw_id }
            | TxnKind::ExtendDeadline { claw_id, .. }
            | TxnKind::Release { claw_id }
            | TxnKind::SetAlarm { claw_id, .. }
            | TxnKind::AddToCalendar { claw_id, .. } => Some(claw_id),
        }
    }
}
