//! Remote-failure taxonomy.

use thiserror::Error;

/// An error surfaced by the executor for one remote attempt.
///
/// The engine classifies every failure into this taxonomy and either
/// re-admits the transaction for another attempt or marks it terminally
/// failed. The executor raises the raw error; it never retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connectivity/transport failure (DNS, refused, reset, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote rate-limited the call (HTTP 429 or equivalent).
    #[error("rate limited")]
    RateLimited,

    /// Remote server error (5xx-class).
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Remote client error other than rate-limit (bad request, auth,
    /// not-found, validation). Never retried automatically.
    #[error("client error ({status}): {message}")]
    Client { status: u16, message: String },

    /// The remote detected an irreconcilable conflict (HTTP 409).
    /// Terminal; resolution happens outside the engine.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Anything unclassified. Defaults to retryable, erring toward
    /// availability over fast-fail.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl RemoteError {
    /// Whether the engine may schedule another automatic attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport(_)
            | RemoteError::RateLimited
            | RemoteError::Server { .. }
            | RemoteError::Unknown(_) => true,
            RemoteError::Client { .. } | RemoteError::Conflict(_) => false,
        }
    }

    /// Whether this failure surfaces the reserved `conflict` status.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Conflict(_))
    }

    /// Classify an HTTP response status with its body/message.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => RemoteError::RateLimited,
            409 => RemoteError::Conflict(message),
            400..=499 => RemoteError::Client { status, message },
            500..=599 => RemoteError::Server { status, message },
            _ => RemoteError::Unknown(format!("unexpected status {status}: {message}")),
        }
    }
}
