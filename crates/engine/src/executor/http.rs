//! HTTP-backed executor.

use async_trait::async_trait;
use serde_json::{Value, json};

use talon_core::{RemoteError, Transaction, TxnKind};

use super::{Executor, RemoteResult};

/// Executor that delivers each transaction as one HTTP call against the
/// remote API.
///
/// Dispatch is pure: each kind maps to exactly one `(path, body)`; the
/// transaction id travels as an idempotency key so the server can
/// de-duplicate re-attempts whose first response was lost.
pub struct HttpExecutor {
    api_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Map a kind to its remote operation. All mutations POST.
    fn dispatch(kind: &TxnKind) -> (String, Value) {
        match kind {
            TxnKind::Capture { content, deadline } => (
                "/claws".to_string(),
                json!({ "content": content, "deadline": deadline }),
            ),
            TxnKind::Strike { claw_id } => (format!("/claws/{claw_id}/strike"), json!({})),
            TxnKind::ExtendDeadline {
                claw_id,
                new_deadline,
            } => (
                format!("/claws/{claw_id}/extend"),
                json!({ "new_deadline": new_deadline }),
            ),
            TxnKind::Release { claw_id } => (format!("/claws/{claw_id}/release"), json!({})),
            TxnKind::SetAlarm { claw_id, remind_at } => (
                format!("/claws/{claw_id}/alarm"),
                json!({ "remind_at": remind_at }),
            ),
            TxnKind::AddToCalendar {
                claw_id,
                title,
                starts_at,
            } => (
                format!("/claws/{claw_id}/calendar"),
                json!({ "title": title, "starts_at": starts_at }),
            ),
        }
    }

    fn map_transport_error(e: reqwest::Error) -> RemoteError {
        if e.is_decode() {
            RemoteError::Unknown(e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, txn: &Transaction) -> Result<RemoteResult, RemoteError> {
        let (path, body) = Self::dispatch(&txn.kind);
        let url = format!("{}{}", self.api_url, path);

        let mut req = self
            .client
            .post(&url)
            .header("X-Idempotency-Key", txn.id.to_string())
            .json(&body);

        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(Self::map_transport_error)?;
        let status = resp.status();

        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), message));
        }

        // Some endpoints reply with an empty body; treat that as Null.
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Ok(RemoteResult::from_body(body))
    }
}
