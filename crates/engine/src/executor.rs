//! Executor contract: one transaction, one remote call.
//!
//! The executor performs no retries, no state mutation, and no
//! persistence; all of that is the engine's responsibility. Because an
//! attempt may be re-issued after a lost response, remote endpoints must be
//! safe to call more than once with the same logical intent (server-side
//! de-duplication contract).

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use talon_core::{RemoteError, Transaction, TxnId, TxnKind};

pub mod http;

pub use http::HttpExecutor;

/// Outcome of one successful remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResult {
    /// The remote system's identifier for the created/affected resource,
    /// when the response carries one.
    pub remote_id: Option<String>,
    /// Raw response payload, forwarded to `confirmed` subscribers.
    pub body: Value,
}

impl RemoteResult {
    pub fn with_id(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: Some(remote_id.into()),
            body: Value::Null,
        }
    }

    /// Build a result from a response body, lifting its `id` field when
    /// present.
    pub fn from_body(body: Value) -> Self {
        let remote_id = body
            .get("id")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        Self { remote_id, body }
    }
}

/// Maps a transaction's kind and payload to exactly one remote operation.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, txn: &Transaction) -> Result<RemoteResult, RemoteError>;
}

/// Scripted executor for tests/dev.
///
/// Outcomes are consumed in push order; once the script is exhausted every
/// call succeeds with an id-less result. Each call is recorded so tests can
/// assert ordering and payload stability across retries.
#[derive(Debug, Default)]
pub struct MockExecutor {
    script: Mutex<VecDeque<Result<RemoteResult, RemoteError>>>,
    calls: Mutex<Vec<(TxnId, TxnKind)>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, remote_id: impl Into<String>) {
        self.push(Ok(RemoteResult::with_id(remote_id)));
    }

    pub fn push_err(&self, error: RemoteError) {
        self.push(Err(error));
    }

    pub fn push(&self, outcome: Result<RemoteResult, RemoteError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Every call made so far, in invocation order.
    pub fn calls(&self) -> Vec<(TxnId, TxnKind)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn execute(&self, txn: &Transaction) -> Result<RemoteResult, RemoteError> {
        self.calls.lock().unwrap().push((txn.id, txn.kind.clone()));
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(RemoteResult {
                remote_id: None,
                body: Value::Null,
            })
        })
    }
}
