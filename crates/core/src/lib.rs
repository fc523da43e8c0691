//! `talon-core` — domain model for the offline transaction engine.
//!
//! This crate contains **pure domain** primitives (no IO, no async): the
//! transaction record and its state machine, the closed set of operation
//! kinds, the remote-error taxonomy, and the retry policy.

pub mod error;
pub mod id;
pub mod kind;
pub mod retry;
pub mod transaction;

pub use error::RemoteError;
pub use id::{OptimisticId, TxnId};
pub use kind::TxnKind;
pub use retry::RetryPolicy;
pub use transaction::{Transaction, TxnStatus};
