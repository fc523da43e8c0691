//! `talon-engine` — durable offline transaction engine.
//!
//! Records user-initiated mutations instantly and durably, then delivers
//! each one to the remote service exactly once in effect, despite
//! intermittent or absent connectivity.
//!
//! ## Components
//!
//! - [`store::SnapshotStore`]: restart-safe persistence of the queue
//! - [`executor::Executor`]: maps a transaction to one remote call
//! - [`bus::TxnEventBus`]: in-process lifecycle notifications
//! - [`engine::SyncEngine`]: the queue, its state machine, single-flight
//!   drain passes
//! - [`scheduler::SyncScheduler`]: the timer + signal loop that drains it
//!
//! Data flow: caller → `enqueue()` → store persists → scheduler triggers a
//! drain → executor performs the remote call per transaction → store
//! persists the result → event bus notifies.

pub mod bus;
pub mod config;
pub mod engine;
pub mod executor;
pub mod scheduler;
pub mod store;

pub use bus::{SubscriptionId, TxnEvent, TxnEventBus};
pub use config::EngineConfig;
pub use engine::{EngineError, EnqueueOptions, StatusCounts, SyncEngine};
pub use executor::{Executor, MockExecutor, RemoteResult};
pub use scheduler::{SchedulerHandle, SyncScheduler};
pub use store::{MemoryStore, QueueSnapshot, SnapshotStore, SqliteStore, StoreError};
