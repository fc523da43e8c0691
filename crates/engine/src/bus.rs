//! In-process lifecycle notifications.
//!
//! Typed tagged events delivered synchronously, in emission order, to
//! subscribers registered on the bus. A panicking subscriber is isolated:
//! it is caught and logged, and emission continues to the rest.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use talon_core::Transaction;

/// A lifecycle transition, carrying the post-mutation record.
#[derive(Debug, Clone)]
pub enum TxnEvent {
    Created(Transaction),
    Syncing(Transaction),
    Confirmed {
        transaction: Transaction,
        /// Raw remote result payload.
        result: Value,
    },
    Failed(Transaction),
    Cancelled(Transaction),
}

impl TxnEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TxnEvent::Created(_) => "created",
            TxnEvent::Syncing(_) => "syncing",
            TxnEvent::Confirmed { .. } => "confirmed",
            TxnEvent::Failed(_) => "failed",
            TxnEvent::Cancelled(_) => "cancelled",
        }
    }

    pub fn transaction(&self) -> &Transaction {
        match self {
            TxnEvent::Created(t)
            | TxnEvent::Syncing(t)
            | TxnEvent::Failed(t)
            | TxnEvent::Cancelled(t) => t,
            TxnEvent::Confirmed { transaction, .. } => transaction,
        }
    }
}

/// Handle returned by `subscribe`; pass back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn Fn(&TxnEvent) + Send>;

/// Observer registry keyed by subscription id.
#[derive(Default)]
pub struct TxnEventBus {
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_id: AtomicU64,
}

impl TxnEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Observers are invoked in registration order.
    pub fn subscribe<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&TxnEvent) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push((id, Box::new(f)));
        }
        id
    }

    /// Remove an observer. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(mut subs) = self.subscribers.lock() else {
            return false;
        };
        let before = subs.len();
        subs.retain(|(sub_id, _)| *sub_id != id);
        subs.len() != before
    }

    /// Deliver one event to every subscriber, synchronously and in
    /// registration order.
    pub fn emit(&self, event: &TxnEvent) {
        let Ok(subs) = self.subscribers.lock() else {
            return;
        };
        for (id, subscriber) in subs.iter() {
            if catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
                tracing::warn!(
                    event = event.name(),
                    subscription = id.0,
                    "event subscriber panicked; continuing emission"
                );
            }
        }
    }
}

impl std::fmt::Debug for TxnEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.subscribers.lock().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("TxnEventBus")
            .field("subscribers", &count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use talon_core::TxnKind;

    fn sample_event() -> TxnEvent {
        TxnEvent::Created(Transaction::new(TxnKind::capture("milk")))
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let bus = TxnEventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let log = log.clone();
            bus.subscribe(move |_| log.lock().unwrap().push(tag));
        }

        bus.emit(&sample_event());
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = TxnEventBus::new();
        let count = Arc::new(AtomicU64::new(0));

        let counter = count.clone();
        let id = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&sample_event());
        assert!(bus.unsubscribe(id));
        bus.emit(&sample_event());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn panicking_subscriber_does_not_halt_emission() {
        let bus = TxnEventBus::new();
        let reached = Arc::new(AtomicU64::new(0));

        bus.subscribe(|_| panic!("subscriber bug"));
        let reached_clone = reached.clone();
        bus.subscribe(move |_| {
            reached_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&sample_event());
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn confirmed_event_carries_raw_result() {
        let mut txn = Transaction::new(TxnKind::strike("c1"));
        txn.begin_attempt();
        txn.confirm(Some("srv-1".into()));

        let event = TxnEvent::Confirmed {
            transaction: txn,
            result: serde_json::json!({"id": "srv-1"}),
        };
        assert_eq!(event.name(), "confirmed");
        assert_eq!(event.transaction().confirmed_id.as_deref(), Some("srv-1"));
    }
}
