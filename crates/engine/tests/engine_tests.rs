//! End-to-end engine scenarios: enqueue, drain, retry, cancel, restart.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use talon_core::{RemoteError, Transaction, TxnKind, TxnStatus};
use talon_engine::{
    EngineConfig, EnqueueOptions, Executor, MemoryStore, MockExecutor, QueueSnapshot,
    RemoteResult, SnapshotStore, SyncEngine, TxnEvent,
};

fn server_error() -> RemoteError {
    RemoteError::Server {
        status: 500,
        message: "internal".into(),
    }
}

fn not_found() -> RemoteError {
    RemoteError::Client {
        status: 404,
        message: "no such claw".into(),
    }
}

async fn engine_over(
    store: Arc<dyn SnapshotStore>,
    executor: Arc<dyn Executor>,
) -> Arc<SyncEngine> {
    talon_observability::init();
    Arc::new(
        SyncEngine::open(store, executor, EngineConfig::default())
            .await
            .unwrap(),
    )
}

async fn fresh_engine(executor: Arc<MockExecutor>) -> Arc<SyncEngine> {
    engine_over(Arc::new(MemoryStore::new()), executor).await
}

#[tokio::test]
async fn capture_confirms_after_two_transient_server_errors() {
    let executor = Arc::new(MockExecutor::new());
    executor.push_err(server_error());
    executor.push_err(server_error());
    executor.push_ok("srv-claw-1");

    let engine = fresh_engine(executor.clone()).await;

    let confirmed = Arc::new(Mutex::new(Vec::new()));
    let sink = confirmed.clone();
    engine.events().subscribe(move |event| {
        if let TxnEvent::Confirmed { transaction, .. } = event {
            sink.lock().unwrap().push(transaction.clone());
        }
    });

    let txn = engine.enqueue(TxnKind::capture("milk")).await.unwrap();

    engine.process_queue().await.unwrap();
    engine.process_queue().await.unwrap();
    let midway = engine.get_failed().await;
    assert_eq!(midway.len(), 1);
    assert!(midway[0].confirmed_id.is_none());

    engine.process_queue().await.unwrap();

    let counts = engine.get_status().await;
    assert_eq!(counts.confirmed, 1);
    assert_eq!(counts.failed, 0);

    let calls = executor.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|(id, _)| *id == txn.id));
    // Same payload on every attempt, never duplicated into a second record.
    assert!(calls.iter().all(|(_, kind)| *kind == txn.kind));

    let confirmed = confirmed.lock().unwrap();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].id, txn.id);
    assert_eq!(confirmed[0].confirmed_id.as_deref(), Some("srv-claw-1"));
    assert_eq!(confirmed[0].retry_count, 3);
}

#[tokio::test]
async fn not_found_fails_terminally_after_exactly_one_attempt() {
    let executor = Arc::new(MockExecutor::new());
    executor.push_err(not_found());

    let engine = fresh_engine(executor.clone()).await;
    engine.enqueue(TxnKind::strike("x")).await.unwrap();

    engine.process_queue().await.unwrap();

    let failed = engine.get_failed().await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 1);
    assert!(failed[0].error_message.as_deref().unwrap().contains("404"));

    // No further automatic pick-up, whatever the remaining budget.
    engine.process_queue().await.unwrap();
    engine.process_queue().await.unwrap();
    assert_eq!(executor.calls().len(), 1);
}

#[tokio::test]
async fn cancel_before_any_drain_removes_the_record() {
    let engine = fresh_engine(Arc::new(MockExecutor::new())).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.events().subscribe(move |event| {
        sink.lock().unwrap().push(event.name());
    });

    let txn = engine.enqueue(TxnKind::release("c1")).await.unwrap();
    engine.cancel(txn.id).await.unwrap();

    assert_eq!(*events.lock().unwrap(), vec!["created", "cancelled"]);
    assert_eq!(engine.get_status().await, Default::default());

    engine.process_queue().await.unwrap();
    assert_eq!(engine.get_status().await, Default::default());
}

#[tokio::test]
async fn cancel_is_rejected_once_confirmed() {
    let executor = Arc::new(MockExecutor::new());
    executor.push_ok("srv-1");
    let engine = fresh_engine(executor).await;

    let txn = engine.enqueue(TxnKind::capture("milk")).await.unwrap();
    engine.process_queue().await.unwrap();

    assert!(engine.cancel(txn.id).await.is_err());
    assert_eq!(engine.get_status().await.confirmed, 1);
}

#[tokio::test]
async fn drain_preserves_enqueue_order_across_intermediate_failures() {
    let executor = Arc::new(MockExecutor::new());
    executor.push_ok("srv-1");
    executor.push_err(server_error());
    executor.push_ok("srv-3");

    let engine = fresh_engine(executor.clone()).await;
    let a = engine.enqueue(TxnKind::capture("first")).await.unwrap();
    let b = engine.enqueue(TxnKind::strike("second")).await.unwrap();
    let c = engine.enqueue(TxnKind::release("third")).await.unwrap();

    engine.process_queue().await.unwrap();

    let order: Vec<_> = executor.calls().iter().map(|(id, _)| *id).collect();
    assert_eq!(order, vec![a.id, b.id, c.id]);
}

#[tokio::test]
async fn budget_bounds_automatic_attempts_until_explicit_retry() {
    let executor = Arc::new(MockExecutor::new());
    executor.push_err(server_error());
    executor.push_err(server_error());

    let engine = fresh_engine(executor.clone()).await;
    let txn = engine
        .enqueue_with(
            TxnKind::strike("c1"),
            EnqueueOptions {
                max_retries: Some(2),
            },
        )
        .await
        .unwrap();

    for _ in 0..5 {
        engine.process_queue().await.unwrap();
    }

    // Exactly max_retries attempts; the third pick-up never happens.
    assert_eq!(executor.calls().len(), 2);
    let failed = engine.get_failed().await;
    assert_eq!(failed[0].retry_count, 2);

    engine.retry(txn.id).await.unwrap();
    let readmitted = engine.get_pending().await;
    assert_eq!(readmitted.len(), 1);
    assert_eq!(readmitted[0].retry_count, 0);
    assert!(readmitted[0].error_message.is_none());

    // Script exhausted: the mock now succeeds without a server id, so the
    // confirmed id falls back to the stable optimistic id.
    engine.process_queue().await.unwrap();
    let counts = engine.get_status().await;
    assert_eq!(counts.confirmed, 1);

    let snapshot = engine.get_pending().await;
    assert!(snapshot.is_empty());
    assert_eq!(executor.calls().len(), 3);
    let last = &executor.calls()[2];
    assert_eq!(last.0, txn.id);
}

#[tokio::test]
async fn retry_is_rejected_unless_failed() {
    let engine = fresh_engine(Arc::new(MockExecutor::new())).await;
    let txn = engine.enqueue(TxnKind::capture("milk")).await.unwrap();
    assert!(engine.retry(txn.id).await.is_err());
}

struct SlowExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl Executor for SlowExecutor {
    async fn execute(&self, _txn: &Transaction) -> Result<RemoteResult, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(RemoteResult::with_id("srv-slow"))
    }
}

#[tokio::test]
async fn overlapping_drains_never_pick_up_the_same_transaction_twice() {
    let executor = Arc::new(SlowExecutor {
        calls: AtomicUsize::new(0),
    });
    let engine = engine_over(Arc::new(MemoryStore::new()), executor.clone()).await;

    engine.enqueue(TxnKind::capture("milk")).await.unwrap();

    let (first, second) = tokio::join!(engine.process_queue(), engine.process_queue());
    first.unwrap();
    second.unwrap();

    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.get_status().await.confirmed, 1);
}

#[tokio::test]
async fn restart_rehydrates_and_readmits_interrupted_attempts() {
    let store = Arc::new(MemoryStore::new());

    let mut interrupted = Transaction::new(TxnKind::strike("c1"));
    interrupted.begin_attempt(); // crash mid-attempt: persisted as syncing

    let mut done = Transaction::new(TxnKind::capture("milk"));
    done.begin_attempt();
    done.confirm(Some("srv-1".into()));

    let queued = Transaction::new(TxnKind::release("c2"));

    store
        .save(&QueueSnapshot {
            transactions: vec![interrupted.clone(), done, queued],
            last_sync_at: Some(Utc::now()),
        })
        .await
        .unwrap();

    let engine = engine_over(store, Arc::new(MockExecutor::new())).await;
    let counts = engine.get_status().await;
    assert_eq!(counts.syncing, 0);
    assert_eq!(counts.pending, 2);
    assert_eq!(counts.confirmed, 1);

    let pending = engine.get_pending().await;
    assert!(pending.iter().any(|t| t.id == interrupted.id));
    // The interrupted attempt still counts toward the budget.
    assert_eq!(
        pending
            .iter()
            .find(|t| t.id == interrupted.id)
            .unwrap()
            .retry_count,
        1
    );
}

#[tokio::test]
async fn every_mutation_is_persisted_before_returning() {
    let store = Arc::new(MemoryStore::new());
    let executor = Arc::new(MockExecutor::new());
    executor.push_err(server_error());

    let engine = engine_over(store.clone(), executor).await;
    let txn = engine.enqueue(TxnKind::capture("milk")).await.unwrap();

    let on_disk = store.load().await.unwrap().unwrap();
    assert_eq!(on_disk.transactions.len(), 1);
    assert_eq!(on_disk.transactions[0].id, txn.id);
    assert_eq!(on_disk.transactions[0].status, TxnStatus::Pending);

    engine.process_queue().await.unwrap();
    let on_disk = store.load().await.unwrap().unwrap();
    assert_eq!(on_disk.transactions[0].status, TxnStatus::Failed);
    assert_eq!(on_disk.transactions[0].retry_count, 1);
}

#[tokio::test]
async fn conflict_is_surfaced_terminally_and_kept_out_of_drains() {
    let executor = Arc::new(MockExecutor::new());
    executor.push_err(RemoteError::Conflict("remote version newer".into()));

    let engine = fresh_engine(executor.clone()).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.events().subscribe(move |event| {
        sink.lock().unwrap().push((event.name(), event.transaction().status));
    });

    engine
        .enqueue(TxnKind::extend_deadline("c1", Utc::now()))
        .await
        .unwrap();
    engine.process_queue().await.unwrap();
    engine.process_queue().await.unwrap();

    assert_eq!(executor.calls().len(), 1);
    let counts = engine.get_status().await;
    assert_eq!(counts.conflict, 1);

    let seen = events.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            ("created", TxnStatus::Pending),
            ("syncing", TxnStatus::Syncing),
            ("failed", TxnStatus::Conflict),
        ]
    );
}

#[tokio::test]
async fn soft_failures_log_only_and_terminal_failures_publish() {
    let executor = Arc::new(MockExecutor::new());
    executor.push_err(server_error());
    executor.push_err(not_found());

    let engine = fresh_engine(executor).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.events().subscribe(move |event| {
        sink.lock().unwrap().push(event.name());
    });

    engine.enqueue(TxnKind::strike("c1")).await.unwrap();
    engine.process_queue().await.unwrap(); // soft: no failed event
    engine.process_queue().await.unwrap(); // terminal: failed event

    assert_eq!(
        *events.lock().unwrap(),
        vec!["created", "syncing", "syncing", "failed"]
    );
}

#[tokio::test]
async fn retention_sweep_deletes_only_old_confirmed_records() {
    let store = Arc::new(MemoryStore::new());

    let mut old = Transaction::new(TxnKind::capture("old"));
    old.begin_attempt();
    old.confirm(Some("srv-old".into()));
    old.last_attempt_at = Some(Utc::now() - chrono::Duration::days(8));

    let mut recent = Transaction::new(TxnKind::capture("recent"));
    recent.begin_attempt();
    recent.confirm(Some("srv-new".into()));

    let queued = Transaction::new(TxnKind::strike("c1"));

    store
        .save(&QueueSnapshot {
            transactions: vec![old, recent, queued],
            last_sync_at: None,
        })
        .await
        .unwrap();

    let engine = engine_over(store.clone(), Arc::new(MockExecutor::new())).await;
    let removed = engine
        .clear_old_confirmed(Duration::from_secs(7 * 24 * 3600))
        .await
        .unwrap();

    assert_eq!(removed, 1);
    let counts = engine.get_status().await;
    assert_eq!(counts.confirmed, 1);
    assert_eq!(counts.pending, 1);

    let on_disk = store.load().await.unwrap().unwrap();
    assert_eq!(on_disk.transactions.len(), 2);
}

#[tokio::test]
async fn retention_sweep_keeps_everything_for_an_out_of_range_age() {
    let store = Arc::new(MemoryStore::new());

    let mut confirmed = Transaction::new(TxnKind::capture("old"));
    confirmed.begin_attempt();
    confirmed.confirm(Some("srv-old".into()));
    confirmed.last_attempt_at = Some(Utc::now() - chrono::Duration::days(400));

    store
        .save(&QueueSnapshot {
            transactions: vec![confirmed],
            last_sync_at: None,
        })
        .await
        .unwrap();

    let engine = engine_over(store, Arc::new(MockExecutor::new())).await;
    let removed = engine
        .clear_old_confirmed(Duration::from_secs(u64::MAX))
        .await
        .unwrap();

    assert_eq!(removed, 0);
    assert_eq!(engine.get_status().await.confirmed, 1);
}

#[tokio::test]
async fn last_sync_at_advances_after_a_confirming_drain() {
    let store = Arc::new(MemoryStore::new());
    let executor = Arc::new(MockExecutor::new());
    executor.push_ok("srv-1");

    let engine = engine_over(store.clone(), executor).await;
    engine.enqueue(TxnKind::capture("milk")).await.unwrap();

    assert!(store.load().await.unwrap().unwrap().last_sync_at.is_none());
    engine.process_queue().await.unwrap();
    assert!(store.load().await.unwrap().unwrap().last_sync_at.is_some());
}
