/// Row-lock strategy tests: serialization, lock timeouts, cancellation
///
/// Run with: cargo test --test pessimistic_lock_tests

mod common;

use common::{FaultyStore, HOT, seeded_store};
use contendb::{
    ActorId, ContentionError, CounterStore, CounterStrategy, LockedCounter, MembershipOutcome,
    PessimisticLockStrategy, StoreConfig, TransactionState,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_increments_are_serialized() {
    let store = seeded_store(StoreConfig::default().lock_timeout(Duration::from_secs(30))).await;
    let strategy = Arc::new(PessimisticLockStrategy::new(Arc::clone(&store)));

    let gate = Arc::new(Barrier::new(200));
    let mut handles = vec![];
    for _ in 0..200 {
        let strategy = Arc::clone(&strategy);
        let gate = Arc::clone(&gate);
        handles.push(tokio::spawn(async move {
            gate.wait().await;
            strategy.increment(HOT).await.unwrap().value
        }));
    }

    let mut seen = BTreeSet::new();
    for handle in handles {
        assert!(seen.insert(handle.await.unwrap()), "two increments saw the same value");
    }

    // Each increment observed the previous one: post-values are exactly 1..=N.
    assert_eq!(seen, (1..=200).collect::<BTreeSet<i64>>());
    assert_eq!(store.read_counter(HOT).await.unwrap().version, 200);
}

#[tokio::test]
async fn test_waiter_times_out_behind_holder() {
    let store = seeded_store(StoreConfig::default().lock_timeout(Duration::from_millis(50))).await;
    let strategy = PessimisticLockStrategy::new(Arc::clone(&store));

    let holder = store.lock_for_update(HOT).await.unwrap();
    let started = std::time::Instant::now();
    let err = strategy.increment(HOT).await.unwrap_err();

    assert!(matches!(err, ContentionError::LockTimeout { resource, .. } if resource == HOT));
    assert!(err.is_retryable());
    assert!(started.elapsed() >= Duration::from_millis(50));

    holder.rollback().await;
    assert_eq!(strategy.increment(HOT).await.unwrap().value, 1);
}

#[tokio::test]
async fn test_atomic_update_waits_behind_row_lock() {
    let store = seeded_store(StoreConfig::default().lock_timeout(Duration::from_millis(30))).await;

    let holder = store.lock_for_update(HOT).await.unwrap();
    let err = store.apply_delta(HOT, 1).await.unwrap_err();
    assert_eq!(err.kind(), "lock_timeout");
    drop(holder);

    assert_eq!(store.apply_delta(HOT, 1).await.unwrap().value, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_holder_releases_lock() {
    let store = seeded_store(StoreConfig::default().lock_timeout(Duration::from_millis(500))).await;
    let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();

    let task = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let mut txn = store.lock_for_update(HOT).await.unwrap();
            txn.set_value(99).unwrap();
            let _ = locked_tx.send(());
            std::future::pending::<()>().await;
            txn.commit().await.unwrap();
        })
    };

    locked_rx.await.unwrap();
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    // Staged value was never published and the row is free again.
    let txn = store.lock_for_update(HOT).await.unwrap();
    assert_eq!(txn.counter().value, 0);
    txn.rollback().await;
    assert_eq!(store.read_counter(HOT).await.unwrap().version, 0);
}

#[tokio::test]
async fn test_dropped_future_mid_wait_does_not_leak() {
    let store = seeded_store(StoreConfig::default().lock_timeout(Duration::from_secs(5))).await;
    let strategy = PessimisticLockStrategy::new(Arc::clone(&store));

    let holder = store.lock_for_update(HOT).await.unwrap();
    let waited = tokio::time::timeout(
        Duration::from_millis(20),
        strategy.add_membership(ActorId(1), HOT),
    )
    .await;
    assert!(waited.is_err());
    holder.rollback().await;

    assert_eq!(store.count_memberships(HOT).await.unwrap(), 0);
    assert_eq!(
        strategy.add_membership(ActorId(1), HOT).await.unwrap(),
        MembershipOutcome::Created
    );
}

#[tokio::test]
async fn test_transaction_lifecycle() {
    let store = seeded_store(StoreConfig::default()).await;

    let mut txn = store.lock_for_update(HOT).await.unwrap();
    assert_eq!(txn.state(), TransactionState::Active);
    txn.set_value(3).unwrap();
    assert_eq!(txn.counter().value, 3);
    assert!(txn.set_value(-1).is_err());

    let committed = txn.commit().await.unwrap();
    assert_eq!(committed.value, 3);
    assert_eq!(committed.version, 1);
    assert_eq!(store.read_counter(HOT).await.unwrap(), committed);
}

#[tokio::test]
async fn test_readers_do_not_wait_on_row_lock() {
    let store = seeded_store(StoreConfig::default().lock_timeout(Duration::from_millis(20))).await;
    let mut holder = store.lock_for_update(HOT).await.unwrap();
    holder.set_value(5).unwrap();

    let read = tokio::time::timeout(Duration::from_millis(10), store.read_counter(HOT))
        .await
        .expect("read blocked on row lock")
        .unwrap();
    assert_eq!(read.value, 0);

    holder.commit().await.unwrap();
    assert_eq!(store.read_counter(HOT).await.unwrap().value, 5);
}

#[tokio::test]
async fn test_unexpected_commit_error_propagates_and_reverts() {
    let inner = seeded_store(StoreConfig::default()).await;
    let store = Arc::new(FaultyStore::new(Arc::clone(&inner)));
    let strategy = PessimisticLockStrategy::new(Arc::clone(&store));

    store.fail_counter_writes(1);
    let err = strategy.add_membership(ActorId(1), HOT).await.unwrap_err();

    assert!(matches!(err, ContentionError::Storage(_)));
    assert!(!err.is_retryable());
    assert_eq!(inner.count_memberships(HOT).await.unwrap(), 0);
    assert_eq!(inner.read_counter(HOT).await.unwrap().value, 0);

    // Lock was released by the failed transaction.
    assert_eq!(
        strategy.add_membership(ActorId(1), HOT).await.unwrap(),
        MembershipOutcome::Created
    );
}

#[tokio::test]
async fn test_unexpected_insert_error_propagates() {
    let inner = seeded_store(StoreConfig::default()).await;
    let store = Arc::new(FaultyStore::new(Arc::clone(&inner)));
    let strategy = PessimisticLockStrategy::new(Arc::clone(&store));

    store.fail_inserts(1);
    let err = strategy.add_membership(ActorId(1), HOT).await.unwrap_err();

    assert_eq!(err.kind(), "storage");
    assert_eq!(inner.read_counter(HOT).await.unwrap().version, 0);
}
