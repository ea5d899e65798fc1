//! Shared fixtures for the integration tests.
//!
//! `FaultyStore` wraps an `InMemoryStore` and fails a chosen number of
//! upcoming calls; `ConflictingStore` reports a version mismatch on every
//! conditional write.
#![allow(dead_code)]

use async_trait::async_trait;
use contendb::{
    ContentionError, Counter, CounterStore, CounterTransaction, InMemoryStore, LockedCounter,
    MembershipKey, ResourceId, Result, StoreConfig, TransactionId,
};
use contendb::core::WriteOutcome;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const HOT: ResourceId = ResourceId(1);

pub async fn seeded_store(config: StoreConfig) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::with_config(config));
    store.create_counter(HOT, 0).await.unwrap();
    store
}

fn take(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn injected(what: &str) -> ContentionError {
    ContentionError::Storage(format!("injected {what} failure"))
}

#[derive(Debug, Default)]
pub struct Faults {
    /// Upcoming counter writes to fail (apply_delta, compare_and_set, commit)
    pub counter_writes: AtomicUsize,
    /// Upcoming membership inserts to fail
    pub inserts: AtomicUsize,
    /// Upcoming membership deletes to fail
    pub deletes: AtomicUsize,
}

pub struct FaultyStore {
    pub inner: Arc<InMemoryStore>,
    pub faults: Arc<Faults>,
}

impl FaultyStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }

    pub fn fail_counter_writes(&self, n: usize) {
        self.faults.counter_writes.store(n, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self, n: usize) {
        self.faults.inserts.store(n, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, n: usize) {
        self.faults.deletes.store(n, Ordering::SeqCst);
    }
}

pub struct FaultyTransaction {
    inner: CounterTransaction,
    faults: Arc<Faults>,
}

#[async_trait]
impl LockedCounter for FaultyTransaction {
    fn transaction_id(&self) -> TransactionId {
        self.inner.transaction_id()
    }

    fn counter(&self) -> Counter {
        self.inner.counter()
    }

    fn set_value(&mut self, value: i64) -> Result<()> {
        self.inner.set_value(value)
    }

    async fn commit(self) -> Result<Counter> {
        if take(&self.faults.counter_writes) {
            self.inner.rollback().await;
            return Err(injected("commit"));
        }
        self.inner.commit().await
    }

    async fn rollback(self) {
        self.inner.rollback().await
    }
}

#[async_trait]
impl CounterStore for FaultyStore {
    type Transaction = FaultyTransaction;

    async fn create_counter(&self, id: ResourceId, initial: i64) -> Result<Counter> {
        self.inner.create_counter(id, initial).await
    }

    async fn read_counter(&self, id: ResourceId) -> Result<Counter> {
        self.inner.read_counter(id).await
    }

    async fn apply_delta(&self, id: ResourceId, delta: i64) -> Result<Counter> {
        if take(&self.faults.counter_writes) {
            return Err(injected("update"));
        }
        self.inner.apply_delta(id, delta).await
    }

    async fn compare_and_set(&self, id: ResourceId, expected_version: u64, new_value: i64) -> Result<WriteOutcome> {
        if take(&self.faults.counter_writes) {
            return Err(injected("update"));
        }
        self.inner.compare_and_set(id, expected_version, new_value).await
    }

    async fn lock_for_update(&self, id: ResourceId) -> Result<FaultyTransaction> {
        let inner = self.inner.lock_for_update(id).await?;
        Ok(FaultyTransaction {
            inner,
            faults: Arc::clone(&self.faults),
        })
    }

    async fn insert_membership(&self, key: MembershipKey) -> Result<()> {
        if take(&self.faults.inserts) {
            return Err(injected("insert"));
        }
        self.inner.insert_membership(key).await
    }

    async fn delete_membership(&self, key: MembershipKey) -> Result<bool> {
        if take(&self.faults.deletes) {
            return Err(injected("delete"));
        }
        self.inner.delete_membership(key).await
    }

    async fn membership_exists(&self, key: MembershipKey) -> Result<bool> {
        self.inner.membership_exists(key).await
    }

    async fn count_memberships(&self, resource: ResourceId) -> Result<usize> {
        self.inner.count_memberships(resource).await
    }
}

/// Every conditional write loses, as if another writer always got there
/// first.
pub struct ConflictingStore {
    pub inner: Arc<InMemoryStore>,
    pub conditional_writes: AtomicUsize,
}

impl ConflictingStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            conditional_writes: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.conditional_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for ConflictingStore {
    type Transaction = CounterTransaction;

    async fn create_counter(&self, id: ResourceId, initial: i64) -> Result<Counter> {
        self.inner.create_counter(id, initial).await
    }

    async fn read_counter(&self, id: ResourceId) -> Result<Counter> {
        self.inner.read_counter(id).await
    }

    async fn apply_delta(&self, id: ResourceId, delta: i64) -> Result<Counter> {
        self.inner.apply_delta(id, delta).await
    }

    async fn compare_and_set(&self, id: ResourceId, _expected_version: u64, _new_value: i64) -> Result<WriteOutcome> {
        self.conditional_writes.fetch_add(1, Ordering::SeqCst);
        let current = self.inner.read_counter(id).await?;
        Ok(WriteOutcome::VersionMismatch { current })
    }

    async fn lock_for_update(&self, id: ResourceId) -> Result<CounterTransaction> {
        self.inner.lock_for_update(id).await
    }

    async fn insert_membership(&self, key: MembershipKey) -> Result<()> {
        self.inner.insert_membership(key).await
    }

    async fn delete_membership(&self, key: MembershipKey) -> Result<bool> {
        self.inner.delete_membership(key).await
    }

    async fn membership_exists(&self, key: MembershipKey) -> Result<bool> {
        self.inner.membership_exists(key).await
    }

    async fn count_memberships(&self, resource: ResourceId) -> Result<usize> {
        self.inner.count_memberships(resource).await
    }
}
