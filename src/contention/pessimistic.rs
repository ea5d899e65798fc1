use super::{CounterStrategy, MembershipGuard, StrategyKind};
use crate::core::{
    ActorId, Counter, MembershipKey, MembershipOutcome, RemovalOutcome, ResourceId, Result,
};
use crate::storage::{CounterStore, LockedCounter};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

/// Lock the row, read, write, commit.
///
/// Increments on one resource are serialized in lock-acquisition order. A
/// caller may wait up to the store's lock timeout for someone else's
/// transaction. The lock never outlives the transaction: every exit path,
/// including cancellation of the calling future, drops it.
pub struct PessimisticLockStrategy<S> {
    store: Arc<S>,
    guard: MembershipGuard<S>,
}

impl<S: CounterStore> PessimisticLockStrategy<S> {
    pub fn new(store: Arc<S>) -> Self {
        let guard = MembershipGuard::new(Arc::clone(&store));
        Self { store, guard }
    }

    async fn update_locked(&self, resource: ResourceId, delta: i64) -> Result<Counter> {
        let txn = self.store.lock_for_update(resource).await?;
        Self::apply_in(txn, delta).await
    }

    /// Stages `value + delta` (skipped when it would go below zero) and
    /// commits, releasing the lock.
    async fn apply_in(mut txn: S::Transaction, delta: i64) -> Result<Counter> {
        let next = txn.counter().value + delta;
        if next >= 0 {
            txn.set_value(next)?;
        }
        txn.commit().await
    }
}

#[async_trait]
impl<S: CounterStore> CounterStrategy for PessimisticLockStrategy<S> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Pessimistic
    }

    async fn increment(&self, resource: ResourceId) -> Result<Counter> {
        self.update_locked(resource, 1).await
    }

    async fn decrement(&self, resource: ResourceId) -> Result<Counter> {
        self.update_locked(resource, -1).await
    }

    async fn add_membership(&self, actor: ActorId, resource: ResourceId) -> Result<MembershipOutcome> {
        let key = MembershipKey::new(actor, resource);
        let txn = self.store.lock_for_update(resource).await?;

        match self.guard.try_acquire(actor, resource).await {
            Ok(MembershipOutcome::Created) => {}
            Ok(MembershipOutcome::AlreadyExists) => {
                txn.rollback().await;
                return Ok(MembershipOutcome::AlreadyExists);
            }
            Err(err) => {
                txn.rollback().await;
                error!(%actor, %resource, kind = err.kind(), error = %err, "membership insert failed under row lock");
                return Err(err);
            }
        }

        match Self::apply_in(txn, 1).await {
            Ok(counter) => {
                debug!(%actor, %resource, value = counter.value, "membership added");
                Ok(MembershipOutcome::Created)
            }
            Err(err) => {
                error!(%actor, %resource, kind = err.kind(), error = %err, "locked increment failed");
                self.guard.undo_acquire(key, &err).await;
                Err(err)
            }
        }
    }

    async fn remove_membership(&self, actor: ActorId, resource: ResourceId) -> Result<RemovalOutcome> {
        let key = MembershipKey::new(actor, resource);
        let txn = self.store.lock_for_update(resource).await?;

        match self.guard.release(actor, resource).await {
            Ok(true) => {}
            Ok(false) => {
                txn.rollback().await;
                return Ok(RemovalOutcome::NotMember);
            }
            Err(err) => {
                txn.rollback().await;
                return Err(err);
            }
        }

        match Self::apply_in(txn, -1).await {
            Ok(counter) => {
                debug!(%actor, %resource, value = counter.value, "membership removed");
                Ok(RemovalOutcome::Removed)
            }
            Err(err) => {
                error!(%actor, %resource, kind = err.kind(), error = %err, "locked decrement failed");
                self.guard.undo_release(key, &err).await;
                Err(err)
            }
        }
    }
}
