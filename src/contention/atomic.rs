use super::{CounterStrategy, MembershipGuard, StrategyKind, guarded_add, guarded_remove};
use crate::core::{ActorId, Counter, MembershipKey, MembershipOutcome, RemovalOutcome, ResourceId, Result};
use crate::storage::CounterStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Store-side `UPDATE ... SET value = value + 1 WHERE id = ?`.
///
/// The value never enters application memory, so there is no read-modify-write
/// window to lose an update in and nothing to retry.
pub struct AtomicUpdateStrategy<S> {
    store: Arc<S>,
    guard: MembershipGuard<S>,
}

impl<S: CounterStore> AtomicUpdateStrategy<S> {
    pub fn new(store: Arc<S>) -> Self {
        let guard = MembershipGuard::new(Arc::clone(&store));
        Self { store, guard }
    }
}

#[async_trait]
impl<S: CounterStore> CounterStrategy for AtomicUpdateStrategy<S> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Atomic
    }

    async fn increment(&self, resource: ResourceId) -> Result<Counter> {
        self.store.apply_delta(resource, 1).await
    }

    async fn decrement(&self, resource: ResourceId) -> Result<Counter> {
        self.store.apply_delta(resource, -1).await
    }

    async fn add_membership(&self, actor: ActorId, resource: ResourceId) -> Result<MembershipOutcome> {
        let store = Arc::clone(&self.store);
        guarded_add(self.guard.clone(), MembershipKey::new(actor, resource), move || async move {
            store.apply_delta(resource, 1).await
        })
        .await
    }

    async fn remove_membership(&self, actor: ActorId, resource: ResourceId) -> Result<RemovalOutcome> {
        let store = Arc::clone(&self.store);
        guarded_remove(self.guard.clone(), MembershipKey::new(actor, resource), move || async move {
            store.apply_delta(resource, -1).await
        })
        .await
    }
}
