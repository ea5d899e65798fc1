use super::{
    AtomicUpdateStrategy, CounterStrategy, OptimisticRetryStrategy, PessimisticLockStrategy,
    StrategyKind,
};
use crate::config::{ContentionConfig, RetryPolicy};
use crate::core::{ActorId, MembershipKey, MembershipOutcome, RemovalOutcome, ResourceId, Result};
use crate::storage::CounterStore;
use std::sync::Arc;

/// Instantiates the strategy a deployment selected.
pub fn build_strategy<S: CounterStore>(
    store: Arc<S>,
    kind: StrategyKind,
    retry: RetryPolicy,
) -> Arc<dyn CounterStrategy> {
    match kind {
        StrategyKind::Atomic => Arc::new(AtomicUpdateStrategy::new(store)),
        StrategyKind::Optimistic => Arc::new(OptimisticRetryStrategy::new(store, retry)),
        StrategyKind::Pessimistic => Arc::new(PessimisticLockStrategy::new(store)),
    }
}

/// Favorites of a product catalog: membership records plus a per-product
/// favorite count, kept in step by one counter strategy.
///
/// # Examples
///
/// ```
/// use contendb::{ActorId, ContentionConfig, CounterStore, FavoriteService, InMemoryStore, ResourceId, StrategyKind};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> contendb::Result<()> {
/// let store = Arc::new(InMemoryStore::new());
/// store.create_counter(ResourceId(1), 0).await?;
///
/// let favorites = FavoriteService::new(store, &ContentionConfig::new(StrategyKind::Pessimistic))?;
/// favorites.add_favorite(ActorId(7), ResourceId(1)).await?;
/// favorites.add_favorite(ActorId(7), ResourceId(1)).await?;
/// assert_eq!(favorites.get_favorite_count(ResourceId(1)).await?, 1);
/// # Ok(())
/// # }
/// ```
pub struct FavoriteService<S> {
    store: Arc<S>,
    strategy: Arc<dyn CounterStrategy>,
}

impl<S> Clone for FavoriteService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            strategy: Arc::clone(&self.strategy),
        }
    }
}

impl<S: CounterStore> FavoriteService<S> {
    pub fn new(store: Arc<S>, config: &ContentionConfig) -> Result<Self> {
        config.validate()?;
        let strategy = build_strategy(Arc::clone(&store), config.strategy, config.retry.clone());
        Ok(Self { store, strategy })
    }

    pub fn with_strategy(store: Arc<S>, strategy: Arc<dyn CounterStrategy>) -> Self {
        Self { store, strategy }
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn strategy(&self) -> &Arc<dyn CounterStrategy> {
        &self.strategy
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn add_favorite(&self, actor: ActorId, resource: ResourceId) -> Result<MembershipOutcome> {
        self.strategy.add_membership(actor, resource).await
    }

    pub async fn remove_favorite(&self, actor: ActorId, resource: ResourceId) -> Result<RemovalOutcome> {
        self.strategy.remove_membership(actor, resource).await
    }

    /// Committed favorite count, read straight from the store.
    pub async fn get_favorite_count(&self, resource: ResourceId) -> Result<i64> {
        Ok(self.store.read_counter(resource).await?.value)
    }

    pub async fn is_favorite(&self, actor: ActorId, resource: ResourceId) -> Result<bool> {
        self.store
            .membership_exists(MembershipKey::new(actor, resource))
            .await
    }

    /// Number of membership records, independent of the counter.
    pub async fn count_favorite_records(&self, resource: ResourceId) -> Result<usize> {
        self.store.count_memberships(resource).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;

    #[tokio::test]
    async fn test_each_strategy_round_trips() {
        for kind in StrategyKind::ALL {
            let store = Arc::new(InMemoryStore::new());
            store.create_counter(ResourceId(1), 0).await.unwrap();
            let service = FavoriteService::new(store, &ContentionConfig::new(kind)).unwrap();
            assert_eq!(service.strategy_kind(), kind);

            service.add_favorite(ActorId(1), ResourceId(1)).await.unwrap();
            assert_eq!(service.get_favorite_count(ResourceId(1)).await.unwrap(), 1, "{kind}");
            assert!(service.is_favorite(ActorId(1), ResourceId(1)).await.unwrap());

            service.remove_favorite(ActorId(1), ResourceId(1)).await.unwrap();
            assert_eq!(service.get_favorite_count(ResourceId(1)).await.unwrap(), 0, "{kind}");
            assert_eq!(service.count_favorite_records(ResourceId(1)).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = ContentionConfig::default().retry(RetryPolicy {
            max_retries: 1,
            backoff_ms: 10,
            max_backoff_ms: 1,
        });
        assert!(FavoriteService::new(Arc::new(InMemoryStore::new()), &config).is_err());
    }
}
