//! Recommended imports grouped by use.
//!
//! `favorites` covers the write-heavy membership/counter path, `catalog`
//! the read-mostly cached path.

pub mod favorites {
    pub use crate::{
        ActorId, ContentionConfig, ContentionError, CounterStore, FavoriteService, InMemoryStore,
        MembershipOutcome, RemovalOutcome, ResourceId, Result, RetryPolicy, StoreConfig,
        StrategyKind,
    };
}

pub mod catalog {
    pub use crate::{
        CacheConfig, Category, CategoryId, CategoryRepository, CategoryService, StalePolicy,
        StampedeSafeCache,
    };
}
