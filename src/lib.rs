// ============================================================================
// contendb Library
// ============================================================================
//
// Contention control for hot rows: a membership table plus a denormalized
// counter per resource, kept in step under heavy concurrency, and a
// stampede-safe read-through cache for read-mostly data.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod contention;
pub mod core;
pub mod harness;
pub mod monitoring;
pub mod prelude;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use core::{
    ActorId, ContentionError, Counter, MembershipKey, MembershipOutcome, RemovalOutcome,
    ResourceId, Result, RetryOutcome,
};

// Re-export the store seam
pub use storage::{CategoryRepository, CounterStore, InMemoryStore, LockedCounter};
pub use transaction::{CounterTransaction, TransactionId, TransactionState};

// Re-export strategies
pub use contention::{
    AtomicUpdateStrategy, CounterStrategy, FavoriteService, MembershipGuard,
    OptimisticRetryStrategy, PessimisticLockStrategy, StrategyKind, build_strategy,
};

// Re-export cache and catalog
pub use cache::{CacheConfig, CacheStats, ComputeFailed, StalePolicy, StampedeSafeCache};
pub use catalog::{Category, CategoryId, CategoryService};

pub use config::{ContentionConfig, RetryPolicy, StoreConfig};
pub use harness::{ContentionHarness, HarnessReport, SingleFlightReport};
