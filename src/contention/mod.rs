// ============================================================================
// Contention Control
// ============================================================================
//
// Three interchangeable ways to keep a shared counter consistent with its
// membership records under concurrent writers:
//
// - Atomic:      one store-side `value = value + 1` statement
// - Optimistic:  versioned read-modify-write, bounded retries with backoff
// - Pessimistic: exclusive row lock for the whole read-modify-write
//
// All three share one MembershipGuard, so their idempotence is identical.
// A deployment picks one strategy per counter; mixing strategies on the same
// row (say atomic increments racing locked decrements) voids the pessimistic
// serialization guarantee and is not detected here.
//
// Atomic and optimistic run the guard and the counter write as two separate
// steps. A remove of actor A landing between A's insert and A's increment,
// while the counter is at zero, is clamped and the counter ends one above
// the records. Only pessimistic holds the row lock across both steps.
//
// The two steps of an add or remove always finish together: atomic and
// optimistic run them on a spawned task, and pessimistic has no await point
// between its insert and its commit.
//
// ============================================================================

pub mod atomic;
pub mod membership;
pub mod optimistic;
pub mod pessimistic;
pub mod service;

pub use atomic::AtomicUpdateStrategy;
pub use membership::MembershipGuard;
pub use optimistic::OptimisticRetryStrategy;
pub use pessimistic::PessimisticLockStrategy;
pub use service::{FavoriteService, build_strategy};

use crate::core::{
    ActorId, ContentionError, Counter, MembershipKey, MembershipOutcome, RemovalOutcome,
    ResourceId, Result,
};
use crate::storage::CounterStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Atomic,
    Optimistic,
    Pessimistic,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Atomic,
        StrategyKind::Optimistic,
        StrategyKind::Pessimistic,
    ];
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StrategyKind::Atomic => "atomic",
            StrategyKind::Optimistic => "optimistic",
            StrategyKind::Pessimistic => "pessimistic",
        };
        write!(f, "{label}")
    }
}

impl FromStr for StrategyKind {
    type Err = ContentionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic" => Ok(StrategyKind::Atomic),
            "optimistic" => Ok(StrategyKind::Optimistic),
            "pessimistic" => Ok(StrategyKind::Pessimistic),
            other => Err(ContentionError::InvalidConfig(format!(
                "unknown strategy '{other}'"
            ))),
        }
    }
}

/// A counter-update discipline together with the membership bookkeeping
/// that decides when the counter moves.
#[async_trait]
pub trait CounterStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Raise the counter by one and return the committed row.
    async fn increment(&self, resource: ResourceId) -> Result<Counter>;

    /// Lower the counter by one, stopping at zero.
    async fn decrement(&self, resource: ResourceId) -> Result<Counter>;

    /// Create the membership and, only if it was new, increment.
    async fn add_membership(&self, actor: ActorId, resource: ResourceId)
    -> Result<MembershipOutcome>;

    /// Delete the membership and, only if one was removed, decrement.
    async fn remove_membership(&self, actor: ActorId, resource: ResourceId)
    -> Result<RemovalOutcome>;
}

/// Guard first, counter second. A counter failure after `Created` deletes
/// the fresh record again so the record count never runs ahead of the value.
///
/// Both steps run on a spawned task: dropping the caller's future does not
/// stop the pair halfway.
pub(crate) async fn guarded_add<S, F, Fut>(
    guard: MembershipGuard<S>,
    key: MembershipKey,
    mutate: F,
) -> Result<MembershipOutcome>
where
    S: CounterStore,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Counter>> + Send + 'static,
{
    run_to_completion(key, async move {
        if guard.try_acquire(key.actor, key.resource).await? == MembershipOutcome::AlreadyExists {
            return Ok(MembershipOutcome::AlreadyExists);
        }

        match mutate().await {
            Ok(_) => Ok(MembershipOutcome::Created),
            Err(err) => {
                guard.undo_acquire(key, &err).await;
                Err(err)
            }
        }
    })
    .await
}

pub(crate) async fn guarded_remove<S, F, Fut>(
    guard: MembershipGuard<S>,
    key: MembershipKey,
    mutate: F,
) -> Result<RemovalOutcome>
where
    S: CounterStore,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Counter>> + Send + 'static,
{
    run_to_completion(key, async move {
        if !guard.release(key.actor, key.resource).await? {
            return Ok(RemovalOutcome::NotMember);
        }

        match mutate().await {
            Ok(_) => Ok(RemovalOutcome::Removed),
            Err(err) => {
                guard.undo_release(key, &err).await;
                Err(err)
            }
        }
    })
    .await
}

async fn run_to_completion<T, Fut>(key: MembershipKey, task: Fut) -> Result<T>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(task).await.map_err(|err| {
        error!(actor = %key.actor, resource = %key.resource, error = %err, "membership update task failed");
        ContentionError::Storage(format!("membership update task failed: {err}"))
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_kind_parse_and_display() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.to_string().parse::<StrategyKind>().unwrap(), kind);
        }
        assert_eq!(" Pessimistic ".parse::<StrategyKind>().unwrap(), StrategyKind::Pessimistic);
        assert!("spinlock".parse::<StrategyKind>().is_err());
    }
}
