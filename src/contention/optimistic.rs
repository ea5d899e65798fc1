use super::{CounterStrategy, MembershipGuard, StrategyKind, guarded_add, guarded_remove};
use crate::config::RetryPolicy;
use crate::core::{
    ActorId, ContentionError, Counter, MembershipKey, MembershipOutcome, RemovalOutcome,
    ResourceId, Result, RetryOutcome, WriteOutcome,
};
use crate::storage::CounterStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{Instrument, debug, info_span, warn};

/// Versioned read-modify-write with a bounded retry budget.
///
/// Conflicts are detected per row: any committed write between our read and
/// our conditional write forces a retry, whatever it changed. A caller that
/// runs out of budget gets `ConcurrencyConflictExceeded`; the update is never
/// dropped without an error.
pub struct OptimisticRetryStrategy<S> {
    store: Arc<S>,
    guard: MembershipGuard<S>,
    policy: RetryPolicy,
}

impl<S> Clone for OptimisticRetryStrategy<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            guard: self.guard.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl<S: CounterStore> OptimisticRetryStrategy<S> {
    pub fn new(store: Arc<S>, policy: RetryPolicy) -> Self {
        let guard = MembershipGuard::new(Arc::clone(&store));
        Self { store, guard, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Increment with an explicit retry budget, reporting how many
    /// conditional writes it took.
    pub async fn increment_with_retry(&self, resource: ResourceId, max_retries: u32) -> Result<RetryOutcome> {
        self.update_with_retry(resource, 1, max_retries).await
    }

    pub async fn decrement_with_retry(&self, resource: ResourceId, max_retries: u32) -> Result<RetryOutcome> {
        self.update_with_retry(resource, -1, max_retries).await
    }

    async fn update_with_retry(&self, resource: ResourceId, delta: i64, max_retries: u32) -> Result<RetryOutcome> {
        let max_attempts = max_retries.saturating_add(1);
        let span = info_span!("optimistic_update", %resource, delta, max_attempts);

        async move {
            let mut attempts: u32 = 0;
            loop {
                attempts += 1;
                let read = self.store.read_counter(resource).await?;
                let next_value = read.value + delta;
                if next_value < 0 {
                    // Nothing left to decrement.
                    return Ok(RetryOutcome {
                        counter: read,
                        attempts_used: attempts,
                    });
                }

                match self
                    .store
                    .compare_and_set(resource, read.version, next_value)
                    .await?
                {
                    WriteOutcome::Applied(counter) => {
                        if attempts > 1 {
                            debug!(attempts, value = counter.value, "applied after retries");
                        }
                        return Ok(RetryOutcome {
                            counter,
                            attempts_used: attempts,
                        });
                    }
                    WriteOutcome::VersionMismatch { current } => {
                        if attempts >= max_attempts {
                            warn!(
                                attempts,
                                read_version = read.version,
                                current_version = current.version,
                                "retry budget exhausted"
                            );
                            return Err(ContentionError::ConcurrencyConflictExceeded {
                                resource,
                                attempts,
                            });
                        }

                        let backoff = self.policy.backoff_for(attempts);
                        debug!(
                            attempts,
                            read_version = read.version,
                            current_version = current.version,
                            backoff_ms = backoff.as_millis() as u64,
                            "version mismatch, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl<S: CounterStore> CounterStrategy for OptimisticRetryStrategy<S> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Optimistic
    }

    async fn increment(&self, resource: ResourceId) -> Result<Counter> {
        let outcome = self
            .increment_with_retry(resource, self.policy.max_retries)
            .await?;
        Ok(outcome.counter)
    }

    async fn decrement(&self, resource: ResourceId) -> Result<Counter> {
        let outcome = self
            .decrement_with_retry(resource, self.policy.max_retries)
            .await?;
        Ok(outcome.counter)
    }

    async fn add_membership(&self, actor: ActorId, resource: ResourceId) -> Result<MembershipOutcome> {
        let this = self.clone();
        guarded_add(self.guard.clone(), MembershipKey::new(actor, resource), move || async move {
            this.increment_with_retry(resource, this.policy.max_retries)
                .await
                .map(|outcome| outcome.counter)
        })
        .await
    }

    async fn remove_membership(&self, actor: ActorId, resource: ResourceId) -> Result<RemovalOutcome> {
        let this = self.clone();
        guarded_remove(self.guard.clone(), MembershipKey::new(actor, resource), move || async move {
            this.decrement_with_retry(resource, this.policy.max_retries)
                .await
                .map(|outcome| outcome.counter)
        })
        .await
    }
}
