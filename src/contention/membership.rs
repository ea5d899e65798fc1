use crate::core::{ActorId, ContentionError, MembershipKey, MembershipOutcome, ResourceId, Result};
use crate::storage::CounterStore;
use std::sync::Arc;
use tracing::{debug, error};

/// At most one membership record per `(actor, resource)`.
///
/// Uniqueness is enforced by the store's constraint, not by a check-then-insert
/// in this process, so concurrent adds for the same key resolve to exactly one
/// `Created`.
pub struct MembershipGuard<S> {
    store: Arc<S>,
}

impl<S> Clone for MembershipGuard<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: CounterStore> MembershipGuard<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn try_acquire(&self, actor: ActorId, resource: ResourceId) -> Result<MembershipOutcome> {
        let key = MembershipKey::new(actor, resource);
        match self.store.insert_membership(key).await {
            Ok(()) => Ok(MembershipOutcome::Created),
            Err(ContentionError::DuplicateKey(_)) => {
                debug!(%actor, %resource, "membership already exists");
                Ok(MembershipOutcome::AlreadyExists)
            }
            Err(err) => Err(err),
        }
    }

    /// Returns whether a record was removed.
    pub async fn release(&self, actor: ActorId, resource: ResourceId) -> Result<bool> {
        self.store
            .delete_membership(MembershipKey::new(actor, resource))
            .await
    }

    pub async fn is_member(&self, actor: ActorId, resource: ResourceId) -> Result<bool> {
        self.store
            .membership_exists(MembershipKey::new(actor, resource))
            .await
    }

    /// Deletes a record created by a call whose counter update then failed.
    pub(crate) async fn undo_acquire(&self, key: MembershipKey, cause: &ContentionError) {
        debug!(actor = %key.actor, resource = %key.resource, %cause, "reverting membership");
        if let Err(err) = self.store.delete_membership(key).await {
            error!(
                actor = %key.actor,
                resource = %key.resource,
                %cause,
                revert_error = %err,
                "membership revert failed, record count now exceeds counter"
            );
        }
    }

    /// Restores a record whose removal could not be reflected on the counter.
    pub(crate) async fn undo_release(&self, key: MembershipKey, cause: &ContentionError) {
        debug!(actor = %key.actor, resource = %key.resource, %cause, "restoring membership");
        match self.store.insert_membership(key).await {
            // A concurrent add already recreated it.
            Ok(()) | Err(ContentionError::DuplicateKey(_)) => {}
            Err(err) => error!(
                actor = %key.actor,
                resource = %key.resource,
                %cause,
                revert_error = %err,
                "membership restore failed, counter now exceeds record count"
            ),
        }
    }
}
