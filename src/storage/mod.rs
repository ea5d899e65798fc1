pub mod memory;

pub use memory::InMemoryStore;

use crate::catalog::{Category, CategoryId};
use crate::core::{Counter, MembershipKey, ResourceId, Result, WriteOutcome};
use crate::transaction::TransactionId;
use async_trait::async_trait;

/// Transactional store holding counters and membership records.
///
/// The store is the single owner of both; nothing in-process is
/// authoritative. Every write path (`apply_delta`, `compare_and_set` and row
/// transactions) goes through the same per-row exclusive lock, while reads
/// see the last committed row and never wait on that lock.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    type Transaction: LockedCounter;

    /// Seed a counter row. Fails with `DuplicateKey` if it already exists.
    async fn create_counter(&self, id: ResourceId, initial: i64) -> Result<Counter>;

    /// Point read of the last committed row.
    async fn read_counter(&self, id: ResourceId) -> Result<Counter>;

    /// Single statement `value = value + delta`, evaluated inside the store.
    ///
    /// A negative delta that would take the value below zero matches no row
    /// and leaves the counter (and its version) untouched.
    async fn apply_delta(&self, id: ResourceId, delta: i64) -> Result<Counter>;

    /// Versioned write: stores `new_value` only if the row is still at
    /// `expected_version`.
    async fn compare_and_set(
        &self,
        id: ResourceId,
        expected_version: u64,
        new_value: i64,
    ) -> Result<WriteOutcome>;

    /// Acquire the row's exclusive lock, waiting at most the configured lock
    /// timeout.
    async fn lock_for_update(&self, id: ResourceId) -> Result<Self::Transaction>;

    /// Insert under the `(actor, resource)` unique constraint. Fails with
    /// `DuplicateKey` on conflict and `ResourceNotFound` for unknown resources.
    async fn insert_membership(&self, key: MembershipKey) -> Result<()>;

    async fn delete_membership(&self, key: MembershipKey) -> Result<bool>;

    async fn membership_exists(&self, key: MembershipKey) -> Result<bool>;

    async fn count_memberships(&self, resource: ResourceId) -> Result<usize>;
}

/// An open row-lock transaction on one counter.
#[async_trait]
pub trait LockedCounter: Send {
    fn transaction_id(&self) -> TransactionId;

    /// Row as seen by this transaction, including any staged value.
    fn counter(&self) -> Counter;

    fn set_value(&mut self, value: i64) -> Result<()>;

    /// Publish the staged value and release the lock.
    async fn commit(self) -> Result<Counter>;

    /// Discard the staged value and release the lock.
    async fn rollback(self);
}

#[async_trait]
pub trait CategoryRepository: Send + Sync + 'static {
    /// All categories by ascending display order, ties broken by id.
    async fn find_all_ordered(&self) -> Result<Vec<Category>>;

    async fn save(&self, category: Category) -> Result<Category>;

    async fn delete(&self, id: CategoryId) -> Result<bool>;
}
