use super::{CategoryRepository, CounterStore};
use crate::catalog::{Category, CategoryId};
use crate::config::StoreConfig;
use crate::core::{
    ContentionError, Counter, MembershipKey, MembershipRecord, ResourceId, Result, WriteOutcome,
};
use crate::monitoring::{StatementKind, record_statement};
use crate::transaction::CounterTransaction;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

/// One counter row.
///
/// `write_lock` is the row's exclusive lock: every writer holds it while it
/// computes and publishes the next image. `committed` is the image readers
/// see; it is only replaced while `write_lock` is held.
pub struct CounterSlot {
    write_lock: Arc<Mutex<()>>,
    committed: RwLock<Counter>,
}

impl CounterSlot {
    fn new(counter: Counter) -> Self {
        Self {
            write_lock: Arc::new(Mutex::new(())),
            committed: RwLock::new(counter),
        }
    }

    pub(crate) fn committed(&self) -> Result<Counter> {
        Ok(*self.committed.read()?)
    }

    pub(crate) fn publish(&self, counter: Counter) -> Result<()> {
        *self.committed.write()? = counter;
        Ok(())
    }
}

#[derive(Default)]
struct MembershipTable {
    records: HashMap<MembershipKey, MembershipRecord>,
    /// resource -> live record count
    per_resource: HashMap<ResourceId, usize>,
}

/// In-process transactional store.
///
/// Tables are individually locked; row-level write exclusion for counters
/// lives in each [`CounterSlot`].
pub struct InMemoryStore {
    config: StoreConfig,
    counters: RwLock<HashMap<ResourceId, Arc<CounterSlot>>>,
    memberships: RwLock<MembershipTable>,
    categories: RwLock<BTreeMap<CategoryId, Category>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            counters: RwLock::new(HashMap::new()),
            memberships: RwLock::new(MembershipTable::default()),
            categories: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn slot(&self, id: ResourceId) -> Result<Arc<CounterSlot>> {
        self.counters
            .read()?
            .get(&id)
            .cloned()
            .ok_or(ContentionError::ResourceNotFound(id))
    }

    async fn round_trip(&self) {
        if !self.config.round_trip_latency.is_zero() {
            tokio::time::sleep(self.config.round_trip_latency).await;
        }
    }

    async fn acquire_row_lock(&self, slot: &CounterSlot, id: ResourceId) -> Result<OwnedMutexGuard<()>> {
        let started = Instant::now();
        let lock = Arc::clone(&slot.write_lock);

        match tokio::time::timeout(self.config.lock_timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(resource = %id, waited_ms, "row lock wait timed out");
                Err(ContentionError::LockTimeout {
                    resource: id,
                    waited_ms,
                })
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryStore {
    type Transaction = CounterTransaction;

    async fn create_counter(&self, id: ResourceId, initial: i64) -> Result<Counter> {
        if initial < 0 {
            return Err(ContentionError::Storage(format!(
                "counter {id} cannot start below zero"
            )));
        }
        self.round_trip().await;
        record_statement(StatementKind::Insert, "counter");

        let mut counters = self.counters.write()?;
        if counters.contains_key(&id) {
            return Err(ContentionError::DuplicateKey(format!("counter {id} already exists")));
        }
        let counter = Counter::new(id, initial);
        counters.insert(id, Arc::new(CounterSlot::new(counter)));
        Ok(counter)
    }

    async fn read_counter(&self, id: ResourceId) -> Result<Counter> {
        self.round_trip().await;
        record_statement(StatementKind::Select, "counter");
        self.slot(id)?.committed()
    }

    async fn apply_delta(&self, id: ResourceId, delta: i64) -> Result<Counter> {
        self.round_trip().await;
        record_statement(StatementKind::Update, "counter");

        let slot = self.slot(id)?;
        let _row = self.acquire_row_lock(&slot, id).await?;
        let current = slot.committed()?;

        let next_value = current.value + delta;
        if next_value < 0 {
            return Ok(current);
        }
        let next = current.with_value(next_value);
        slot.publish(next)?;
        Ok(next)
    }

    async fn compare_and_set(
        &self,
        id: ResourceId,
        expected_version: u64,
        new_value: i64,
    ) -> Result<WriteOutcome> {
        if new_value < 0 {
            return Err(ContentionError::Storage(format!(
                "counter {id} cannot go below zero (attempted {new_value})"
            )));
        }
        self.round_trip().await;
        record_statement(StatementKind::Update, "counter");

        let slot = self.slot(id)?;
        let _row = self.acquire_row_lock(&slot, id).await?;
        let current = slot.committed()?;

        if current.version != expected_version {
            return Ok(WriteOutcome::VersionMismatch { current });
        }
        let next = current.with_value(new_value);
        slot.publish(next)?;
        Ok(WriteOutcome::Applied(next))
    }

    async fn lock_for_update(&self, id: ResourceId) -> Result<CounterTransaction> {
        self.round_trip().await;
        record_statement(StatementKind::Select, "counter");

        let slot = self.slot(id)?;
        let guard = self.acquire_row_lock(&slot, id).await?;
        CounterTransaction::begin(slot, guard)
    }

    async fn insert_membership(&self, key: MembershipKey) -> Result<()> {
        self.round_trip().await;
        record_statement(StatementKind::Insert, "membership");

        // Foreign key: the resource row must exist.
        if !self.counters.read()?.contains_key(&key.resource) {
            return Err(ContentionError::ResourceNotFound(key.resource));
        }

        let mut table = self.memberships.write()?;
        if table.records.contains_key(&key) {
            return Err(ContentionError::duplicate_membership(&key));
        }
        table.records.insert(key, MembershipRecord::new(key));
        *table.per_resource.entry(key.resource).or_insert(0) += 1;
        Ok(())
    }

    async fn delete_membership(&self, key: MembershipKey) -> Result<bool> {
        self.round_trip().await;
        record_statement(StatementKind::Delete, "membership");

        let mut table = self.memberships.write()?;
        if table.records.remove(&key).is_none() {
            return Ok(false);
        }
        if let Some(count) = table.per_resource.get_mut(&key.resource) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                table.per_resource.remove(&key.resource);
            }
        }
        Ok(true)
    }

    async fn membership_exists(&self, key: MembershipKey) -> Result<bool> {
        self.round_trip().await;
        record_statement(StatementKind::Select, "membership");
        Ok(self.memberships.read()?.records.contains_key(&key))
    }

    async fn count_memberships(&self, resource: ResourceId) -> Result<usize> {
        self.round_trip().await;
        record_statement(StatementKind::Select, "membership");
        Ok(self
            .memberships
            .read()?
            .per_resource
            .get(&resource)
            .copied()
            .unwrap_or(0))
    }
}

#[async_trait]
impl CategoryRepository for InMemoryStore {
    async fn find_all_ordered(&self) -> Result<Vec<Category>> {
        self.round_trip().await;
        record_statement(StatementKind::Select, "category");

        let mut categories: Vec<Category> = self.categories.read()?.values().cloned().collect();
        categories.sort_by_key(|c| (c.display_order, c.id));
        Ok(categories)
    }

    async fn save(&self, category: Category) -> Result<Category> {
        self.round_trip().await;
        let mut categories = self.categories.write()?;
        let kind = if categories.contains_key(&category.id) {
            StatementKind::Update
        } else {
            StatementKind::Insert
        };
        record_statement(kind, "category");

        categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn delete(&self, id: CategoryId) -> Result<bool> {
        self.round_trip().await;
        record_statement(StatementKind::Delete, "category");
        Ok(self.categories.write()?.remove(&id).is_some())
    }
}
