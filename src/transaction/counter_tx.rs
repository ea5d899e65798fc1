use super::{TransactionId, TransactionState};
use crate::core::{ContentionError, Counter, Result};
use crate::monitoring::{StatementKind, record_statement};
use crate::storage::LockedCounter;
use crate::storage::memory::CounterSlot;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// A `SELECT ... FOR UPDATE` transaction on one counter row.
///
/// Owns the row's exclusive write lock from creation until it commits, rolls
/// back, or is dropped. Dropping an active transaction (for example because
/// the future driving it was cancelled) is a rollback: nothing staged is
/// published and the lock is released with the guard.
pub struct CounterTransaction {
    id: TransactionId,
    state: TransactionState,
    slot: Arc<CounterSlot>,
    read_image: Counter,
    staged: Option<i64>,
    started_at: Instant,
    _lock: OwnedMutexGuard<()>,
}

impl CounterTransaction {
    pub(crate) fn begin(slot: Arc<CounterSlot>, lock: OwnedMutexGuard<()>) -> Result<Self> {
        let read_image = slot.committed()?;
        let id = TransactionId::next();
        debug!(txn = %id, resource = %read_image.id, value = read_image.value, "row lock acquired");

        Ok(Self {
            id,
            state: TransactionState::Active,
            slot,
            read_image,
            staged: None,
            started_at: Instant::now(),
            _lock: lock,
        })
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        debug!(
            txn = %self.id,
            resource = %self.read_image.id,
            state = %state,
            held_us = self.started_at.elapsed().as_micros() as u64,
            "row lock released"
        );
    }
}

#[async_trait]
impl LockedCounter for CounterTransaction {
    fn transaction_id(&self) -> TransactionId {
        self.id
    }

    fn counter(&self) -> Counter {
        match self.staged {
            Some(value) => self.read_image.with_value(value),
            None => self.read_image,
        }
    }

    fn set_value(&mut self, value: i64) -> Result<()> {
        if value < 0 {
            return Err(ContentionError::Storage(format!(
                "counter {} cannot go below zero (attempted {})",
                self.read_image.id, value
            )));
        }
        self.staged = Some(value);
        Ok(())
    }

    async fn commit(mut self) -> Result<Counter> {
        let committed = match self.staged {
            Some(value) => {
                let next = self.read_image.with_value(value);
                self.slot.publish(next)?;
                record_statement(StatementKind::Update, "counter");
                next
            }
            None => self.read_image,
        };
        self.finish(TransactionState::Committed);
        Ok(committed)
    }

    async fn rollback(mut self) {
        self.staged = None;
        self.finish(TransactionState::Aborted);
    }
}

impl Drop for CounterTransaction {
    fn drop(&mut self) {
        if self.state.is_active() {
            self.staged = None;
            self.finish(TransactionState::Aborted);
        }
    }
}
