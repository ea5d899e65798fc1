use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a contended resource (a product, in the catalog backend).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub u64);

/// Identifier of the actor holding a membership (a member favoriting a product).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

/// Committed image of a counter row.
///
/// `value` never drops below zero. `version` grows by one on every applied
/// write and is the token checked by versioned writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub id: ResourceId,
    pub value: i64,
    pub version: u64,
}

impl Counter {
    pub fn new(id: ResourceId, value: i64) -> Self {
        Self { id, value, version: 0 }
    }

    /// Returns the row as it would look after writing `value`.
    pub(crate) fn with_value(self, value: i64) -> Self {
        Self {
            id: self.id,
            value,
            version: self.version + 1,
        }
    }
}

/// Natural key of a membership record. Unique per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MembershipKey {
    pub actor: ActorId,
    pub resource: ResourceId,
}

impl MembershipKey {
    pub fn new(actor: ActorId, resource: ResourceId) -> Self {
        Self { actor, resource }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub key: MembershipKey,
    pub created_at: DateTime<Utc>,
}

impl MembershipRecord {
    pub fn new(key: MembershipKey) -> Self {
        Self {
            key,
            created_at: Utc::now(),
        }
    }
}

/// Result of an add. `AlreadyExists` is success: the add was idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipOutcome {
    Created,
    AlreadyExists,
}

impl MembershipOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, MembershipOutcome::Created)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalOutcome {
    Removed,
    NotMember,
}

/// Outcome of a versioned write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied(Counter),
    /// Another writer committed first; `current` is the row it left behind.
    VersionMismatch { current: Counter },
}

/// Successful optimistic increment together with the number of conditional
/// writes it took (1 means it won the first race).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub counter: Counter,
    pub attempts_used: u32,
}

impl RetryOutcome {
    pub fn retries(&self) -> u32 {
        self.attempts_used.saturating_sub(1)
    }
}
