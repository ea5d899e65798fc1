use super::types::{MembershipKey, ResourceId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentionError {
    #[error("Resource {0} not found")]
    ResourceNotFound(ResourceId),

    /// Unique-constraint violation raised by the store. The membership guard
    /// absorbs it as `AlreadyExists`; it only escapes for seeding calls.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Concurrency conflict on resource {resource}: gave up after {attempts} attempts")]
    ConcurrencyConflictExceeded { resource: ResourceId, attempts: u32 },

    #[error("Lock timeout on resource {resource} after {waited_ms}ms")]
    LockTimeout { resource: ResourceId, waited_ms: u64 },

    #[error("Recomputation failed: {0}")]
    ComputeFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ContentionError {
    pub(crate) fn duplicate_membership(key: &MembershipKey) -> Self {
        Self::DuplicateKey(format!(
            "membership (actor={}, resource={}) already exists",
            key.actor, key.resource
        ))
    }

    /// Failures a caller may retry as-is: the store was healthy, only busy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflictExceeded { .. } | Self::LockTimeout { .. }
        )
    }

    /// Stable short label, used for grouping failures in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ResourceNotFound(_) => "resource_not_found",
            Self::DuplicateKey(_) => "duplicate_key",
            Self::ConcurrencyConflictExceeded { .. } => "concurrency_conflict_exceeded",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::ComputeFailed(_) => "compute_failed",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Storage(_) => "storage",
        }
    }
}

pub type Result<T> = std::result::Result<T, ContentionError>;

impl<T> From<std::sync::PoisonError<T>> for ContentionError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Storage(format!("poisoned lock: {err}"))
    }
}
