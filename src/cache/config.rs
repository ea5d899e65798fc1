use crate::config::millis;
use crate::core::{ContentionError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What callers see while a key is being recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Followers wait for the in-flight computation and share its result.
    #[default]
    WaitForFresh,
    /// Followers get the expired value immediately when one exists; only
    /// the caller that triggered the refresh waits for it.
    ServeStale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub capacity: usize,

    /// TTL used by `get_or_compute_default`. Explicit invalidation is the
    /// main expiry path; this is the safety net.
    #[serde(rename = "default_ttl_ms", with = "millis")]
    pub default_ttl: Duration,

    /// How long a follower waits on someone else's computation before
    /// computing on its own
    #[serde(rename = "wait_timeout_ms", with = "millis")]
    pub wait_timeout: Duration,

    pub stale_policy: StalePolicy,
}

impl CacheConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(ContentionError::InvalidConfig("cache capacity must be > 0".into()));
        }
        if self.default_ttl.is_zero() {
            return Err(ContentionError::InvalidConfig("cache default_ttl must be > 0".into()));
        }
        if self.wait_timeout.is_zero() {
            return Err(ContentionError::InvalidConfig("cache wait_timeout must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            default_ttl: Duration::from_secs(24 * 60 * 60),
            wait_timeout: Duration::from_secs(5),
            stale_policy: StalePolicy::WaitForFresh,
        }
    }
}
