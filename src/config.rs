use crate::cache::CacheConfig;
use crate::contention::StrategyKind;
use crate::core::{ContentionError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Store-side settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a writer waits for a row lock before `LockTimeout`
    #[serde(rename = "lock_timeout_ms", with = "millis")]
    pub lock_timeout: Duration,

    /// Artificial delay applied to every store call, standing in for the
    /// network round-trip of a remote store
    #[serde(rename = "round_trip_latency_ms", with = "millis")]
    pub round_trip_latency: Duration,
}

impl StoreConfig {
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn round_trip_latency(mut self, latency: Duration) -> Self {
        self.round_trip_latency = latency;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.lock_timeout.is_zero() {
            return Err(ContentionError::InvalidConfig(
                "lock_timeout must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(3),
            round_trip_latency: Duration::ZERO,
        }
    }
}

/// Retry budget of the optimistic strategy.
///
/// Backoff is fixed while `max_backoff_ms == backoff_ms` and doubles per
/// attempt up to `max_backoff_ms` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            max_retries,
            backoff_ms,
            max_backoff_ms: backoff_ms,
        }
    }

    pub fn exponential(max_retries: u32, base_ms: u64, max_ms: u64) -> Self {
        Self {
            max_retries,
            backoff_ms: base_ms,
            max_backoff_ms: max_ms.max(base_ms),
        }
    }

    /// Sleep before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let base = self.backoff_ms;
        let cap = self.max_backoff_ms.max(base);

        let mut backoff = base;
        for _ in 1..retry {
            backoff = backoff.saturating_mul(2).min(cap);
        }
        Duration::from_millis(backoff)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_backoff_ms < self.backoff_ms {
            return Err(ContentionError::InvalidConfig(
                "max_backoff_ms cannot be below backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(10, 10)
    }
}

/// Top-level configuration of a contention subsystem instance.
///
/// Exactly one counter strategy is active per instance.
///
/// ```
/// use contendb::{ContentionConfig, StrategyKind};
///
/// let config = ContentionConfig::from_json_str(
///     r#"{ "strategy": "optimistic", "retry": { "max_retries": 5 } }"#,
/// ).unwrap();
/// assert_eq!(config.strategy, StrategyKind::Optimistic);
/// assert_eq!(config.retry.max_retries, 5);
/// assert_eq!(config.retry.backoff_ms, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ContentionConfig {
    pub strategy: StrategyKind,
    pub store: StoreConfig,
    pub retry: RetryPolicy,
    pub cache: CacheConfig,
}

impl ContentionConfig {
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ContentionError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.retry.validate()?;
        self.cache.validate()
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
