//! Read-through cache with single-flight recomputation.
//!
//! At most one computation runs per key at a time. Callers that arrive
//! while it runs join it and share its outcome instead of starting their
//! own. A failed computation is handed to the callers that joined it and
//! then forgotten; the next caller computes again.

pub mod config;
pub mod stats;

pub use config::{CacheConfig, StalePolicy};
pub use stats::CacheStats;

use crate::core::{ContentionError, Result};
use lru::LruCache;
use stats::CacheCounters;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// A computation failure, shared by every caller that joined the flight.
#[derive(Debug, Error)]
#[error("cache computation failed: {0}")]
pub struct ComputeFailed<E>(pub Arc<E>);

impl<E> ComputeFailed<E> {
    pub fn inner(&self) -> &E {
        &self.0
    }

    pub fn into_inner(self) -> E
    where
        E: Clone,
    {
        Arc::unwrap_or_clone(self.0)
    }

    /// Flattens a foreign compute error into the crate's error type.
    pub fn to_contention_error(&self) -> ContentionError
    where
        E: fmt::Display,
    {
        ContentionError::ComputeFailed(self.0.to_string())
    }
}

impl<E> Clone for ComputeFailed<E> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl From<ComputeFailed<ContentionError>> for ContentionError {
    fn from(failed: ComputeFailed<ContentionError>) -> Self {
        failed.into_inner()
    }
}

type Shared<V, E> = std::result::Result<V, Arc<E>>;

struct Entry<V> {
    value: V,
    expires_at: Instant,
    stored_at: Instant,
}

impl<V> Entry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Invalidation count of one key as seen at some instant. A computation
/// may store its result only if the key's generation is unchanged since the
/// computation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Generation {
    epoch: u64,
    key: u64,
}

struct Flight<V, E> {
    result: watch::Sender<Option<Shared<V, E>>>,
    generation: Generation,
}

impl<V, E> Flight<V, E> {
    fn new(generation: Generation) -> Self {
        let (result, _) = watch::channel(None);
        Self { result, generation }
    }
}

struct CacheState<K, V, E> {
    entries: LruCache<K, Entry<V>>,
    flights: HashMap<K, Arc<Flight<V, E>>>,
    /// Bumped by `invalidate_all`.
    epoch: u64,
    /// Per-key invalidation counts within the current epoch; absent is 0.
    generations: HashMap<K, u64>,
}

impl<K: Hash + Eq, V, E> CacheState<K, V, E> {
    fn generation(&self, key: &K) -> Generation {
        Generation {
            epoch: self.epoch,
            key: self.generations.get(key).copied().unwrap_or(0),
        }
    }
}

/// Snapshot taken by a caller that computes outside any flight.
struct Detached {
    generation: Generation,
    started: Instant,
}

enum Lookup<V, E> {
    Fresh(V),
    Stale(V),
    Lead(Arc<Flight<V, E>>),
    Follow(watch::Receiver<Option<Shared<V, E>>>),
}

enum FlightWait<V, E> {
    Done(Shared<V, E>),
    /// The leader went away without publishing.
    Abandoned,
    TimedOut,
}

/// Bounded, TTL'd, stampede-safe cache.
///
/// `E` is the error type of the compute functions passed in.
///
/// ```
/// use contendb::cache::{CacheConfig, StampedeSafeCache};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let cache: StampedeSafeCache<&str, u32, std::io::Error> =
///     StampedeSafeCache::new(CacheConfig::default()).unwrap();
///
/// let value = cache
///     .get_or_compute("answer", Duration::from_secs(60), || async { Ok(42) })
///     .await
///     .unwrap();
/// assert_eq!(value, 42);
/// assert_eq!(cache.get_if_fresh(&"answer"), Some(42));
/// # }
/// ```
pub struct StampedeSafeCache<K, V, E = ContentionError> {
    config: CacheConfig,
    state: Mutex<CacheState<K, V, E>>,
    counters: CacheCounters,
}

impl<K, V, E> StampedeSafeCache<K, V, E>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.capacity)
            .ok_or_else(|| ContentionError::InvalidConfig("cache capacity must be > 0".into()))?;

        Ok(Self {
            config,
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                flights: HashMap::new(),
                epoch: 0,
                generations: HashMap::new(),
            }),
            counters: CacheCounters::default(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the cached value for `key`, computing it with `compute` when
    /// absent or expired.
    ///
    /// Concurrent callers for the same key share one computation. A caller
    /// waiting longer than the configured wait timeout computes on its own.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: K,
        ttl: Duration,
        compute: F,
    ) -> std::result::Result<V, ComputeFailed<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        let leader = loop {
            match self.begin(&key) {
                Lookup::Fresh(value) | Lookup::Stale(value) => return Ok(value),
                Lookup::Lead(flight) => break Some(flight),
                Lookup::Follow(mut rx) => match self.await_flight(&mut rx).await {
                    FlightWait::Done(result) => return result.map_err(ComputeFailed),
                    FlightWait::Abandoned => {
                        debug!(?key, "computation abandoned, retrying lookup");
                        continue;
                    }
                    FlightWait::TimedOut => break None,
                },
            }
        };

        match leader {
            Some(flight) => {
                let mut guard = FlightGuard {
                    cache: self,
                    key: &key,
                    flight: &flight,
                    armed: true,
                };
                let outcome = compute().await;
                guard.armed = false;
                self.finish_flight(&key, &flight, ttl, outcome)
            }
            None => {
                let detached = Detached {
                    generation: self.lock_state().generation(&key),
                    started: Instant::now(),
                };
                let outcome = compute().await;
                self.finish_detached(key, detached, ttl, outcome)
            }
        }
    }

    /// `get_or_compute` with the configured default TTL.
    pub async fn get_or_compute_default<F, Fut>(
        &self,
        key: K,
        compute: F,
    ) -> std::result::Result<V, ComputeFailed<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        let ttl = self.config.default_ttl;
        self.get_or_compute(key, ttl, compute).await
    }

    /// Cached value for `key` if it has not expired. Never computes.
    pub fn get_if_fresh(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut state = self.lock_state();
        state
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone())
    }

    /// Drops the entry for `key`. A computation already running for `key`
    /// still answers the callers waiting on it, but its result is not
    /// stored; the next caller computes afresh.
    pub fn invalidate(&self, key: &K) {
        let mut state = self.lock_state();
        state.entries.pop(key);
        state.flights.remove(key);
        *state.generations.entry(key.clone()).or_default() += 1;
        CacheCounters::bump(&self.counters.invalidations);
        debug!(?key, "cache entry invalidated");
    }

    pub fn invalidate_all(&self) {
        let mut state = self.lock_state();
        state.entries.clear();
        state.flights.clear();
        state.generations.clear();
        state.epoch += 1;
        CacheCounters::bump(&self.counters.invalidations);
        debug!("cache cleared");
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState<K, V, E>> {
        // Every critical section leaves the maps consistent, so a panic
        // elsewhere does not make the state unusable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, key: &K) -> Lookup<V, E> {
        let now = Instant::now();
        let mut state = self.lock_state();

        let mut stale = None;
        if let Some(entry) = state.entries.get(key) {
            if entry.is_fresh(now) {
                CacheCounters::bump(&self.counters.hits);
                return Lookup::Fresh(entry.value.clone());
            }
            stale = Some(entry.value.clone());
        }

        if let Some(flight) = state.flights.get(key) {
            if let (StalePolicy::ServeStale, Some(value)) = (self.config.stale_policy, stale) {
                CacheCounters::bump(&self.counters.stale_hits);
                return Lookup::Stale(value);
            }
            return Lookup::Follow(flight.result.subscribe());
        }

        CacheCounters::bump(&self.counters.misses);
        let flight = Arc::new(Flight::new(state.generation(key)));
        state.flights.insert(key.clone(), Arc::clone(&flight));
        Lookup::Lead(flight)
    }

    async fn await_flight(&self, rx: &mut watch::Receiver<Option<Shared<V, E>>>) -> FlightWait<V, E> {
        let waited = tokio::time::timeout(self.config.wait_timeout, async {
            match rx.wait_for(Option::is_some).await {
                Ok(published) => (*published).clone(),
                Err(_) => None,
            }
        })
        .await;

        match waited {
            Ok(Some(result)) => FlightWait::Done(result),
            Ok(None) => FlightWait::Abandoned,
            Err(_) => {
                CacheCounters::bump(&self.counters.wait_timeouts);
                warn!(
                    wait_ms = self.config.wait_timeout.as_millis() as u64,
                    "gave up waiting on in-flight computation, computing independently"
                );
                FlightWait::TimedOut
            }
        }
    }

    fn finish_flight(
        &self,
        key: &K,
        flight: &Arc<Flight<V, E>>,
        ttl: Duration,
        outcome: std::result::Result<V, E>,
    ) -> std::result::Result<V, ComputeFailed<E>> {
        let shared: Shared<V, E> = outcome.map_err(Arc::new);
        {
            let mut state = self.lock_state();
            if state
                .flights
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, flight))
            {
                state.flights.remove(key);
            }

            match &shared {
                Ok(value) => {
                    CacheCounters::bump(&self.counters.loads);
                    if state.generation(key) != flight.generation {
                        debug!(?key, "discarding result invalidated while computing");
                    } else {
                        self.store_entry(&mut state, key.clone(), value.clone(), ttl);
                    }
                }
                Err(_) => {
                    CacheCounters::bump(&self.counters.load_failures);
                    debug!(?key, "computation failed, nothing cached");
                }
            }
        }

        flight.result.send_replace(Some(shared.clone()));
        shared.map_err(ComputeFailed)
    }

    fn finish_detached(
        &self,
        key: K,
        detached: Detached,
        ttl: Duration,
        outcome: std::result::Result<V, E>,
    ) -> std::result::Result<V, ComputeFailed<E>> {
        match outcome {
            Ok(value) => {
                CacheCounters::bump(&self.counters.loads);
                let mut state = self.lock_state();
                let newer = state
                    .entries
                    .peek(&key)
                    .is_some_and(|entry| entry.stored_at > detached.started);
                if state.generation(&key) != detached.generation {
                    debug!(?key, "discarding result invalidated while computing");
                } else if newer {
                    debug!(?key, "keeping entry stored after this computation started");
                } else {
                    self.store_entry(&mut state, key, value.clone(), ttl);
                }
                Ok(value)
            }
            Err(err) => {
                CacheCounters::bump(&self.counters.load_failures);
                Err(ComputeFailed(Arc::new(err)))
            }
        }
    }

    fn store_entry(&self, state: &mut CacheState<K, V, E>, key: K, value: V, ttl: Duration) {
        if !state.entries.contains(&key) && state.entries.len() == state.entries.cap().get() {
            CacheCounters::bump(&self.counters.evictions);
        }
        let stored_at = Instant::now();
        state.entries.put(
            key,
            Entry {
                value,
                expires_at: stored_at + ttl,
                stored_at,
            },
        );
    }
}

/// Clears the in-flight marker if the leader's future is dropped before it
/// publishes. Dropping the marker also drops the sender, which wakes the
/// followers so one of them can take over.
struct FlightGuard<'a, K, V, E>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    cache: &'a StampedeSafeCache<K, V, E>,
    key: &'a K,
    flight: &'a Arc<Flight<V, E>>,
    armed: bool,
}

impl<K, V, E> Drop for FlightGuard<'_, K, V, E>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.cache.lock_state();
        if state
            .flights
            .get(self.key)
            .is_some_and(|current| Arc::ptr_eq(current, self.flight))
        {
            state.flights.remove(self.key);
        }
        debug!(key = ?self.key, "computation cancelled before completion");
    }
}
