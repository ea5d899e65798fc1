//! Drives many concurrent actors against one resource and checks that the
//! counter still matches the membership records afterwards.
//!
//! Shared by the integration tests and the `contention-bench` binary.

use crate::cache::StampedeSafeCache;
use crate::config::millis;
use crate::contention::FavoriteService;
use crate::core::{ActorId, MembershipOutcome, ResourceId, Result};
use crate::storage::CounterStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarnessReport {
    pub actors: usize,
    pub created: usize,
    pub already_exists: usize,
    /// Failed calls keyed by error kind
    pub failures: BTreeMap<String, usize>,
    pub final_count: i64,
    pub record_count: usize,
    #[serde(rename = "elapsed_ms", with = "millis")]
    pub elapsed: Duration,
    pub latency_us_p50: u64,
    pub latency_us_p95: u64,
    pub latency_us_p99: u64,
}

impl HarnessReport {
    /// Counter, record table and successful adds all agree.
    pub fn is_consistent(&self) -> bool {
        self.final_count >= 0
            && self.final_count as usize == self.record_count
            && self.record_count == self.created
    }

    pub fn failed(&self) -> usize {
        self.failures.values().sum()
    }

    pub fn failures_of(&self, kind: &str) -> usize {
        self.failures.get(kind).copied().unwrap_or(0)
    }

    pub fn throughput(&self) -> f64 {
        self.actors as f64 / self.elapsed.as_secs_f64().max(0.001)
    }
}

impl fmt::Display for HarnessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "contention results:")?;
        writeln!(f, "  actors: {}", self.actors)?;
        writeln!(f, "  created: {}", self.created)?;
        writeln!(f, "  already_exists: {}", self.already_exists)?;
        writeln!(f, "  failed: {}", self.failed())?;
        for (kind, count) in &self.failures {
            writeln!(f, "    {}: {}", kind, count)?;
        }
        writeln!(f, "  final_count: {}", self.final_count)?;
        writeln!(f, "  record_count: {}", self.record_count)?;
        writeln!(f, "  consistent: {}", self.is_consistent())?;
        writeln!(f, "  duration_s: {:.3}", self.elapsed.as_secs_f64())?;
        writeln!(f, "  ops_per_s: {:.2}", self.throughput())?;
        writeln!(f, "  latency_us_p50: {}", self.latency_us_p50)?;
        writeln!(f, "  latency_us_p95: {}", self.latency_us_p95)?;
        write!(f, "  latency_us_p99: {}", self.latency_us_p99)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SingleFlightReport {
    pub callers: usize,
    pub computations: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(rename = "elapsed_ms", with = "millis")]
    pub elapsed: Duration,
}

impl fmt::Display for SingleFlightReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "single_flight results:")?;
        writeln!(f, "  callers: {}", self.callers)?;
        writeln!(f, "  computations: {}", self.computations)?;
        writeln!(f, "  succeeded: {}", self.succeeded)?;
        writeln!(f, "  failed: {}", self.failed)?;
        write!(f, "  duration_s: {:.3}", self.elapsed.as_secs_f64())
    }
}

pub struct ContentionHarness;

impl ContentionHarness {
    /// `actors` distinct actors each add `resource` once, all released by
    /// the same start gate.
    pub async fn run<S: CounterStore>(
        service: &FavoriteService<S>,
        resource: ResourceId,
        actors: usize,
    ) -> Result<HarnessReport> {
        Self::run_actors(service, resource, (0..actors as u64).map(ActorId).collect()).await
    }

    /// Like `run`, but with an explicit actor list. Repeating an actor
    /// exercises idempotence under concurrency.
    pub async fn run_actors<S: CounterStore>(
        service: &FavoriteService<S>,
        resource: ResourceId,
        actors: Vec<ActorId>,
    ) -> Result<HarnessReport> {
        let total = actors.len();
        let gate = Arc::new(Barrier::new(total.max(1)));
        let mut handles = Vec::with_capacity(total);

        let start = Instant::now();
        for actor in actors {
            let service = service.clone();
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                gate.wait().await;
                let op_start = Instant::now();
                let outcome = service.add_favorite(actor, resource).await;
                (outcome, op_start.elapsed().as_micros() as u64)
            }));
        }

        let mut created = 0;
        let mut already_exists = 0;
        let mut failures: BTreeMap<String, usize> = BTreeMap::new();
        let mut latencies = Vec::with_capacity(total);

        for handle in handles {
            match handle.await {
                Ok((Ok(MembershipOutcome::Created), latency)) => {
                    created += 1;
                    latencies.push(latency);
                }
                Ok((Ok(MembershipOutcome::AlreadyExists), latency)) => {
                    already_exists += 1;
                    latencies.push(latency);
                }
                Ok((Err(err), latency)) => {
                    *failures.entry(err.kind().to_string()).or_default() += 1;
                    latencies.push(latency);
                }
                Err(join_err) => {
                    warn!(error = %join_err, "actor task did not complete");
                    *failures.entry("task_aborted".to_string()).or_default() += 1;
                }
            }
        }
        let elapsed = start.elapsed();
        latencies.sort_unstable();

        let report = HarnessReport {
            actors: total,
            created,
            already_exists,
            failures,
            final_count: service.get_favorite_count(resource).await?,
            record_count: service.count_favorite_records(resource).await?,
            elapsed,
            latency_us_p50: percentile(&latencies, 0.50),
            latency_us_p95: percentile(&latencies, 0.95),
            latency_us_p99: percentile(&latencies, 0.99),
        };

        info!(
            strategy = %service.strategy_kind(),
            actors = report.actors,
            created = report.created,
            failed = report.failed(),
            consistent = report.is_consistent(),
            elapsed_ms = elapsed.as_millis() as u64,
            "contention run finished"
        );
        Ok(report)
    }

    /// Invalidates `key`, then has `callers` tasks ask for it at once.
    /// `computations` in the report is how many times `compute` ran.
    pub async fn run_single_flight<K, V, E, F, Fut>(
        cache: &Arc<StampedeSafeCache<K, V, E>>,
        key: K,
        callers: usize,
        compute: F,
    ) -> SingleFlightReport
    where
        K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        E: Send + Sync + 'static,
        F: Fn() -> Fut + Clone + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send,
    {
        cache.invalidate(&key);

        let computations = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Barrier::new(callers.max(1)));
        let mut handles = Vec::with_capacity(callers);

        let start = Instant::now();
        for _ in 0..callers {
            let cache = Arc::clone(cache);
            let gate = Arc::clone(&gate);
            let computations = Arc::clone(&computations);
            let compute = compute.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                gate.wait().await;
                cache
                    .get_or_compute_default(key, move || {
                        computations.fetch_add(1, Ordering::SeqCst);
                        compute()
                    })
                    .await
                    .is_ok()
            }));
        }

        let mut succeeded = 0;
        let mut failed = 0;
        for handle in handles {
            match handle.await {
                Ok(true) => succeeded += 1,
                _ => failed += 1,
            }
        }

        let report = SingleFlightReport {
            callers,
            computations: computations.load(Ordering::SeqCst),
            succeeded,
            failed,
            elapsed: start.elapsed(),
        };
        info!(callers, computations = report.computations, "single-flight run finished");
        report
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx]
}
