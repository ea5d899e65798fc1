//! Statement-count instrumentation.
//!
//! Store calls report the statement they stand for through
//! [`record_statement`]. When the calling task runs inside [`scope`], the
//! statement is tallied on that scope's [`RequestContext`]; outside a scope
//! the call does nothing. Nothing here feeds back into control flow.

use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;

tokio::task_local! {
    static CURRENT_REQUEST: Arc<RequestContext>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StatementKind::Select => "SELECT",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
        };
        write!(f, "{label}")
    }
}

/// Per-request statement tally.
#[derive(Debug)]
pub struct RequestContext {
    method: String,
    path: String,
    started_at: Instant,
    counts: Mutex<Tally>,
}

#[derive(Debug, Default)]
struct Tally {
    by_kind: BTreeMap<StatementKind, u32>,
    by_table: BTreeMap<String, u32>,
}

/// Snapshot of a finished (or running) request scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatementCounts {
    pub by_kind: BTreeMap<StatementKind, u32>,
    pub by_table: BTreeMap<String, u32>,
    pub elapsed: Duration,
}

impl StatementCounts {
    pub fn total(&self) -> u32 {
        self.by_kind.values().sum()
    }

    pub fn of(&self, kind: StatementKind) -> u32 {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            started_at: Instant::now(),
            counts: Mutex::new(Tally::default()),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn record(&self, kind: StatementKind, table: &str) {
        // A poisoned tally only loses observability data.
        if let Ok(mut tally) = self.counts.lock() {
            *tally.by_kind.entry(kind).or_insert(0) += 1;
            *tally.by_table.entry(table.to_ascii_lowercase()).or_insert(0) += 1;
        }
    }

    pub fn snapshot(&self) -> StatementCounts {
        let elapsed = self.started_at.elapsed();
        match self.counts.lock() {
            Ok(tally) => StatementCounts {
                by_kind: tally.by_kind.clone(),
                by_table: tally.by_table.clone(),
                elapsed,
            },
            Err(_) => StatementCounts {
                elapsed,
                ..StatementCounts::default()
            },
        }
    }
}

/// Tallies a statement on the current request scope, if there is one.
pub fn record_statement(kind: StatementKind, table: &str) {
    let _ = CURRENT_REQUEST.try_with(|ctx| ctx.record(kind, table));
}

/// Runs `fut` with `ctx` as the current request scope and returns its output
/// together with the statements it issued.
pub async fn scope<F>(ctx: RequestContext, fut: F) -> (F::Output, StatementCounts)
where
    F: Future,
{
    let ctx = Arc::new(ctx);
    let output = CURRENT_REQUEST.scope(Arc::clone(&ctx), fut).await;
    let counts = ctx.snapshot();

    if counts.total() > 0 {
        info!(
            method = %ctx.method,
            path = %ctx.path,
            queries = ?counts.by_kind,
            elapsed_ms = counts.elapsed.as_millis() as u64,
            "request statements"
        );
    }

    (output, counts)
}
