use anyhow::{Context, Result, bail};
use clap::Parser;
use contendb::{
    Category, CategoryId, CategoryRepository, ContentionConfig, ContentionHarness, CounterStore,
    FavoriteService, InMemoryStore, ResourceId, RetryPolicy, StampedeSafeCache, StrategyKind,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "contention-bench")]
#[command(about = "Hammer one hot resource with concurrent favorites and check the counter")]
struct Cli {
    /// atomic, optimistic, pessimistic or all
    #[arg(long, default_value = "atomic")]
    strategy: String,

    #[arg(long, default_value_t = 500)]
    actors: usize,

    /// JSON file with a ContentionConfig; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    max_retries: Option<u32>,

    #[arg(long)]
    backoff_ms: Option<u64>,

    #[arg(long)]
    max_backoff_ms: Option<u64>,

    #[arg(long)]
    lock_timeout_ms: Option<u64>,

    /// Simulated store round-trip per call
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,

    /// Also run the single-flight cache scenario with this many callers
    #[arg(long)]
    cache_callers: Option<usize>,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let base = load_config(&cli)?;

    let kinds: Vec<StrategyKind> = if cli.strategy.eq_ignore_ascii_case("all") {
        StrategyKind::ALL.to_vec()
    } else {
        vec![cli.strategy.parse().context("invalid --strategy")?]
    };

    for kind in kinds {
        let mut config = base.clone();
        config.strategy = kind;
        run_favorites(&cli, config).await?;
    }

    if let Some(callers) = cli.cache_callers {
        run_cache(&cli, &base, callers).await?;
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<ContentionConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            ContentionConfig::from_json_str(&raw)
                .with_context(|| format!("invalid config in {}", path.display()))?
        }
        None => ContentionConfig::default(),
    };

    if cli.max_retries.is_some() || cli.backoff_ms.is_some() || cli.max_backoff_ms.is_some() {
        let max_retries = cli.max_retries.unwrap_or(config.retry.max_retries);
        let backoff_ms = cli.backoff_ms.unwrap_or(config.retry.backoff_ms);
        let max_backoff_ms = cli.max_backoff_ms.unwrap_or(config.retry.max_backoff_ms);
        config.retry = RetryPolicy::exponential(max_retries, backoff_ms, max_backoff_ms);
    }
    if let Some(ms) = cli.lock_timeout_ms {
        config.store = config.store.lock_timeout(Duration::from_millis(ms));
    }
    config.store = config
        .store
        .round_trip_latency(Duration::from_millis(cli.latency_ms));

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run_favorites(cli: &Cli, config: ContentionConfig) -> Result<()> {
    let resource = ResourceId(1);
    let store = Arc::new(InMemoryStore::with_config(config.store.clone()));
    store.create_counter(resource, 0).await?;

    let service = FavoriteService::new(store, &config)?;
    let report = ContentionHarness::run(&service, resource, cli.actors).await?;

    println!("strategy: {}", config.strategy);
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }

    if !report.is_consistent() {
        bail!(
            "counter drifted from membership records: count={} records={} created={}",
            report.final_count,
            report.record_count,
            report.created
        );
    }
    Ok(())
}

async fn run_cache(cli: &Cli, config: &ContentionConfig, callers: usize) -> Result<()> {
    let store = Arc::new(InMemoryStore::with_config(config.store.clone()));
    for (id, name) in ["Coffee", "Tea", "Bakery"].into_iter().enumerate() {
        store
            .save(Category::new(CategoryId(id as u64 + 1), name, id as i32))
            .await?;
    }

    let cache = Arc::new(StampedeSafeCache::new(config.cache.clone())?);
    let report = ContentionHarness::run_single_flight(&cache, "all", callers, move || {
        let store = Arc::clone(&store);
        async move { store.find_all_ordered().await.map(Arc::new) }
    })
    .await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}
