use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use harvest_client::{ChromiumDriver, LaunchOptions};
use harvest_core::{
    CrawlConfig, CrawlContext, CrawlOrchestrator, CrawlSummary, JsonProgressStore,
    JsonRecordStore, KnownItemPolicy, ProgressStore, RecordStore, ScanDirection, SessionLimits,
    SiteProfile, StrategyPreference, TracingCrawlReporter,
};

#[derive(Parser)]
#[command(name = "harvest", version, about = "Resumable year-by-year catalog crawler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the catalog, resuming from stored progress
    Crawl(CrawlArgs),

    /// Show stored progress and record counts
    Status {
        #[command(flatten)]
        state: StateArgs,
    },
}

#[derive(Args)]
struct StateArgs {
    /// Records document (JSON array)
    #[arg(long, env = "HARVEST_RECORDS", default_value = "records.json")]
    records: PathBuf,

    /// Progress document (JSON object)
    #[arg(long, env = "HARVEST_PROGRESS", default_value = "progress.json")]
    progress: PathBuf,
}

#[derive(Args)]
struct CrawlArgs {
    #[command(flatten)]
    state: StateArgs,

    /// Site profile JSON overriding the default selectors and URLs
    #[arg(long, env = "HARVEST_PROFILE")]
    profile: Option<PathBuf>,

    /// Stop after completing this many years
    #[arg(long, env = "HARVEST_MAX_FACETS")]
    max_facets: Option<usize>,

    /// Stop once this many new records were added (0 = unlimited)
    #[arg(long, env = "HARVEST_MAX_ITEMS", default_value_t = 50)]
    max_items: usize,

    /// Pages walked per year before it is treated as complete
    #[arg(long, env = "HARVEST_MAX_PAGES", default_value_t = 20)]
    max_pages: usize,

    /// Wall-clock budget in seconds; the run stops cleanly when it expires
    #[arg(long, env = "HARVEST_MAX_RUNTIME")]
    max_runtime: Option<u64>,

    /// Extraction strategy: auto, structured or dom
    #[arg(long, env = "HARVEST_STRATEGY", default_value = "auto")]
    strategy: StrategyPreference,

    /// Already stored items: skip or refresh
    #[arg(long, env = "HARVEST_KNOWN", default_value = "skip")]
    known: KnownItemPolicy,

    /// Year order: desc or asc
    #[arg(long, env = "HARVEST_DIRECTION", default_value = "desc")]
    direction: ScanDirection,

    /// Follow new items to their detail view (DOM strategy only)
    #[arg(long, overrides_with = "no_details")]
    details: bool,

    /// Skip detail views
    #[arg(long = "no-details", overrides_with = "details")]
    no_details: bool,

    /// Also resolve the player URL from each watch view
    #[arg(long, env = "HARVEST_WATCH")]
    watch: bool,

    /// First year of the fallback domain
    #[arg(long, env = "HARVEST_FROM")]
    from: Option<i32>,

    /// Last year of the fallback domain
    #[arg(long, env = "HARVEST_TO")]
    to: Option<i32>,

    /// Show the browser window
    #[arg(long, env = "HARVEST_HEADFUL")]
    headful: bool,

    /// Per-call browser timeout in seconds
    #[arg(long, env = "HARVEST_CALL_TIMEOUT", default_value_t = 30)]
    call_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("harvest=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Crawl(args) => cmd_crawl(args).await,
        Commands::Status { state } => cmd_status(&state).await,
    }
}

fn build_config(args: &CrawlArgs) -> Result<CrawlConfig> {
    let mut config = CrawlConfig::default();
    if let Some(path) = &args.profile {
        config.site = SiteProfile::from_file(path)
            .with_context(|| format!("Failed to read site profile: {}", path.display()))?;
    }
    config.limits = SessionLimits {
        max_facets: args.max_facets,
        max_new_items: (args.max_items > 0).then_some(args.max_items),
    };
    config.max_pages_per_facet = args.max_pages;
    config.strategy = args.strategy;
    config.known_items = args.known;
    config.direction = args.direction;
    config.fetch_details = args.details || !args.no_details;
    config.fetch_watch = args.watch;
    let (start, end) = config.default_domain;
    config.default_domain = (args.from.unwrap_or(start), args.to.unwrap_or(end));
    config.validate().map_err(|e| anyhow::anyhow!(e))?;
    Ok(config)
}

async fn cmd_crawl(args: CrawlArgs) -> Result<()> {
    let config = build_config(&args)?;

    tracing::info!(
        records = %args.state.records.display(),
        progress = %args.state.progress.display(),
        strategy = ?config.strategy,
        "Starting crawl"
    );

    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());
    if let Some(secs) = args.max_runtime {
        spawn_deadline(cancel.clone(), Duration::from_secs(secs));
    }

    let driver = ChromiumDriver::launch(LaunchOptions {
        headless: !args.headful,
        call_timeout: Duration::from_secs(args.call_timeout),
        chrome_bin: None,
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))
    .context("Browser could not be started")?;

    let ctx = CrawlContext::new(driver, config).with_cancel(cancel);
    let mut orchestrator = CrawlOrchestrator::new(
        ctx,
        JsonRecordStore::new(&args.state.records),
        JsonProgressStore::new(&args.state.progress),
    );

    let result = orchestrator.run(&TracingCrawlReporter).await;
    orchestrator.into_context().driver.shutdown().await;

    let summary = result
        .map_err(|e| anyhow::anyhow!(e))
        .context("Crawl aborted; progress was saved for the next run")?;
    print_summary(&summary);
    Ok(())
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing current page");
            cancel.cancel();
        }
    });
}

fn spawn_deadline(cancel: CancellationToken, budget: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(budget) => {
                tracing::warn!(seconds = budget.as_secs(), "Runtime budget spent, stopping");
                cancel.cancel();
            }
            () = cancel.cancelled() => {}
        }
    });
}

fn print_summary(summary: &CrawlSummary) {
    println!("Crawl finished: {}", summary.outcome);
    if let Some(strategy) = summary.strategy {
        println!("  strategy:         {strategy}");
    }
    println!("  new records:      {}", summary.new_records);
    println!("  updated records:  {}", summary.updated_records);
    println!("  total records:    {}", summary.total_records);
    println!(
        "  years completed:  {} this session, {} overall",
        summary.facets_completed_session, summary.facets_completed_total
    );
    println!("  years remaining:  {}", summary.facets_remaining);
    println!("  pages walked:     {}", summary.pages_walked);
    if summary.soft_failures > 0 {
        println!("  soft failures:    {}", summary.soft_failures);
    }
}

async fn cmd_status(state: &StateArgs) -> Result<()> {
    let records = JsonRecordStore::new(&state.records)
        .load()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("Failed to read {}", display(&state.records)))?;
    let progress = JsonProgressStore::new(&state.progress)
        .load()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("Failed to read {}", display(&state.progress)))?;

    println!("Records: {} in {}", records.len(), display(&state.records));

    let mut per_year: BTreeMap<Option<i32>, usize> = BTreeMap::new();
    for record in records.iter() {
        *per_year.entry(record.year).or_default() += 1;
    }
    for (year, count) in per_year.iter().rev() {
        match year {
            Some(year) => println!("  {year}: {count}"),
            None => println!("  unknown: {count}"),
        }
    }

    let Some(progress) = progress else {
        println!("\nNo progress stored yet; the next crawl starts fresh.");
        return Ok(());
    };

    println!("\nProgress ({}):", display(&state.progress));
    println!(
        "  completed:  {}/{} years",
        progress.completed_in_domain(),
        progress.domain.len()
    );
    match progress.current {
        Some(year) => println!("  next year:  {year}"),
        None => println!("  next year:  none (domain exhausted)"),
    }
    println!("  last session added {} records", progress.session_new);
    if let Some(updated_at) = progress.updated_at {
        println!("  updated:    {}", updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(error) = &progress.last_error {
        println!("  last error: {error}");
    }
    Ok(())
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
