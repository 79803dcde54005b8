//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use harvester_discovery::{Discoverer, DiscoveryOptions, ManifestStore};
use harvester_fetch::HttpFetcher;
use harvester_pipeline::{Orchestrator, RunReport, standard_handlers, verify_unit};
use harvester_pool::{BreakerRegistry, WorkerPool};
use harvester_progress::ProgressTracker;
use harvester_shared::{
    AppConfig, CatalogStore, ContentIndexer, ExecutionMode, Fetcher, OrchestratorConfig,
    PoolConfig, UnitState, init_config, load_config,
};
use harvester_storage::{Catalog, ChunkIndexer, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Harvester — discover, retrieve, and index content sources.
#[derive(Parser)]
#[command(
    name = "harvester",
    version,
    about = "Run the discover/retrieve/index pipeline over configured content sources.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Pipeline execution mode override.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum ModeArg {
    Sequential,
    Pipelined,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Sequential => ExecutionMode::Sequential,
            ModeArg::Pipelined => ExecutionMode::Pipelined,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the pipeline for configured units.
    Run {
        /// Run only this unit (defaults to every configured unit).
        #[arg(short, long)]
        unit: Option<String>,

        /// Override the configured execution mode.
        #[arg(short, long)]
        mode: Option<ModeArg>,
    },

    /// Print the shared progress snapshot.
    Status {
        /// Emit the raw progress document as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Recompute a unit's coverage against its discovery manifest.
    Verify {
        /// Unit name.
        unit: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "harvester=info",
        1 => "harvester=debug",
        _ => "harvester=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run { unit, mode } => cmd_run(unit.as_deref(), mode).await,
        Command::Status { json } => cmd_status(json).await,
        Command::Verify { unit } => cmd_verify(&unit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(unit: Option<&str>, mode: Option<ModeArg>) -> Result<()> {
    let config = load_config()?;

    let mut units = config.units.clone();
    if let Some(name) = unit {
        units.retain(|u| u.name == name);
        if units.is_empty() {
            return Err(eyre!("unit '{name}' not found in configuration"));
        }
    }
    if units.is_empty() {
        return Err(eyre!(
            "no units configured; add [[units]] entries to harvester.toml"
        ));
    }

    // Storage and capability implementations.
    let storage = Arc::new(Storage::open(&config.db_path()).await?);
    for spec in &units {
        storage.upsert_unit(&spec.name, &spec.origin).await?;
    }
    let catalog: Arc<dyn CatalogStore> = Arc::new(Catalog::new(storage.clone()));
    let chunker: Arc<dyn ContentIndexer> = Arc::new(ChunkIndexer::new(storage.clone()));
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new()?);

    let discoverer = Arc::new(Discoverer::new(
        fetcher.clone(),
        ManifestStore::new(config.manifest_dir()),
        DiscoveryOptions::from(&config.discovery),
    ));

    // Pool with injected handlers and breakers.
    let handlers = standard_handlers(discoverer, fetcher, chunker, catalog.clone());
    let breakers = BreakerRegistry::standard(
        config.breakers.failure_threshold,
        Duration::from_secs(config.breakers.cooldown_secs),
    );
    let pool = Arc::new(WorkerPool::new(PoolConfig::from(&config), handlers, breakers));
    pool.start();

    let progress = Arc::new(ProgressTracker::new(config.progress_path()));
    let mut orchestrator_config = OrchestratorConfig::from(&config);
    if let Some(mode) = mode {
        orchestrator_config.mode = mode.into();
    }

    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        catalog,
        ManifestStore::new(config.manifest_dir()),
        progress.clone(),
        orchestrator_config,
    ));

    // Ctrl-C exits between units; in-flight tasks finish.
    {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping between units");
                orchestrator.stop();
            }
        });
    }

    info!(units = units.len(), "starting run");
    let run_id = storage.insert_run().await?;

    let (poller, bar) = spawn_progress_bar(progress.clone());
    let report = orchestrator.clone().submit(units).wait().await?;
    poller.abort();
    bar.finish_and_clear();

    storage
        .update_run(&run_id, &serde_json::to_string(&report)?)
        .await?;
    pool.stop().await;

    print_report(&report);
    Ok(())
}

/// Poll the shared progress document every 500ms into an indicatif bar.
fn spawn_progress_bar(
    progress: Arc<ProgressTracker>,
) -> (tokio::task::JoinHandle<()>, ProgressBar) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let poll_bar = bar.clone();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(500));
        loop {
            ticker.tick().await;
            let rec = progress.snapshot();
            poll_bar.set_length(rec.discovered.max(1));
            poll_bar.set_position(rec.processed);
            if let Some(step) = rec.current_step {
                poll_bar.set_message(step);
            }
        }
    });
    (handle, bar)
}

fn print_report(report: &RunReport) {
    println!();
    for unit in &report.units {
        match unit.state {
            UnitState::Failed => {
                println!(
                    "  {}: FAILED ({})",
                    unit.unit,
                    unit.error.as_deref().unwrap_or("unknown error")
                );
            }
            _ => {
                println!(
                    "  {}: discovered {}, retrieved {} (skipped {}), indexed {} (skipped {}), coverage {:.1}%",
                    unit.unit,
                    unit.discovered,
                    unit.retrieved,
                    unit.retrieval_skipped,
                    unit.indexed,
                    unit.indexing_skipped,
                    unit.coverage,
                );
                for failure in &unit.failures {
                    println!("      failed: {} ({})", failure.identifier, failure.error);
                }
                if !unit.missing.is_empty() {
                    println!("      missing {} identifiers; re-run to close the gap", unit.missing.len());
                }
            }
        }
    }
    println!();
    println!(
        "  {} unit(s), {} newly indexed, {} failed unit(s), {:.1}s",
        report.units.len(),
        report.total_indexed(),
        report.failed_units(),
        report.elapsed_ms as f64 / 1000.0,
    );
    println!();
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

async fn cmd_status(json: bool) -> Result<()> {
    let config = load_config()?;
    let tracker = ProgressTracker::new(config.progress_path());
    let rec = tracker.snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&rec)?);
        return Ok(());
    }

    println!();
    println!("  running:    {}", rec.is_running);
    if let Some(unit) = &rec.current_unit {
        println!("  unit:       {unit}");
    }
    if let Some(step) = &rec.current_step {
        println!("  step:       {step}");
    }
    println!("  discovered: {}", rec.discovered);
    println!("  processed:  {}", rec.processed);
    println!("  indexed:    {}", rec.indexed);
    if !rec.errors.is_empty() {
        println!("  errors:     {}", rec.errors.len());
        for error in rec.errors.iter().rev().take(5) {
            println!("      {error}");
        }
    }
    if let Some(updated) = rec.last_updated {
        println!("  updated:    {updated}");
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// verify
// ---------------------------------------------------------------------------

async fn cmd_verify(unit: &str) -> Result<()> {
    let config = load_config()?;

    let manifests = ManifestStore::new(config.manifest_dir());
    let manifest = manifests
        .load(unit)?
        .ok_or_else(|| eyre!("unit '{unit}' has no discovery manifest yet; run it first"))?;

    let storage = Arc::new(Storage::open_readonly(&config.db_path()).await?);
    let catalog = Catalog::new(storage);
    let gap = verify_unit(&manifest, &catalog).await?;

    println!();
    println!(
        "  {}: {}/{} indexed, coverage {:.1}%",
        gap.unit, gap.indexed, gap.discovered, gap.coverage
    );
    if !gap.missing.is_empty() {
        println!("  missing:");
        for identifier in gap.missing.iter().take(20) {
            println!("      {identifier}");
        }
        if gap.missing.len() > 20 {
            println!("      ... and {} more", gap.missing.len() - 20);
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("created {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
