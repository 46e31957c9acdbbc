//! Ledger replay bench
//!
//! Usage:
//!   replay-bench run ./data/erc20 --results-path ./results
//!   replay-bench run ./data/erc20 --delta --interval 500
//!   replay-bench run ./data/erc20 --dry-run
//!   replay-bench naive-sizes --bundles ./results/single-repo-git-goc/bundles --output naive_sizes.csv
//!   replay-bench write-config replay.toml

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use replay_bench::config::{ReplayConfig, Variant, VariantConfig};
use replay_bench::measure::naive::bundle_naive_sizes;
use replay_bench::measure::sink::CsvTable;
use replay_bench::measure::snapshot::{SnapshotPipeline, SnapshotSettings};
use replay_bench::measure::store::GitStore;
use replay_bench::measure::sync_timing::SyncProbe;
use replay_bench::replay::feed::DailyLogFeed;
use replay_bench::replay::ledger::CommandLedger;
use replay_bench::replay::measurement::{MeasurementScheduler, NoMeasurement};
use replay_bench::replay::memory_ledger::MemoryLedger;
use replay_bench::replay::orchestrator::{ReplayRun, ReplayTables, RunSummary};
use replay_bench::replay::records::Normalizer;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Replay a token transfer log against a versioned ledger and measure storage growth
#[derive(Parser, Debug)]
#[command(name = "replay-bench")]
#[command(about = "Replay transfer logs against a versioned ledger and measure storage growth")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay every daily log in DATA_DIR
    Run {
        /// Directory of daily `.tsv.gz` exports
        data_dir: PathBuf,

        /// Config file (default: $REPLAY_CONFIG_PATH or ./replay.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Scratch directory root
        #[arg(long, env = "REPLAY_TMP_PATH")]
        tmp_path: Option<PathBuf>,

        /// Results directory root
        #[arg(long, env = "REPLAY_RESULTS_PATH")]
        results_path: Option<PathBuf>,

        /// Replay against the delta-encoded ledger
        #[arg(long)]
        delta: bool,

        /// Ledger calls between snapshots
        #[arg(long)]
        interval: Option<u64>,

        /// Replay against an in-memory ledger model; no executables, no snapshots
        #[arg(long)]
        dry_run: bool,
    },

    /// Naive blob/tree sizes for every persisted `<count>.bundle`
    NaiveSizes {
        #[arg(long)]
        bundles: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// Scratch directory for clones
        #[arg(long, default_value = "./tmp")]
        tmp_path: PathBuf,

        #[arg(long, default_value = "git")]
        git: PathBuf,
    },

    /// Write the default configuration to PATH
    WriteConfig { path: PathBuf },
}

fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            data_dir,
            config,
            tmp_path,
            results_path,
            delta,
            interval,
            dry_run,
        } => {
            let mut config = match config {
                Some(path) => ReplayConfig::load(&path)
                    .with_context(|| format!("Failed to load config: {:?}", path))?,
                None => ReplayConfig::from_env().context("Failed to load config")?,
            };
            if let Some(p) = tmp_path {
                config.tmp_path = p;
            }
            if let Some(p) = results_path {
                config.results_path = p;
            }
            if let Some(n) = interval {
                config.measurement_interval = n;
            }
            config.validate()?;

            let variant = if delta { Variant::Delta } else { Variant::State };
            run(&config, variant, &data_dir, dry_run)
        }
        Commands::NaiveSizes {
            bundles,
            output,
            tmp_path,
            git,
        } => {
            init_tracing(None);
            naive_sizes(&git, &bundles, &output, &tmp_path)
        }
        Commands::WriteConfig { path } => {
            ReplayConfig::default()
                .save(&path)
                .with_context(|| format!("Failed to write config: {:?}", path))?;
            println!("Wrote default config to {}", path.display());
            Ok(())
        }
    }
}

/// Initialize tracing; with a log file, everything also goes there without ANSI colours.
fn init_tracing(log_file: Option<fs::File>) {
    let file_layer = log_file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "replay_bench=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

/// Remove `dir` if present and create it empty.
fn fresh_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("Failed to clear {:?}", dir))?;
    }
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))
}

fn run(config: &ReplayConfig, variant: Variant, data_dir: &Path, dry_run: bool) -> Result<()> {
    let settings = config.variant(variant);
    let tmp_dir = config.variant_tmp_dir(variant);
    let results_dir = config.variant_results_dir(variant);

    fresh_dir(&results_dir)?;
    let log_path = results_dir.join("debug.log");
    let log_file =
        fs::File::create(&log_path).with_context(|| format!("Failed to create {:?}", log_path))?;
    init_tracing(Some(log_file));

    info!(
        "replaying {} against {} ({:?}, interval {})",
        data_dir.display(),
        settings.bin_dir.display(),
        variant,
        config.measurement_interval
    );

    let outcome = fresh_dir(&tmp_dir)
        .and_then(|()| replay(config, settings, data_dir, dry_run, &tmp_dir, &results_dir));

    if tmp_dir.exists() {
        if let Err(e) = fs::remove_dir_all(&tmp_dir) {
            warn!("Failed to remove {:?}: {}", tmp_dir, e);
        }
    }

    match outcome {
        Ok(summary) => {
            report(&summary);
            Ok(())
        }
        Err(e) => {
            error!("{:#}", e);
            Err(e)
        }
    }
}

/// Set up the ledger, feed and measurement for one variant and replay every batch.
fn replay(
    config: &ReplayConfig,
    settings: &VariantConfig,
    data_dir: &Path,
    dry_run: bool,
    tmp_dir: &Path,
    results_dir: &Path,
) -> Result<RunSummary> {
    let mut feed = DailyLogFeed::open(data_dir)
        .with_context(|| format!("Failed to open data directory {:?}", data_dir))?;
    let normalizer = Normalizer::new(config.null_account.clone());
    let measurement = MeasurementScheduler::new(config.measurement_interval);
    let tables = ReplayTables::open(results_dir)?;

    if dry_run {
        info!("dry run: in-memory ledger, no snapshots");
        let summary = ReplayRun::new(normalizer, measurement, MemoryLedger::new(), NoMeasurement)
            .with_tables(tables)
            .run(&mut feed)?;
        return Ok(summary);
    }

    if settings.ledger_dir.exists() {
        fs::remove_dir_all(&settings.ledger_dir)
            .with_context(|| format!("Failed to wipe ledger dir {:?}", settings.ledger_dir))?;
    }
    let ledger = CommandLedger::new(&settings.bin_dir, &settings.ledger_dir, config.commands.clone());
    let store = GitStore::new(&config.store.git, &config.store.sizer, &settings.ledger_dir)
        .with_marker_namespace(config.store.marker_namespace.clone());

    let sync = if config.sync.enabled {
        let sync_repo = fs::canonicalize(tmp_dir)
            .with_context(|| format!("Failed to resolve {:?}", tmp_dir))?
            .join("sync_repo");
        let probe = SyncProbe::new(
            &config.store.git,
            &settings.bin_dir,
            &settings.full_bin_dir,
            &settings.ledger_dir,
            sync_repo,
            config.sync.commands.clone(),
        );
        probe
            .initialize()
            .context("Failed to initialise the sync replica")?;
        Some(probe)
    } else {
        None
    };

    let pipeline = SnapshotPipeline::create(
        store,
        SnapshotSettings {
            results_dir: results_dir.to_path_buf(),
            scratch_root: tmp_dir.to_path_buf(),
            keep_incremental_bundles: config.store.keep_incremental_bundles,
        },
        sync,
    )?;

    let summary = ReplayRun::new(normalizer, measurement, ledger, pipeline)
        .with_tables(tables)
        .run(&mut feed)?;
    Ok(summary)
}

fn report(summary: &RunSummary) {
    info!(
        "{} batches, {} records, {} ledger calls ({} failed), {} snapshots, {} balances checked",
        summary.batches,
        summary.records,
        summary.counters.total,
        summary.counters.failed,
        summary.snapshots,
        summary.balances_checked
    );
    info!(
        "started {} and took {:.3}s",
        summary.started_at.to_rfc3339(),
        summary.duration.as_secs_f64()
    );
}

fn naive_sizes(git: &Path, bundles: &Path, output: &Path, tmp_path: &Path) -> Result<()> {
    if !bundles.is_dir() {
        bail!("bundle directory {:?} does not exist", bundles);
    }
    fresh_dir(tmp_path)?;

    let rows = bundle_naive_sizes(git, bundles, tmp_path);
    let _ = fs::remove_dir_all(tmp_path);
    let rows = rows.context("Failed to measure naive sizes")?;

    if output.exists() {
        fs::remove_file(output).with_context(|| format!("Failed to replace {:?}", output))?;
    }
    let mut table = CsvTable::open(output)?;
    for row in &rows {
        table.append(row)?;
    }
    info!("wrote {} rows to {}", rows.len(), output.display());
    Ok(())
}
