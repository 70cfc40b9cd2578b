//! Station resampling service.
//!
//! Loads a parameter document, then runs one resampling pass:
//! - Plans calendar-month retrievals from the requested timestamps
//! - Drops a retrieval request per month into the archive directory and
//!   waits for the matching batch
//! - Resolves every station and height level and appends the month to the
//!   SQLite result table
//!
//! Months already in the result table are skipped, so rerunning after a
//! failure resumes where the last run stopped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use grid_resampler::{
    ArchiveProvider, GapPolicy, PollConfig, ResampleConfig, Resampler, RunOptions, SqliteTableStore,
};

#[derive(Parser, Debug)]
#[command(name = "resampler")]
#[command(about = "Resample 3-hourly reanalysis grids onto station points")]
struct Args {
    /// Parameter document (JSON)
    #[arg(long, env = "RESAMPLER_PARAMS")]
    params: PathBuf,

    /// Directory where retrieval requests are written and batches appear
    #[arg(long, env = "RESAMPLER_ARCHIVE_DIR", default_value = "archive")]
    archive_dir: PathBuf,

    /// Result table database (default: the document's output name with a .db extension)
    #[arg(long, env = "RESAMPLER_OUTPUT")]
    output: Option<PathBuf>,

    /// What to do with rows built on missing messages: keep, drop or fail
    #[arg(long, env = "RESAMPLER_GAP_POLICY", default_value = "keep")]
    gap_policy: String,

    /// Save the table after every month
    #[arg(long)]
    checkpoint_months: bool,

    /// Fail when a stored month covers a different number of locations than planned
    #[arg(long)]
    strict_resume: bool,

    /// Initial wait between batch checks, in seconds
    #[arg(long, default_value = "5")]
    poll_interval_secs: u64,

    /// Maximum wait between batch checks, in seconds
    #[arg(long, default_value = "120")]
    max_poll_interval_secs: u64,

    /// Give up on a month after this many seconds
    #[arg(long, default_value = "86400")]
    max_wait_secs: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn output_path(args: &Args, config: &ResampleConfig) -> PathBuf {
    if let Some(output) = &args.output {
        return output.clone();
    }
    match &config.output {
        Some(name) => Path::new(name).with_extension("db"),
        None => PathBuf::from("results.db"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting station resampler");

    let config = ResampleConfig::load(&args.params)
        .with_context(|| format!("Failed to load parameter document {}", args.params.display()))?;

    let gap_policy: GapPolicy = args.gap_policy.parse()?;
    let options = RunOptions {
        gap_policy,
        checkpoint_months: args.checkpoint_months,
        strict_resume: args.strict_resume,
        ..Default::default()
    };

    let poll = PollConfig {
        initial_interval: Duration::from_secs(args.poll_interval_secs.max(1)),
        max_interval: Duration::from_secs(args.max_poll_interval_secs.max(1)),
        max_wait: Duration::from_secs(args.max_wait_secs),
    };
    let provider = ArchiveProvider::new(args.archive_dir.clone(), poll);

    let output = output_path(&args, &config);
    let store = SqliteTableStore::open(&output, &config.variables)
        .await
        .with_context(|| format!("Failed to open result table {}", output.display()))?;

    info!(
        params = %args.params.display(),
        archive_dir = %args.archive_dir.display(),
        output = %output.display(),
        gap_policy = ?options.gap_policy,
        "Configuration loaded"
    );

    let resampler = Resampler::new(config, options, provider, store);
    let outcome = resampler.run().await.context("Resampling run failed")?;

    info!(
        months_planned = outcome.report.months_planned,
        months_processed = outcome.report.months_processed,
        months_skipped = outcome.report.months_skipped,
        rows_appended = outcome.report.rows_appended,
        rows_dropped = outcome.report.rows_dropped,
        indexing_gaps = outcome.report.total_gaps(),
        total_rows = outcome.table.len(),
        "Resampler finished"
    );

    Ok(())
}
