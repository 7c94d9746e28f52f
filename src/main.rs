//! dexfetch - fetch named records concurrently and store them as JSON artifacts

use clap::Parser;
use dexfetch::{Config, Orchestrator, RunSummary, cancel_on_signal, items};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit code when at least one item failed
const EXIT_FAILURES: u8 = 1;
/// Exit code when the run could not start
const EXIT_PREFLIGHT: u8 = 2;

/// Fetch records concurrently with bounded retries
#[derive(Parser, Debug)]
#[command(name = "dexfetch", version)]
#[command(
    about = "Fetch named records over HTTP and store them as JSON artifacts",
    long_about = None
)]
struct Cli {
    /// Item ids to fetch (defaults to a built-in list)
    items: Vec<String>,

    /// Read item ids from a file, one per line ('#' starts a comment)
    #[arg(long, conflicts_with = "items")]
    items_file: Option<PathBuf>,

    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL; items are fetched from {base_url}/{item_id}
    #[arg(long)]
    base_url: Option<String>,

    /// Directory for artifacts
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Attempts per item, including the first
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Delay before a retry, in milliseconds (doubled for HTTP 429)
    #[arg(long)]
    base_delay_ms: Option<u64>,

    /// Connect timeout in seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Total request timeout in seconds
    #[arg(long)]
    total_timeout: Option<u64>,

    /// Maximum in-flight fetches (unbounded when absent)
    #[arg(short = 'j', long)]
    max_concurrency: Option<usize>,

    /// Do not refetch items whose artifact already exists
    #[arg(long)]
    skip_existing: bool,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Age in seconds after which another writer's partial file is abandoned
    #[arg(long)]
    stale_partial_secs: Option<u64>,

    /// Interval between progress lines, in milliseconds
    #[arg(long)]
    progress_interval_ms: Option<u64>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn load_config(&self) -> dexfetch::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(base_url) = &self.base_url {
            config.api.base_url = base_url.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output.output_dir = dir.clone();
        }
        if let Some(n) = self.max_attempts {
            config.retry.max_attempts = n;
        }
        if let Some(ms) = self.base_delay_ms {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = self.connect_timeout {
            config.api.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.total_timeout {
            config.api.total_timeout = Duration::from_secs(secs);
        }
        if self.max_concurrency.is_some() {
            config.max_concurrency = self.max_concurrency;
        }
        if self.skip_existing {
            config.output.skip_existing = true;
        }
        if let Some(path) = &self.summary {
            config.output.summary_path = Some(path.clone());
        }
        if let Some(secs) = self.stale_partial_secs {
            config.output.stale_partial_age = Duration::from_secs(secs);
        }
        if let Some(ms) = self.progress_interval_ms {
            config.progress_interval = Duration::from_millis(ms);
        }

        Ok(config)
    }

    fn load_items(&self) -> dexfetch::Result<Vec<String>> {
        if let Some(path) = &self.items_file {
            items::load_items_file(path)
        } else if self.items.is_empty() {
            Ok(items::default_items())
        } else {
            Ok(self.items.clone())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load the inputs, run every item and report the summary
///
/// An `Err` means the run never started (bad config, unreadable items file,
/// failed pre-flight) or failed as a whole. Item failures are part of the
/// returned summary.
async fn execute(cli: &Cli) -> dexfetch::Result<RunSummary> {
    let config = cli
        .load_config()
        .inspect_err(|e| tracing::error!(error = %e, "Failed to load configuration"))?;
    let items = cli
        .load_items()
        .inspect_err(|e| tracing::error!(error = %e, "Failed to load item list"))?;
    let summary_path = config.output.summary_path.clone();

    let orchestrator = Orchestrator::new(config)
        .await
        .inspect_err(|e| tracing::error!(error = %e, "Pre-flight check failed"))?;

    let signal_task = tokio::spawn(cancel_on_signal(orchestrator.cancellation_token()));
    let result = orchestrator.run(items).await;
    signal_task.abort();
    let summary = result.inspect_err(|e| tracing::error!(error = %e, "Run failed"))?;

    println!("{summary}");

    if let Some(path) = summary_path {
        match summary.write_json(&path).await {
            Ok(()) => tracing::info!(path = %path.display(), "Summary written"),
            Err(e) => tracing::error!(error = %e, "Failed to write summary file"),
        }
    }

    Ok(summary)
}

/// Process exit status for a finished (or never started) run
fn exit_status(result: &dexfetch::Result<RunSummary>) -> u8 {
    match result {
        Ok(summary) if summary.all_succeeded() => 0,
        Ok(_) => EXIT_FAILURES,
        Err(_) => EXIT_PREFLIGHT,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    ExitCode::from(exit_status(&execute(&cli).await))
}
