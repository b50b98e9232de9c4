//! # catalog-dl CLI
//!
//! Command-line interface for the catalog-dl library.
//! Reads a product catalog and downloads every referenced image into one folder.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use catalog_dl::{
    ensure_output_dir, prepare_batch, BatchConfig, BatchOptions, BatchReport, CollisionPolicy,
    DownloadOutcome, FetchOptions, PreparedBatch, DEFAULT_CATALOG_PATH, DEFAULT_OUTPUT_DIR,
};
use clap::{Parser, ValueEnum};
use log::{error, LevelFilter};

mod cli;

/// Exit status when the batch ran to completion, failed URLs included
const EXIT_COMPLETED: i32 = 0;

/// Exit status for fatal errors (bad arguments, output directory, report file)
const EXIT_FATAL: i32 = 1;

/// Exit status when the batch could not start (catalog problems, no URLs)
const EXIT_NOT_STARTED: i32 = 2;

/// Upper bound for --retries; backoff doubles per attempt
const MAX_RETRIES: i64 = 10;

/// Command-line interface for catalog-dl
#[derive(Parser, Debug)]
#[command(name = "catalog-dl")]
#[command(about = "Download every product image referenced by a catalog JSON export")]
#[command(long_about = "Downloads product images listed in a catalog export:
  catalog-dl                               # Read products_from_atlas.json into ./uploads
  catalog-dl products.json -o images       # Custom catalog and output folder
  catalog-dl products.json --dry-run       # Show URL -> filename mapping only

Accepted catalog shapes:
  [ {...}, ... ]  |  { \"products\": [...] }  |  { \"users\": [...] }

Exit status:
  0  batch ran to completion (individual downloads may have failed)
  1  fatal error (output directory, report file, invalid options)
  2  batch could not start (catalog missing/unreadable, no image URLs)")]
#[command(version)]
struct Cli {
    /// Catalog JSON file to read
    #[arg(default_value = DEFAULT_CATALOG_PATH)]
    catalog: PathBuf,

    /// Directory to save images into (created if missing)
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Maximum number of parallel downloads [default: 2x CPUs, between 4 and 16]
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Seconds to wait for a connection or for the next bytes of a response
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Retries for connection failures and timeouts (at most 10)
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..=MAX_RETRIES))]
    retries: u32,

    /// What to do when two URLs resolve to the same filename
    #[arg(long, value_enum, default_value_t = CollisionArg::Suffix)]
    on_collision: CollisionArg,

    /// Write a JSON report of every outcome to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Show what would be downloaded without downloading
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Collision handling as spelled on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CollisionArg {
    /// Number later files: photo-2.jpg, photo-3.jpg, ...
    Suffix,
    /// Skip later files and count them as failed
    Report,
    /// Let the last download win
    Overwrite,
}

impl From<CollisionArg> for CollisionPolicy {
    fn from(arg: CollisionArg) -> Self {
        match arg {
            CollisionArg::Suffix => CollisionPolicy::Suffix,
            CollisionArg::Report => CollisionPolicy::Report,
            CollisionArg::Overwrite => CollisionPolicy::Overwrite,
        }
    }
}

/// Build the batch configuration from CLI arguments
fn build_config(cli: &Cli) -> BatchConfig {
    let defaults = BatchConfig::default();

    BatchConfig {
        catalog_path: cli.catalog.clone(),
        output_dir: cli.output_dir.clone(),
        concurrency: cli.jobs.unwrap_or(defaults.concurrency),
        collision_policy: cli.on_collision.into(),
        fetch: FetchOptions {
            timeout: Duration::from_secs(cli.timeout),
            retries: cli.retries,
            ..defaults.fetch
        },
    }
}

/// Map an error to the process exit status
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<catalog_dl::Error>() {
        Some(e) if e.is_not_started() => EXIT_NOT_STARTED,
        _ => EXIT_FATAL,
    }
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => EXIT_COMPLETED,
        Err(e) => {
            error!("❌ Error: {e:#}");
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr; RUST_LOG overrides the default level
    env_logger::Builder::new()
        .filter_level(if cli.verbose { LevelFilter::Debug } else { LevelFilter::Error })
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    if cli.verbose {
        eprintln!("🛒 catalog-dl v{} starting...", env!("CARGO_PKG_VERSION"));
    }

    let config = build_config(&cli);
    config.validate()?;

    if cli.dry_run {
        eprintln!("📖 Reading product data from: '{}'", config.catalog_path.display());
        let prepared = prepare_batch(&config)?;
        show_plan(&prepared, &config.output_dir);
        return Ok(());
    }

    ensure_output_dir(&config.output_dir)?;

    eprintln!("📖 Reading product data from: '{}'", config.catalog_path.display());
    let prepared = prepare_batch(&config)?;
    eprintln!("🔎 Found {} unique image URL(s) to download.", prepared.url_count());

    let progress = Arc::new(cli::ProgressManager::new(
        prepared.url_count() as u64,
        &format!("🌐 Starting downloads into '{}'...", config.output_dir.display()),
    ));
    let options = BatchOptions {
        on_outcome: Some({
            let progress = Arc::clone(&progress);
            Arc::new(move |outcome: &DownloadOutcome| progress.record(outcome))
        }),
    };

    let report = prepared.execute(&config, &options).await?;
    progress.finish();

    show_summary(&report);

    if let Some(report_path) = &cli.report {
        write_report(&report, report_path)?;
        eprintln!("📝 Report written to '{}'", report_path.display());
    }

    Ok(())
}

/// Print the planned URL to filename mapping
fn show_plan(prepared: &PreparedBatch, output_dir: &Path) {
    eprintln!(
        "🔍 [DRY RUN] Would download {} image(s) into '{}':",
        prepared.url_count(),
        output_dir.display()
    );
    for download in prepared.plan.downloads() {
        eprintln!("  {} -> {}", download.url, download.filename);
    }
    for collision in &prepared.plan.collisions {
        eprintln!(
            "  {} -> skipped, '{}' already claimed by {}",
            collision.url, collision.filename, collision.claimed_by
        );
    }
}

/// Print the final report
fn show_summary(report: &BatchReport) {
    eprintln!();
    eprintln!("--- Download Report ---");
    eprintln!("Successfully downloaded: {} image(s)", report.succeeded);
    eprintln!("Failed to download: {} image(s)", report.failed);
    eprintln!("Images are saved in the '{}' folder.", report.output_dir.display());
}

/// Write the report as pretty-printed JSON
fn write_report(report: &BatchReport, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to '{}'", path.display()))?;
    Ok(())
}
