//! Batch orchestration for catalog-dl
//!
//! A batch goes through three phases: preparing (output directory, catalog,
//! target planning), processing (bounded pool of concurrent fetches) and
//! reporting (aggregated outcomes).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use log::{info, warn};
use serde::Serialize;

use crate::core::catalog::{load_catalog, CatalogShape};
use crate::core::error::{Error, Result};
use crate::core::fetcher::{FetchOptions, Fetcher};
use crate::core::filename::{plan_targets, CollisionPolicy, DownloadPlan, PlannedDownload};

/// Catalog file read when none is given
pub const DEFAULT_CATALOG_PATH: &str = "products_from_atlas.json";

/// Directory images are saved into when none is given
pub const DEFAULT_OUTPUT_DIR: &str = "uploads";

/// Upper bound on parallel fetches picked by default
const MAX_DEFAULT_CONCURRENCY: usize = 16;

/// Lower bound on parallel fetches picked by default
const MIN_DEFAULT_CONCURRENCY: usize = 4;

/// Default number of parallel fetches, scaled to the machine
pub fn default_concurrency() -> usize {
    (num_cpus::get() * 2).clamp(MIN_DEFAULT_CONCURRENCY, MAX_DEFAULT_CONCURRENCY)
}

/// Configuration for one batch run
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Catalog JSON file to read
    pub catalog_path: PathBuf,

    /// Flat directory images are written into
    pub output_dir: PathBuf,

    /// Maximum number of fetches in flight
    pub concurrency: usize,

    /// What to do when two URLs resolve to the same filename
    pub collision_policy: CollisionPolicy,

    /// Per-request fetch settings
    pub fetch: FetchOptions,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            concurrency: default_concurrency(),
            collision_policy: CollisionPolicy::default(),
            fetch: FetchOptions::default(),
        }
    }
}

impl BatchConfig {
    /// Configuration for the given paths with every other option defaulted
    pub fn new(catalog_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog_path: catalog_path.into(),
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::InvalidInput("concurrency must be at least 1".to_string()));
        }
        if self.fetch.chunk_size == 0 {
            return Err(Error::InvalidInput("chunk size must be at least 1 byte".to_string()));
        }
        if self.fetch.timeout.is_zero() {
            return Err(Error::InvalidInput("timeout must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Result of attempting one URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadOutcome {
    Saved {
        url: String,
        filename: String,
        bytes: u64,
    },
    Failed {
        url: String,
        filename: Option<String>,
        reason: String,
    },
}

impl DownloadOutcome {
    pub fn url(&self) -> &str {
        match self {
            DownloadOutcome::Saved { url, .. } | DownloadOutcome::Failed { url, .. } => url,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DownloadOutcome::Saved { .. })
    }
}

/// Aggregated result of a completed batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub catalog_path: PathBuf,
    pub output_dir: PathBuf,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Per-URL outcomes, sorted by URL
    pub outcomes: Vec<DownloadOutcome>,
}

impl BatchReport {
    fn new(catalog_path: &Path, output_dir: &Path, total: usize) -> Self {
        Self {
            catalog_path: catalog_path.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            total,
            succeeded: 0,
            failed: 0,
            outcomes: Vec::with_capacity(total),
        }
    }

    fn record(&mut self, outcome: DownloadOutcome) {
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }
}

/// Callback invoked once per URL as soon as its outcome is known
pub type OutcomeCallback = Arc<dyn Fn(&DownloadOutcome) + Send + Sync>;

/// Hooks for observing a running batch
#[derive(Clone, Default)]
pub struct BatchOptions {
    pub on_outcome: Option<OutcomeCallback>,
}

/// A loaded catalog with every URL assigned a target file
#[derive(Debug)]
pub struct PreparedBatch {
    pub catalog_path: PathBuf,
    pub shape: CatalogShape,
    pub urls: BTreeSet<String>,
    pub plan: DownloadPlan,
}

impl PreparedBatch {
    /// Number of unique image URLs in the batch
    pub fn url_count(&self) -> usize {
        self.urls.len()
    }

    /// Fetch every planned URL and collect the outcomes
    pub async fn execute(self, config: &BatchConfig, options: &BatchOptions) -> Result<BatchReport> {
        config.validate()?;
        let fetcher = Fetcher::new(config.fetch.clone())?;
        Ok(self.execute_with(&fetcher, config, options).await)
    }

    /// Same as [`execute`](Self::execute) with a caller-provided fetcher
    pub async fn execute_with(
        self,
        fetcher: &Fetcher,
        config: &BatchConfig,
        options: &BatchOptions,
    ) -> BatchReport {
        let PreparedBatch {
            catalog_path,
            urls,
            plan,
            ..
        } = self;

        let mut report = BatchReport::new(&catalog_path, &config.output_dir, urls.len());
        let notify = |report: &mut BatchReport, outcome: DownloadOutcome| {
            if let Some(ref callback) = options.on_outcome {
                callback(&outcome);
            }
            report.record(outcome);
        };

        for collision in plan.collisions {
            let reason = Error::FilenameCollision {
                filename: collision.filename.clone(),
                claimed_by: collision.claimed_by,
            };
            notify(
                &mut report,
                DownloadOutcome::Failed {
                    url: collision.url,
                    filename: Some(collision.filename),
                    reason: reason.to_string(),
                },
            );
        }

        info!(
            "Starting {} download(s) into '{}' with up to {} in flight",
            plan.groups.iter().map(Vec::len).sum::<usize>(),
            config.output_dir.display(),
            config.concurrency
        );

        let output_dir = config.output_dir.as_path();
        let stream = futures::stream::iter(plan.groups)
            .map(|group| download_group(fetcher, output_dir, group))
            .buffer_unordered(config.concurrency.max(1));

        tokio::pin!(stream);

        while let Some(outcomes) = stream.next().await {
            for outcome in outcomes {
                notify(&mut report, outcome);
            }
        }

        report.outcomes.sort_by(|a, b| a.url().cmp(b.url()));
        info!(
            "Batch finished: {} succeeded, {} failed, {} total",
            report.succeeded, report.failed, report.total
        );
        report
    }
}

/// Download every URL sharing one target file, strictly in order
async fn download_group(
    fetcher: &Fetcher,
    output_dir: &Path,
    group: Vec<PlannedDownload>,
) -> Vec<DownloadOutcome> {
    let mut outcomes = Vec::with_capacity(group.len());

    for PlannedDownload { url, filename } in group {
        let outcome = match fetcher.fetch_to(&url, output_dir, &filename).await {
            Ok(fetched) => DownloadOutcome::Saved {
                url,
                filename: fetched.filename,
                bytes: fetched.bytes,
            },
            Err(e) => {
                warn!("Failed to download {url}: {e}");
                DownloadOutcome::Failed {
                    url,
                    filename: Some(filename),
                    reason: e.to_string(),
                }
            }
        };
        outcomes.push(outcome);
    }

    outcomes
}

/// Create the output directory if it does not exist yet
pub fn ensure_output_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }

    std::fs::create_dir_all(path).map_err(|e| Error::OutputDir {
        path: path.to_path_buf(),
        source: e,
    })?;
    info!("Created directory: '{}'", path.display());
    Ok(())
}

/// Load the catalog and plan targets without touching the filesystem
pub fn prepare_batch(config: &BatchConfig) -> Result<PreparedBatch> {
    config.validate()?;

    let catalog = load_catalog(&config.catalog_path)?;
    let urls = catalog.image_urls();
    if urls.is_empty() {
        return Err(Error::NoImageUrls(config.catalog_path.clone()));
    }
    info!("Found {} unique image URL(s)", urls.len());

    let plan = plan_targets(urls.iter().map(String::as_str), config.collision_policy);

    Ok(PreparedBatch {
        catalog_path: catalog.path,
        shape: catalog.shape,
        urls,
        plan,
    })
}

/// Run a full batch: create the output directory, load, plan and download
pub async fn run_batch(config: &BatchConfig, options: &BatchOptions) -> Result<BatchReport> {
    config.validate()?;
    ensure_output_dir(&config.output_dir)?;
    let prepared = prepare_batch(config)?;
    prepared.execute(config, options).await
}
