//! # catalog-dl
//!
//! Downloads the product images referenced by an exported catalog.
//!
//! A catalog is a JSON document holding product records, either as a bare
//! array or wrapped under `products` or `users`. Every `thumbnail` and
//! `images` URL is collected, deduplicated and saved into one flat directory.
//! Generic basenames shared between products (`1.webp`, `thumbnail.webp`, ...)
//! are prefixed with the product slug so they do not overwrite each other.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! # async fn example() -> catalog_dl::Result<()> {
//! let report = catalog_dl::run("products.json", "uploads").await?;
//! println!("{} saved, {} failed", report.succeeded, report.failed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Filenames
//!
//! ```rust
//! use catalog_dl::resolve_filename;
//!
//! assert_eq!(
//!     resolve_filename("https://cdn.example.com/products/electric-kettle/1.webp"),
//!     "electric-kettle-1.webp"
//! );
//! ```

use std::path::Path;

pub mod core;

pub use crate::core::batch::{
    default_concurrency, ensure_output_dir, prepare_batch, run_batch, BatchConfig, BatchOptions,
    BatchReport, DownloadOutcome, OutcomeCallback, PreparedBatch, DEFAULT_CATALOG_PATH,
    DEFAULT_OUTPUT_DIR,
};
pub use crate::core::catalog::{extract_image_urls, load_catalog, Catalog, CatalogShape};
pub use crate::core::error::{Error, Result};
pub use crate::core::fetcher::{FetchOptions, FetchedFile, Fetcher};
pub use crate::core::filename::{
    fallback_filename, plan_targets, resolve_filename, sanitize, try_resolve_filename,
    CollisionPolicy, DownloadPlan, PlannedDownload,
};

/// Download every image of a catalog into `output_dir` with default settings
pub async fn run<P: AsRef<Path>, Q: AsRef<Path>>(catalog_path: P, output_dir: Q) -> Result<BatchReport> {
    let config = BatchConfig::new(catalog_path.as_ref(), output_dir.as_ref());
    run_batch(&config, &BatchOptions::default()).await
}

/// Download a single URL into `output_dir` under its resolved filename
pub async fn download_one(url: &str, output_dir: &Path) -> Result<FetchedFile> {
    Fetcher::new(FetchOptions::default())?
        .download(url, output_dir)
        .await
}
