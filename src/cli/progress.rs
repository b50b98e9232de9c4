//! CLI-specific progress handling for catalog-dl
//!
//! Shows one bar for the whole batch and prints a line per finished URL above it.

use catalog_dl::DownloadOutcome;
use indicatif::{ProgressBar, ProgressStyle};

/// Creates a progress bar counting processed image URLs
pub fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} images ({percent}%) ETA: {eta}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Human-readable line for one finished URL
pub fn outcome_line(outcome: &DownloadOutcome) -> String {
    match outcome {
        DownloadOutcome::Saved { url, filename, .. } => {
            format!("✅ Successfully downloaded: {filename} (from {url})")
        }
        DownloadOutcome::Failed { url, reason, .. } => {
            format!("❌ Failed to download {url}: {reason}")
        }
    }
}

/// Progress manager for a batch of downloads
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager
    pub fn new(total: u64, message: &str) -> Self {
        let pb = create_progress_bar(total);

        eprintln!("{}", message);

        Self { pb }
    }

    /// Print the outcome above the bar and advance it
    ///
    /// A hidden bar (stderr is not a terminal) swallows `println`, so the
    /// line goes straight to stderr instead.
    pub fn record(&self, outcome: &DownloadOutcome) {
        let line = outcome_line(outcome);
        if self.pb.is_hidden() {
            eprintln!("{line}");
        } else {
            self.pb.println(line);
        }
        self.pb.inc(1);
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}
