//! Error types for catalog-dl
//!
//! Provides typed errors for every fallible step of a batch: catalog loading,
//! filename derivation, fetching and writing.

use std::fmt;
use std::path::PathBuf;

use strsim::{jaro_winkler, normalized_levenshtein};

/// Keys under which a catalog object may wrap its product list
pub const WRAPPER_KEYS: [&str; 2] = ["products", "users"];

/// Suggest a wrapper key for a catalog object whose keys are all unrecognized
///
/// Returns the recognized key closest to one of `keys`, if any is close enough
/// to be a plausible typo (`"product"`, `"Users"`, `"prodcuts"`).
pub fn suggest_wrapper_key<'a, I>(keys: I) -> Option<&'static str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(&'static str, f64)> = None;

    for key in keys {
        let key_lower = key.trim().to_lowercase();
        if key_lower.is_empty() {
            continue;
        }

        for candidate in WRAPPER_KEYS {
            let jw_score = jaro_winkler(&key_lower, candidate);
            let lev_score = normalized_levenshtein(&key_lower, candidate);
            let score = jw_score * 0.6 + lev_score * 0.4;

            if score >= 0.8 && best.map_or(true, |(_, s)| score > s) {
                best = Some((candidate, score));
            }
        }
    }

    best.map(|(candidate, _)| candidate)
}

/// Main error type for catalog-dl operations
#[derive(Debug)]
pub enum Error {
    /// Catalog file does not exist
    CatalogNotFound(PathBuf),

    /// Catalog file exists but could not be read
    CatalogRead { path: PathBuf, source: std::io::Error },

    /// Catalog content is not valid JSON
    CatalogParse { path: PathBuf, message: String },

    /// Catalog parsed but its top-level shape is not a product list
    UnrecognizedShape {
        path: PathBuf,
        detail: String,
        hint: Option<&'static str>,
    },

    /// Catalog was readable but yielded no image URLs
    NoImageUrls(PathBuf),

    /// Output directory could not be created
    OutputDir { path: PathBuf, source: std::io::Error },

    /// URL could not be parsed
    InvalidUrl(String),

    /// Server answered with a non-success status
    HttpStatus { url: String, status: u16 },

    /// HTTP-specific error
    HttpError(String),

    /// Network connectivity issues (connect failures, timeouts)
    NetworkError(String),

    /// File I/O error
    IoError(std::io::Error),

    /// Another URL in the same batch already claimed this filename
    FilenameCollision { filename: String, claimed_by: String },

    /// Invalid configuration or parameters
    InvalidInput(String),
}

impl Error {
    /// Whether this error means the batch never reached the processing state
    pub fn is_not_started(&self) -> bool {
        matches!(
            self,
            Error::CatalogNotFound(_)
                | Error::CatalogRead { .. }
                | Error::CatalogParse { .. }
                | Error::UnrecognizedShape { .. }
                | Error::NoImageUrls(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CatalogNotFound(path) => {
                write!(f, "Catalog file not found at '{}'", path.display())
            }
            Error::CatalogRead { path, source } => {
                write!(f, "Could not read catalog '{}': {}", path.display(), source)
            }
            Error::CatalogParse { path, message } => {
                write!(
                    f,
                    "Could not decode JSON from '{}': {}",
                    path.display(),
                    message
                )
            }
            Error::UnrecognizedShape { path, detail, hint } => {
                write!(
                    f,
                    "JSON structure in '{}' is not a recognized product list: {}",
                    path.display(),
                    detail
                )?;
                if let Some(key) = hint {
                    write!(f, " (did you mean '{key}'?)")?;
                }
                Ok(())
            }
            Error::NoImageUrls(path) => {
                write!(f, "No image URLs found in '{}'", path.display())
            }
            Error::OutputDir { path, source } => {
                write!(
                    f,
                    "Could not create output directory '{}': {}",
                    path.display(),
                    source
                )
            }
            Error::InvalidUrl(msg) => {
                write!(f, "Invalid URL: {}", msg)
            }
            Error::HttpStatus { url, status } => {
                write!(f, "HTTP status {} for {}", status, url)
            }
            Error::HttpError(msg) => {
                write!(f, "HTTP error: {}", msg)
            }
            Error::NetworkError(msg) => {
                write!(f, "Network error: {}", msg)
            }
            Error::IoError(err) => {
                write!(f, "I/O error: {}", err)
            }
            Error::FilenameCollision {
                filename,
                claimed_by,
            } => {
                write!(
                    f,
                    "Filename '{}' already claimed by {}",
                    filename, claimed_by
                )
            }
            Error::InvalidInput(msg) => {
                write!(f, "Invalid input: {}", msg)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            Error::CatalogRead { source, .. } | Error::OutputDir { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Error::NetworkError(err.to_string())
        } else {
            Error::HttpError(err.to_string())
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}

/// Convenience result type for catalog-dl operations
pub type Result<T> = std::result::Result<T, Error>;
