//! Core library modules for catalog-dl
//!
//! This module contains the internal implementation details of the catalog-dl library.

pub mod error;
pub mod catalog;
pub mod filename;
pub mod fetcher;
pub mod batch;

// Re-export main types for internal use
pub use catalog::{Catalog, CatalogShape};
pub use fetcher::Fetcher;
