//! Catalog loading and image URL extraction
//!
//! A catalog is an exported JSON document holding product records, either as a
//! bare array or wrapped in an object under `products` or `users`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde_json::Value;

use crate::core::error::{suggest_wrapper_key, Error, Result};

/// Top-level shape a catalog document was recognized as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogShape {
    /// Document is itself an array of products
    Array,
    /// Object wrapping the products under `products`
    Products,
    /// Object wrapping the products under `users`
    Users,
}

impl CatalogShape {
    /// Human-readable description used in log lines
    pub fn describe(&self) -> &'static str {
        match self {
            CatalogShape::Array => "top-level array",
            CatalogShape::Products => "object with 'products'",
            CatalogShape::Users => "object with 'users'",
        }
    }
}

/// Loaded catalog: the selected shape and its product records
#[derive(Debug, Clone)]
pub struct Catalog {
    pub path: PathBuf,
    pub shape: CatalogShape,
    pub products: Vec<Value>,
}

impl Catalog {
    /// Collect the unique image URLs of every product in this catalog
    pub fn image_urls(&self) -> BTreeSet<String> {
        extract_image_urls(&self.products)
    }
}

/// Read and parse a catalog file
pub fn load_catalog(path: impl AsRef<Path>) -> Result<Catalog> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::CatalogNotFound(path.to_path_buf()),
        _ => Error::CatalogRead {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let catalog = parse_catalog(path, &content)?;
    info!(
        "Loaded {} product record(s) from '{}' ({})",
        catalog.products.len(),
        path.display(),
        catalog.shape.describe()
    );
    Ok(catalog)
}

/// Parse catalog content that was read from `path`
pub fn parse_catalog(path: &Path, content: &str) -> Result<Catalog> {
    let document: Value = serde_json::from_str(content).map_err(|e| Error::CatalogParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let (shape, products) = select_products(path, document)?;
    Ok(Catalog {
        path: path.to_path_buf(),
        shape,
        products,
    })
}

/// Pick the product list out of a parsed document
///
/// Priority: array, then `products`, then `users`.
fn select_products(path: &Path, document: Value) -> Result<(CatalogShape, Vec<Value>)> {
    let unrecognized = |detail: String, hint: Option<&'static str>| Error::UnrecognizedShape {
        path: path.to_path_buf(),
        detail,
        hint,
    };

    match document {
        Value::Array(products) => Ok((CatalogShape::Array, products)),
        Value::Object(mut map) => {
            let wrapped = [(CatalogShape::Products, "products"), (CatalogShape::Users, "users")]
                .into_iter()
                .find_map(|(shape, key)| map.remove(key).map(|value| (shape, key, value)));

            match wrapped {
                Some((shape, _, Value::Array(products))) => Ok((shape, products)),
                Some((_, key, other)) => Err(unrecognized(
                    format!("'{key}' is {}, not an array", json_type_name(&other)),
                    None,
                )),
                None => {
                    let hint = suggest_wrapper_key(map.keys().map(String::as_str));
                    Err(unrecognized(
                        "object has no 'products' or 'users' key".to_string(),
                        hint,
                    ))
                }
            }
        }
        other => Err(unrecognized(
            format!("document is {}", json_type_name(&other)),
            None,
        )),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Collect unique image URLs from product records
///
/// Reads `thumbnail` when it is a string and every string element of `images`
/// when it is an array. Records that are not objects, missing fields, wrongly
/// typed fields and empty strings contribute nothing.
pub fn extract_image_urls(products: &[Value]) -> BTreeSet<String> {
    let mut urls = BTreeSet::new();

    for (idx, product) in products.iter().enumerate() {
        let Some(record) = product.as_object() else {
            debug!("Skipping product #{idx}: not an object");
            continue;
        };

        if let Some(Value::String(thumbnail)) = record.get("thumbnail") {
            if !thumbnail.is_empty() {
                urls.insert(thumbnail.clone());
            }
        }

        if let Some(Value::Array(images)) = record.get("images") {
            urls.extend(
                images
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|url| !url.is_empty())
                    .map(str::to_string),
            );
        }
    }

    urls
}
