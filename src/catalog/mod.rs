//! Reference dish catalog.
//!
//! The catalog is the JSON array written by the offline image-embedding
//! generator: one record per reference photo with its label, image locator and
//! CLIP image embedding. It is loaded once and shared read-only behind an
//! `Arc` for every ranking call. [`build`] produces that file from a folder
//! of reference photos.

pub mod build;

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One reference dish image with its precomputed embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    /// Stable identifier. Taken from the file when present, else the record's position.
    pub id: String,
    /// Display name of the dish.
    pub label: String,
    /// URL or path of the reference image.
    pub image_locator: String,
    /// Cuisine bucket the image was scraped under, if recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cuisine: Option<String>,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

/// Raw record shape as written by the generator. Field aliases cover both the
/// generator's names (`dish`, `url`) and ours.
#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(alias = "dish")]
    label: String,
    #[serde(default, alias = "url")]
    image_locator: String,
    #[serde(default)]
    relative_path: Option<String>,
    #[serde(default)]
    cuisine: Option<String>,
    embedding: Vec<f32>,
    #[serde(default)]
    embedding_dim: Option<usize>,
}

/// Reasons a catalog is rejected at load time.
#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("catalog entry {index} ({label}) has an empty embedding")]
    EmptyEmbedding { index: usize, label: String },
    #[error("catalog entry {index} ({label}) has a non-finite embedding component")]
    NonFinite { index: usize, label: String },
    #[error("catalog entry {index} ({label}) declares embedding_dim {declared} but has {actual} components")]
    DeclaredDimension {
        index: usize,
        label: String,
        declared: usize,
        actual: usize,
    },
    #[error("catalog entry {index} ({label}) has dimension {actual}, expected {expected}")]
    MixedDimensions {
        index: usize,
        label: String,
        expected: usize,
        actual: usize,
    },
}

/// Immutable, ordered set of reference entries sharing one embedding dimension.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    dimension: Option<usize>,
}

impl Catalog {
    /// Build a catalog from entries, verifying that every embedding is
    /// non-empty, finite, and of the same dimension.
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Result<Self, CatalogError> {
        let mut dimension = None;
        for (index, entry) in entries.iter().enumerate() {
            let actual = entry.embedding.len();
            if actual == 0 {
                return Err(CatalogError::EmptyEmbedding {
                    index,
                    label: entry.label.clone(),
                });
            }
            if entry.embedding.iter().any(|x| !x.is_finite()) {
                return Err(CatalogError::NonFinite {
                    index,
                    label: entry.label.clone(),
                });
            }
            match dimension {
                None => dimension = Some(actual),
                Some(expected) if expected != actual => {
                    return Err(CatalogError::MixedDimensions {
                        index,
                        label: entry.label.clone(),
                        expected,
                        actual,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(Self { entries, dimension })
    }

    /// Decode a catalog from the generator's JSON array.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Vec<RawEntry> =
            serde_json::from_str(json).context("failed to parse catalog JSON")?;

        let mut entries = Vec::with_capacity(raw.len());
        for (index, record) in raw.into_iter().enumerate() {
            if let Some(declared) = record.embedding_dim {
                if declared != record.embedding.len() {
                    return Err(CatalogError::DeclaredDimension {
                        index,
                        label: record.label,
                        declared,
                        actual: record.embedding.len(),
                    }
                    .into());
                }
            }
            entries.push(CatalogEntry {
                id: record_id(record.id, index),
                image_locator: if record.image_locator.is_empty() {
                    record.relative_path.unwrap_or_default()
                } else {
                    record.image_locator
                },
                label: record.label,
                cuisine: record.cuisine,
                embedding: record.embedding,
            });
        }

        Ok(Self::from_entries(entries)?)
    }

    /// Load the catalog file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog at {}", path.display()))?;
        let catalog = Self::from_json(&contents)
            .with_context(|| format!("invalid catalog at {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            entries = catalog.len(),
            dimension = ?catalog.dimension(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shared embedding dimension, or `None` for an empty catalog.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

fn record_id(id: Option<serde_json::Value>, index: usize) -> String {
    match id {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Null) | None => index.to_string(),
        Some(other) => other.to_string(),
    }
}
