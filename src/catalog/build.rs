//! Building a catalog file from reference photos.
//!
//! Two inputs are accepted: a directory laid out as `<cuisine>/<dish>.jpg`,
//! or a manifest JSON array of `{filename, cuisine, dish, url}` records as
//! written by an image scraper. Either way each photo goes through an
//! [`ImageEmbedder`] and becomes one record of the JSON array that
//! [`Catalog::load`](super::Catalog::load) reads back.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::embedding::ImageEmbedder;

/// File extensions picked up in directory mode (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "webp"];

/// Cuisine recorded for images sitting directly in the root directory.
pub const UNKNOWN_CUISINE: &str = "unknown";

/// One record of the catalog file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    pub cuisine: String,
    pub dish: String,
    pub url: String,
    pub embedding: Vec<f32>,
    pub embedding_dim: usize,
}

/// A photo to embed and the metadata its record will carry.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceImage {
    pub path: PathBuf,
    pub relative_path: Option<String>,
    pub cuisine: String,
    pub dish: String,
    pub url: String,
}

/// Manifest record as written by the scraper.
#[derive(Debug, Deserialize)]
struct ManifestRecord {
    filename: PathBuf,
    cuisine: String,
    dish: String,
    #[serde(default)]
    url: String,
}

/// Outcome of a build. Images that could not be decoded or embedded are
/// listed in `skipped` rather than failing the whole build.
#[derive(Debug, Default)]
pub struct BuildSummary {
    pub records: Vec<CatalogRecord>,
    pub skipped: Vec<(PathBuf, String)>,
}

/// Source URLs keyed by absolute image path.
#[derive(Debug, Default)]
pub struct UrlLookup(HashMap<PathBuf, String>);

impl UrlLookup {
    /// Read `filename`/`url` pairs from a scraper manifest. Relative filenames
    /// resolve against the working directory.
    pub fn from_manifest(path: &Path) -> Result<Self> {
        let records = read_manifest(path)?;
        Ok(Self(
            records
                .into_iter()
                .map(|r| (absolute(&r.filename), r.url))
                .collect(),
        ))
    }

    pub fn get(&self, image: &Path) -> Option<&str> {
        self.0.get(&absolute(image)).map(String::as_str)
    }
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn read_manifest(path: &Path) -> Result<Vec<ManifestRecord>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse manifest {}", path.display()))
}

/// Dish name from a file name: the stem with `_` and `-` turned into spaces.
pub fn dish_from_file_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
        .unwrap_or_default()
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Every image under `root`, in a stable order, with the cuisine taken from
/// the first directory below `root`.
pub fn scan_directory(root: &Path, urls: &UrlLookup) -> Result<Vec<SourceImage>> {
    anyhow::ensure!(root.is_dir(), "{} is not a directory", root.display());

    let mut images = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to scan {}", root.display()))?;
        if !entry.file_type().is_file() || !has_image_extension(entry.path()) {
            continue;
        }
        let path = entry.into_path();
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let components: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let cuisine = match components.as_slice() {
            [first, _, ..] => first.clone(),
            _ => UNKNOWN_CUISINE.to_string(),
        };
        images.push(SourceImage {
            relative_path: Some(components.join("/")),
            cuisine,
            dish: dish_from_file_name(&path),
            url: urls.get(&path).unwrap_or_default().to_string(),
            path,
        });
    }
    Ok(images)
}

/// Images listed in a scraper manifest. Entries whose file is missing are
/// logged and left out.
pub fn read_manifest_images(manifest: &Path) -> Result<Vec<SourceImage>> {
    let base = manifest.parent().unwrap_or(Path::new("."));
    let mut images = Vec::new();
    for record in read_manifest(manifest)? {
        let path = if record.filename.exists() {
            record.filename
        } else {
            base.join(&record.filename)
        };
        if !path.exists() {
            tracing::warn!(file = %path.display(), "image file not found, skipping");
            continue;
        }
        images.push(SourceImage {
            path,
            relative_path: None,
            cuisine: record.cuisine,
            dish: record.dish,
            url: record.url,
        });
    }
    Ok(images)
}

/// Embed every source image. `on_image` is called once per image, whether or
/// not it could be embedded.
pub fn build_catalog(
    sources: &[SourceImage],
    embedder: &dyn ImageEmbedder,
    mut on_image: impl FnMut(&Path),
) -> BuildSummary {
    let mut summary = BuildSummary::default();
    for source in sources {
        match embed_file(embedder, &source.path) {
            Ok(embedding) => summary.records.push(CatalogRecord {
                relative_path: source.relative_path.clone(),
                cuisine: source.cuisine.clone(),
                dish: source.dish.clone(),
                url: source.url.clone(),
                embedding_dim: embedding.len(),
                embedding,
            }),
            Err(e) => {
                tracing::warn!(file = %source.path.display(), error = %format!("{e:#}"), "skipping image");
                summary.skipped.push((source.path.clone(), format!("{e:#}")));
            }
        }
        on_image(&source.path);
    }
    summary
}

fn embed_file(embedder: &dyn ImageEmbedder, path: &Path) -> Result<Vec<f32>> {
    let image = image::open(path).context("failed to decode image")?;
    embedder.embed_image(&image)
}

/// Write records as a pretty-printed JSON array, replacing `path` atomically.
pub fn write_catalog(records: &[CatalogRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(records).context("failed to serialize catalog")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move catalog into {}", path.display()))?;
    tracing::info!(records = records.len(), path = %path.display(), "catalog written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"not really an image").unwrap();
    }

    #[test]
    fn test_dish_from_file_name() {
        assert_eq!(dish_from_file_name(Path::new("a/beef_bourguignon-2.jpg")), "beef bourguignon 2");
        assert_eq!(dish_from_file_name(Path::new("pho.png")), "pho");
    }

    #[test]
    fn test_scan_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("french/onion_soup.jpg"));
        touch(&dir.path().join("french/bistro/steak-frites.PNG"));
        touch(&dir.path().join("loose_photo.webp"));
        touch(&dir.path().join("french/notes.txt"));

        let images = scan_directory(dir.path(), &UrlLookup::default()).unwrap();
        let layout: Vec<(Option<&str>, &str, &str)> = images
            .iter()
            .map(|i| (i.relative_path.as_deref(), i.cuisine.as_str(), i.dish.as_str()))
            .collect();
        assert_eq!(
            layout,
            vec![
                (Some("french/bistro/steak-frites.PNG"), "french", "steak frites"),
                (Some("french/onion_soup.jpg"), "french", "onion soup"),
                (Some("loose_photo.webp"), UNKNOWN_CUISINE, "loose photo"),
            ]
        );
        assert!(images.iter().all(|i| i.url.is_empty()));
    }

    #[test]
    fn test_scan_directory_uses_manifest_urls() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("thai/pad_thai.jpg");
        touch(&image);
        let manifest = dir.path().join("scraping_progress.json");
        let records = serde_json::json!([{
            "cuisine": "thai",
            "dish": "pad thai",
            "filename": image,
            "url": "https://img.example/pad_thai.jpg"
        }]);
        std::fs::write(&manifest, records.to_string()).unwrap();

        let urls = UrlLookup::from_manifest(&manifest).unwrap();
        let images = scan_directory(dir.path(), &urls).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].url, "https://img.example/pad_thai.jpg");
    }

    #[test]
    fn test_scan_rejects_non_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("menu.jpg");
        touch(&file);
        assert!(scan_directory(&file, &UrlLookup::default()).is_err());
    }

    #[test]
    fn test_manifest_skips_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("images/ramen_1.jpg"));
        let manifest = dir.path().join("filtered_progress.json");
        std::fs::write(
            &manifest,
            r#"[
                {"cuisine": "japanese", "dish": "ramen", "filename": "images/ramen_1.jpg", "url": "u1"},
                {"cuisine": "japanese", "dish": "gyoza", "filename": "images/gyoza_1.jpg", "url": "u2"}
            ]"#,
        )
        .unwrap();

        let images = read_manifest_images(&manifest).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].dish, "ramen");
        assert_eq!(images[0].url, "u1");
        assert_eq!(images[0].relative_path, None);
    }
}
