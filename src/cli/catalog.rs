//! CLI `catalog` commands: build the catalog file, and query it by image.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use dishlens::catalog::build::{self, UrlLookup};
use dishlens::catalog::Catalog;
use dishlens::config::DishlensConfig;
use dishlens::embedding::vision::ClipImageProvider;
use dishlens::embedding::ImageEmbedder;
use dishlens::ranking::top_k;

/// Embed reference photos into a catalog file.
///
/// `input` is either a `<cuisine>/<dish>.jpg` directory or a scraper manifest
/// (`.json`). `scraped_json` only applies to directory mode and supplies
/// source URLs.
pub async fn build(
    config: &DishlensConfig,
    input: &Path,
    output: Option<PathBuf>,
    scraped_json: Option<PathBuf>,
) -> Result<()> {
    let output = output.unwrap_or_else(|| config.resolved_catalog_path());

    let sources = if input.is_dir() {
        let urls = match &scraped_json {
            Some(path) => UrlLookup::from_manifest(path)?,
            None => UrlLookup::default(),
        };
        build::scan_directory(input, &urls)?
    } else {
        build::read_manifest_images(input)?
    };
    anyhow::ensure!(!sources.is_empty(), "no images found in {}", input.display());
    println!("Found {} images in {}", sources.len(), input.display());

    let embedding = config.embedding.clone();
    let provider = tokio::task::spawn_blocking(move || ClipImageProvider::new(&embedding))
        .await??;

    let pb = ProgressBar::new(sources.len() as u64).with_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} ({eta})")
            .context("invalid progress template")?
            .progress_chars("##-"),
    );
    let progress = pb.clone();
    let summary = tokio::task::spawn_blocking(move || {
        build::build_catalog(&sources, &provider, |_| progress.inc(1))
    })
    .await?;
    pb.finish_and_clear();

    for (path, reason) in &summary.skipped {
        println!("  skipped {}: {reason}", path.display());
    }
    anyhow::ensure!(!summary.records.is_empty(), "no image could be embedded");

    build::write_catalog(&summary.records, &output)?;

    // Read back with the loader `resolve` uses
    let catalog = Catalog::load(&output)?;
    println!(
        "Catalog written to {} ({} entries, {} skipped)",
        output.display(),
        catalog.len(),
        summary.skipped.len()
    );
    Ok(())
}

/// Rank the catalog against a photo instead of a dish name.
pub async fn similar(config: &DishlensConfig, photo: &Path) -> Result<()> {
    let catalog = Catalog::load(config.resolved_catalog_path())?;
    let embedding = config.embedding.clone();
    let photo = photo.to_path_buf();

    let provider =
        tokio::task::spawn_blocking(move || ClipImageProvider::new(&embedding)).await??;
    let query = tokio::task::spawn_blocking(move || -> Result<Vec<f32>> {
        let decoded = image::open(&photo)
            .with_context(|| format!("failed to decode {}", photo.display()))?;
        provider.embed_image(&decoded)
    })
    .await??;

    let matches = top_k(&query, &catalog, config.retrieval.top_k);
    if matches.is_empty() {
        println!("No results found.");
        return Ok(());
    }
    for (i, m) in matches.iter().enumerate() {
        println!(
            "  {}. {} [{}] (score: {:.4})",
            i + 1,
            m.entry.label,
            m.entry.cuisine.as_deref().unwrap_or("-"),
            m.score
        );
        println!("     {}", m.entry.image_locator);
    }
    Ok(())
}
