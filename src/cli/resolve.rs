//! CLI `resolve` command: run the full menu workflow on one photo.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use dishlens::catalog::Catalog;
use dishlens::config::DishlensConfig;
use dishlens::embedding::TextEmbedder;
use dishlens::pipeline::{
    Cancellation, DishOutcome, DishResolutionPipeline, PipelineOptions, RunReport,
};
use dishlens::services::OpenAiServices;
use dishlens::stages::MenuImage;

/// Resolve every dish on the menu at `image_path` and print the gallery.
pub async fn resolve(config: &DishlensConfig, image_path: &Path, json: bool) -> Result<()> {
    // Input errors come first, before the catalog or any network setup.
    let image = MenuImage::from_path(image_path, config.input.max_image_bytes)?;

    let catalog = Arc::new(Catalog::load(config.resolved_catalog_path())?);
    let services =
        Arc::new(OpenAiServices::new(config.vision.clone()).context("vision service unavailable")?);
    let embedder = Arc::new(TextEmbedder::from_config(config.embedding.clone()));

    let pipeline =
        DishResolutionPipeline::new(services, embedder, catalog, PipelineOptions::from(config));

    let cancel = Cancellation::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current dish");
            on_ctrl_c.cancel();
        }
    });

    let report = pipeline.run(Some(&image), &cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    let dishes = report.dishes();
    let failed = dishes.iter().filter(|d| d.as_resolved().is_none()).count();
    println!(
        "Resolved {} of {} dish(es){}\n",
        dishes.len() - failed,
        dishes.len(),
        if report.resolution.cancelled { " (cancelled)" } else { "" }
    );

    for outcome in dishes {
        let mention = outcome.mention();
        println!("{} ({})", mention.translated, mention.original);
        match outcome {
            DishOutcome::Resolved(result) => {
                println!("  Key ingredients: {}", result.ingredient_summary);
                for m in &result.top_matches {
                    println!(
                        "  - {} ({:.1}%)  {}",
                        m.entry.label,
                        m.score * 100.0,
                        m.entry.image_locator
                    );
                }
            }
            DishOutcome::Failed { failure, .. } => {
                println!("  Unresolved: {failure}");
            }
        }
        println!();
    }
}
