use anyhow::{Context, Result};
use std::sync::Arc;

use dishlens::catalog::Catalog;
use dishlens::config::DishlensConfig;
use dishlens::embedding::TextEmbedder;
use dishlens::ranking::top_k;

/// Rank the catalog against one dish name from the terminal.
pub async fn search(config: &DishlensConfig, query: &str) -> Result<()> {
    let catalog = Catalog::load(config.resolved_catalog_path())?;
    let embedder = Arc::new(TextEmbedder::from_config(config.embedding.clone()));

    // Embed the query
    let query_text = query.to_string();
    let query_embedding = tokio::task::spawn_blocking(move || embedder.embed(&query_text))
        .await?
        .context("failed to embed query")?;

    let matches = top_k(&query_embedding, &catalog, config.retrieval.top_k);
    if matches.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    for (i, m) in matches.iter().enumerate() {
        println!(
            "  {}. {} [{}] (score: {:.4})",
            i + 1,
            m.entry.label,
            m.entry.id,
            m.score
        );
        println!("     {}", m.entry.image_locator);
    }

    Ok(())
}
