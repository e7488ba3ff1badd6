//! CLI `doctor` command: check the catalog, model files and API key.

use anyhow::Result;

use dishlens::catalog::Catalog;
use dishlens::config::DishlensConfig;
use dishlens::embedding::{clip, vision, EMBEDDING_DIM};

/// Print a setup report. Problems are reported, not returned as errors.
pub fn doctor(config: &DishlensConfig) -> Result<()> {
    println!("Dishlens Health Report");
    println!("======================");
    println!();

    let catalog_path = config.resolved_catalog_path();
    println!("Catalog:           {}", catalog_path.display());
    match Catalog::load(&catalog_path) {
        Ok(catalog) => {
            println!("  Entries:         {}", catalog.len());
            match catalog.dimension() {
                Some(dim) if dim == EMBEDDING_DIM => {
                    println!("  Dimension:       {dim} (matches model)");
                }
                Some(dim) => {
                    println!("  Dimension:       {dim}");
                    println!(
                        "  WARNING: model produces {EMBEDDING_DIM} dimensions; every score will be 0."
                    );
                }
                None => println!("  Dimension:       (empty catalog)"),
            }
        }
        Err(e) => println!("  ERROR: {e:#}"),
    }
    println!();

    let (model_path, tokenizer_path) = clip::model_paths(&config.embedding);
    println!("Embedding model:   {} ({})", config.embedding.model, config.embedding.provider);
    println!("  Model file:      {}", presence(&model_path));
    println!("  Tokenizer:       {}", presence(&tokenizer_path));
    if !model_path.exists() || !tokenizer_path.exists() {
        println!("  Run `dishlens model download` to fetch them.");
    }
    println!(
        "  Vision model:    {} (only for `catalog build`)",
        presence(&vision::vision_model_path(&config.embedding))
    );
    println!();

    println!("Vision service:    {} ({})", config.vision.api_base, config.vision.model);
    println!(
        "  API key:         {}",
        if config.vision.api_key.is_some() {
            "set"
        } else {
            "missing (set DISHLENS_API_KEY or OPENAI_API_KEY)"
        }
    );

    Ok(())
}

fn presence(path: &std::path::Path) -> String {
    if path.exists() {
        format!("OK ({})", path.display())
    } else {
        format!("missing ({})", path.display())
    }
}
