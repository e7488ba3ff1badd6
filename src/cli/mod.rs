pub mod catalog;
pub mod doctor;
pub mod resolve;
pub mod search;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tokio::io::AsyncWriteExt;

use dishlens::embedding::{clip, vision};

// Quantized export of the CLIP ViT-B/32 text tower with projection head.
const MODEL_URL: &str =
    "https://huggingface.co/Xenova/clip-vit-base-patch32/resolve/main/onnx/text_model_quantized.onnx";
const TOKENIZER_URL: &str =
    "https://huggingface.co/Xenova/clip-vit-base-patch32/resolve/main/tokenizer.json";
// Image tower of the same checkpoint, only needed for `catalog build`.
const VISION_MODEL_URL: &str =
    "https://huggingface.co/Xenova/clip-vit-base-patch32/resolve/main/onnx/vision_model_quantized.onnx";

/// Download the CLIP text model and tokenizer to the cache directory, plus
/// the vision model when `with_vision` is set.
pub async fn model_download(
    config: &dishlens::config::EmbeddingConfig,
    with_vision: bool,
) -> Result<()> {
    let (model_path, tokenizer_path) = clip::model_paths(config);
    if let Some(cache_dir) = model_path.parent() {
        std::fs::create_dir_all(cache_dir)
            .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;
    }

    if model_path.exists() {
        println!("Model already exists at {}", model_path.display());
    } else {
        println!("Downloading {} (~65MB)...", clip::MODEL_FILE);
        download_file(MODEL_URL, &model_path).await?;
        println!("Model saved to {}", model_path.display());
    }

    if tokenizer_path.exists() {
        println!("Tokenizer already exists at {}", tokenizer_path.display());
    } else {
        println!("Downloading tokenizer.json...");
        download_file(TOKENIZER_URL, &tokenizer_path).await?;
        println!("Tokenizer saved to {}", tokenizer_path.display());
    }

    if with_vision {
        let vision_path = vision::vision_model_path(config);
        if vision_path.exists() {
            println!("Vision model already exists at {}", vision_path.display());
        } else {
            println!("Downloading {} (~90MB)...", vision::VISION_MODEL_FILE);
            download_file(VISION_MODEL_URL, &vision_path).await?;
            println!("Vision model saved to {}", vision_path.display());
        }
    }

    println!("Model download complete. Ready for use.");
    Ok(())
}

/// Download a file, streaming it to `<dest>.tmp` and renaming into place once complete.
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let mut response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download of {url} failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => ProgressBar::new(size).with_style(
            ProgressStyle::default_bar()
                .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                .context("invalid progress template")?
                .progress_chars("##-"),
        ),
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    while let Some(chunk) = response.chunk().await.context("error reading response")? {
        file.write_all(&chunk)
            .await
            .context("error writing to file")?;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}
