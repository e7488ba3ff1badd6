//! CLIP text-tower embedding provider.
//!
//! Implements [`EmbeddingProvider`] with the text half of CLIP ViT-B/32 via
//! `ort`. The model's projection head already maps into the shared text-image
//! space, so the only post-processing is L2 normalization, matching the
//! normalized image embeddings stored in the catalog.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{EmbeddingProvider, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;
use crate::vector::l2_normalize;

/// CLIP's text context length.
const MAX_SEQ_LEN: usize = 77;

pub const MODEL_FILE: &str = "text_model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Paths of the model and tokenizer inside the configured cache dir.
pub fn model_paths(config: &EmbeddingConfig) -> (PathBuf, PathBuf) {
    let cache_dir = crate::config::expand_tilde(&config.cache_dir);
    (cache_dir.join(MODEL_FILE), cache_dir.join(TOKENIZER_FILE))
}

/// ONNX CLIP text encoder.
pub struct ClipTextProvider {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

// Safety: Tokenizer is Send+Sync. Session is behind a Mutex.
// The Mutex guarantees exclusive access during run().
unsafe impl Send for ClipTextProvider {}
unsafe impl Sync for ClipTextProvider {}

impl ClipTextProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_path, tokenizer_path) = model_paths(config);
        Self::from_files(&model_path, &tokenizer_path)
    }

    pub fn from_files(model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        anyhow::ensure!(
            model_path.exists(),
            "ONNX model not found at {}. Run `dishlens model download` first.",
            model_path.display()
        );
        anyhow::ensure!(
            tokenizer_path.exists(),
            "Tokenizer not found at {}. Run `dishlens model download` first.",
            tokenizer_path.display()
        );

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .context("failed to load ONNX model")?;

        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;

        // CLIP pools at the end-of-text token, which has the highest id in the
        // vocabulary, so right padding with a lower id is harmless.
        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        tracing::info!(tokenizer = %tokenizer_path.display(), "tokenizer loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }
}

impl EmbeddingProvider for ClipTextProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .context("model returned no embedding")
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let batch_size = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        let mut input_ids = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask = Vec::with_capacity(batch_size * seq_len);
        for encoding in &encodings {
            input_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        let shape = vec![batch_size as i64, seq_len as i64];
        let input_ids_tensor = Tensor::from_array((shape.clone(), input_ids.into_boxed_slice()))?;
        let attention_mask_tensor =
            Tensor::from_array((shape, attention_mask.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;

        let outputs = session.run(ort::inputs! {
            "input_ids" => input_ids_tensor,
            "attention_mask" => attention_mask_tensor,
        })?;

        // Projected embeddings, shape [batch, 512]
        let text_embeds = outputs
            .get("text_embeds")
            .context("model has no text_embeds output; is this a CLIPTextModelWithProjection export?")?;

        let (shape, data) = text_embeds
            .try_extract_tensor::<f32>()
            .context("failed to extract text_embeds tensor")?;

        let dims: &[i64] = &shape;
        anyhow::ensure!(
            dims.len() == 2 && dims[0] == batch_size as i64 && dims[1] == EMBEDDING_DIM as i64,
            "unexpected text_embeds shape: {dims:?}, expected [{batch_size}, {EMBEDDING_DIM}]"
        );
        anyhow::ensure!(
            data.iter().all(|x| x.is_finite()),
            "text embedding contains non-finite values"
        );

        Ok(data.chunks(EMBEDDING_DIM).map(l2_normalize).collect())
    }
}
