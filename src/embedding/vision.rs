//! CLIP vision-tower embedding provider.
//!
//! Embeds reference photos for the catalog. Preprocessing follows the CLIP
//! ViT-B/32 image processor: shortest edge resized to 224 (bicubic), center
//! crop to 224x224, scale to `[0, 1]`, then per-channel mean/std
//! normalization, laid out NCHW.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::DynamicImage;
use ort::session::Session;
use ort::value::Tensor;

use super::{ImageEmbedder, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;
use crate::vector::l2_normalize;

pub const VISION_MODEL_FILE: &str = "vision_model.onnx";

/// Side of the square model input.
pub const IMAGE_SIZE: u32 = 224;

const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Path of the vision model inside the configured cache dir.
pub fn vision_model_path(config: &EmbeddingConfig) -> PathBuf {
    crate::config::expand_tilde(&config.cache_dir).join(VISION_MODEL_FILE)
}

/// Resize, crop and normalize an image into a `[3, 224, 224]` NCHW buffer.
pub fn preprocess(image: &DynamicImage) -> Vec<f32> {
    let (w, h) = (image.width().max(1), image.height().max(1));
    let scale = IMAGE_SIZE as f32 / w.min(h) as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(IMAGE_SIZE);
    let new_h = ((h as f32 * scale).round() as u32).max(IMAGE_SIZE);

    let resized = image.resize_exact(new_w, new_h, FilterType::CatmullRom);
    let x0 = (new_w - IMAGE_SIZE) / 2;
    let y0 = (new_h - IMAGE_SIZE) / 2;
    let rgb = resized.crop_imm(x0, y0, IMAGE_SIZE, IMAGE_SIZE).to_rgb8();

    let plane = (IMAGE_SIZE * IMAGE_SIZE) as usize;
    let mut pixels = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = (y * IMAGE_SIZE + x) as usize;
        for c in 0..3 {
            let value = f32::from(pixel[c]) / 255.0;
            pixels[c * plane + offset] = (value - CLIP_MEAN[c]) / CLIP_STD[c];
        }
    }
    pixels
}

/// ONNX CLIP image encoder.
pub struct ClipImageProvider {
    session: Mutex<Session>,
}

// Safety: Session is behind a Mutex.
// The Mutex guarantees exclusive access during run().
unsafe impl Send for ClipImageProvider {}
unsafe impl Sync for ClipImageProvider {}

impl ClipImageProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Self::from_file(&vision_model_path(config))
    }

    pub fn from_file(model_path: &Path) -> Result<Self> {
        anyhow::ensure!(
            model_path.exists(),
            "ONNX vision model not found at {}. Run `dishlens model download --vision` first.",
            model_path.display()
        );

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .context("failed to load ONNX vision model")?;

        tracing::info!(model = %model_path.display(), "ONNX vision model loaded");

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl ImageEmbedder for ClipImageProvider {
    fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let size = IMAGE_SIZE as i64;
        let shape = vec![1, 3, size, size];
        let pixel_values = Tensor::from_array((shape, preprocess(image).into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;

        let outputs = session.run(ort::inputs! {
            "pixel_values" => pixel_values,
        })?;

        let image_embeds = outputs
            .get("image_embeds")
            .context("model has no image_embeds output; is this a CLIPVisionModelWithProjection export?")?;

        let (shape, data) = image_embeds
            .try_extract_tensor::<f32>()
            .context("failed to extract image_embeds tensor")?;

        let dims: &[i64] = &shape;
        anyhow::ensure!(
            dims == [1, EMBEDDING_DIM as i64],
            "unexpected image_embeds shape: {dims:?}, expected [1, {EMBEDDING_DIM}]"
        );
        anyhow::ensure!(
            data.iter().all(|x| x.is_finite()),
            "image embedding contains non-finite values"
        );

        Ok(l2_normalize(data))
    }
}
