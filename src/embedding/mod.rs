//! Text-to-vector embedding.
//!
//! Provides the [`EmbeddingProvider`] trait, a CLIP text-tower implementation
//! in [`clip`], and [`TextEmbedder`], which loads a provider on first use and
//! shares it across every later call. The image half of CLIP lives in
//! [`vision`] and is only needed to build a catalog.

pub mod clip;
pub mod vision;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use thiserror::Error;

/// Number of dimensions in the embedding vectors (CLIP ViT-B/32 projection).
pub const EMBEDDING_DIM: usize = 512;

/// Trait for embedding text into vectors.
///
/// Implementations must be deterministic: the same text always yields the same
/// vector. All methods are synchronous; callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Trait for embedding decoded images into the same space as
/// [`EmbeddingProvider`]. Synchronous, like the text side.
pub trait ImageEmbedder: Send + Sync {
    fn embed_image(&self, image: &image::DynamicImage) -> Result<Vec<f32>>;
}

/// Create an embedding provider from config.
///
/// Currently only `"clip"` is supported (ONNX Runtime + CLIP ViT-B/32 text tower).
/// Returns an error if model files are not found. Run `dishlens model download` first.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "clip" => {
            let provider = clip::ClipTextProvider::new(config)?;
            Ok(Box::new(provider))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: clip"),
    }
}

/// Failure to produce an embedding.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    /// The model could not be loaded. Sticky: later calls report the same error.
    #[error("model load failed: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

type Loader = Box<dyn Fn() -> Result<Box<dyn EmbeddingProvider>> + Send + Sync>;

enum Slot {
    Unloaded,
    Ready(Arc<dyn EmbeddingProvider>),
    Failed(String),
}

/// Lazily-loaded, shared embedding model.
///
/// The slot lock is held for the duration of the load, so concurrent first
/// callers block until the one in-flight load finishes and then reuse its
/// result. Inference runs outside the slot lock.
pub struct TextEmbedder {
    loader: Loader,
    slot: Mutex<Slot>,
}

impl TextEmbedder {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn EmbeddingProvider>> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            slot: Mutex::new(Slot::Unloaded),
        }
    }

    /// Embedder that builds its provider from config on first use.
    pub fn from_config(config: crate::config::EmbeddingConfig) -> Self {
        Self::new(move || create_provider(&config))
    }

    /// Wrap an already-constructed provider.
    pub fn preloaded(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            loader: Box::new(no_loader),
            slot: Mutex::new(Slot::Ready(provider)),
        }
    }

    /// Return the shared provider, loading it if this is the first call.
    pub fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>, ModelError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|e| ModelError::Load(format!("embedder lock poisoned: {e}")))?;

        match &*slot {
            Slot::Ready(provider) => return Ok(Arc::clone(provider)),
            Slot::Failed(message) => return Err(ModelError::Load(message.clone())),
            Slot::Unloaded => {}
        }

        tracing::info!("loading embedding model");
        match (self.loader)() {
            Ok(provider) => {
                let provider: Arc<dyn EmbeddingProvider> = Arc::from(provider);
                tracing::info!(dimensions = provider.dimensions(), "embedding model ready");
                *slot = Slot::Ready(Arc::clone(&provider));
                Ok(provider)
            }
            Err(e) => {
                let message = format!("{e:#}");
                tracing::error!(error = %message, "embedding model failed to load");
                *slot = Slot::Failed(message.clone());
                Err(ModelError::Load(message))
            }
        }
    }

    /// Embed `text`, loading the model first if needed.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let provider = self.provider()?;
        provider
            .embed(text)
            .map_err(|e| ModelError::Inference(format!("{e:#}")))
    }

    /// Whether a provider has been loaded successfully.
    pub fn is_loaded(&self) -> bool {
        matches!(self.slot.lock().as_deref(), Ok(Slot::Ready(_)))
    }
}

fn no_loader() -> Result<Box<dyn EmbeddingProvider>> {
    anyhow::bail!("preloaded embedder has no loader")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Constant(Vec<f32>);

    impl EmbeddingProvider for Constant {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }

        fn dimensions(&self) -> usize {
            self.0.len()
        }
    }

    fn counting_embedder(loads: Arc<AtomicUsize>) -> TextEmbedder {
        TextEmbedder::new(move || {
            loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Ok(Box::new(Constant(vec![1.0, 0.0])) as Box<dyn EmbeddingProvider>)
        })
    }

    #[test]
    fn test_loads_once_and_caches() {
        let loads = Arc::new(AtomicUsize::new(0));
        let embedder = counting_embedder(Arc::clone(&loads));
        assert!(!embedder.is_loaded());

        assert_eq!(embedder.embed("salad").unwrap(), vec![1.0, 0.0]);
        assert_eq!(embedder.embed("soup").unwrap(), vec![1.0, 0.0]);
        assert!(embedder.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_first_use_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let embedder = Arc::new(counting_embedder(Arc::clone(&loads)));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let embedder = Arc::clone(&embedder);
                std::thread::spawn(move || embedder.embed(&format!("dish {i}")))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_failure_is_sticky() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let embedder = TextEmbedder::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("model.onnx not found")
        });

        let first = embedder.embed("salad").unwrap_err();
        let second = embedder.embed("soup").unwrap_err();
        assert!(matches!(first, ModelError::Load(ref m) if m.contains("model.onnx not found")));
        assert_eq!(first, second);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inference_error_is_distinct_from_load_error() {
        struct Broken;
        impl EmbeddingProvider for Broken {
            fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                anyhow::bail!("session run failed")
            }
        }

        let embedder = TextEmbedder::preloaded(Arc::new(Broken));
        assert!(embedder.is_loaded());
        assert!(matches!(
            embedder.embed("salad"),
            Err(ModelError::Inference(ref m)) if m.contains("session run failed")
        ));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = crate::config::EmbeddingConfig {
            provider: "word2vec".into(),
            ..Default::default()
        };
        let err = create_provider(&config).err().expect("unknown provider");
        assert!(err.to_string().contains("unknown embedding provider"));
    }
}
