use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DishlensConfig {
    pub log: LogConfig,
    pub vision: VisionConfig,
    pub embedding: EmbeddingConfig,
    pub catalog: CatalogConfig,
    pub retrieval: RetrievalConfig,
    pub input: InputConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

/// Chat-completions endpoint used for extraction, translation and ingredients.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VisionConfig {
    pub api_base: String,
    pub model: String,
    pub timeout_secs: u64,
    pub extraction_max_tokens: u32,
    pub translation_max_tokens: u32,
    pub ingredient_max_tokens: u32,
    /// Ingredient lookups in flight at once for one run.
    pub max_concurrent_lookups: usize,
    /// Only ever populated from the environment.
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CatalogConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InputConfig {
    pub max_image_bytes: u64,
}

/// Upload ceiling for menu photos.
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".into(),
            model: "gpt-4.1-nano".into(),
            timeout_secs: 60,
            extraction_max_tokens: 500,
            translation_max_tokens: 1000,
            ingredient_max_tokens: 100,
            max_concurrent_lookups: 4,
            api_key: None,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_dishlens_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "clip".into(),
            model: "clip-vit-base-patch32".into(),
            cache_dir,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let path = default_dishlens_dir()
            .join("dish_embeddings.json")
            .to_string_lossy()
            .into_owned();
        Self { path }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: crate::ranking::DEFAULT_TOP_K,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

/// Returns `~/.dishlens/`, or `./.dishlens/` when no home directory is known.
pub fn default_dishlens_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dishlens")
}

/// Returns the default config file path: `~/.dishlens/config.toml`
pub fn default_config_path() -> PathBuf {
    default_dishlens_dir().join("config.toml")
}

impl DishlensConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            DishlensConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (DISHLENS_LOG_LEVEL, DISHLENS_CATALOG,
    /// DISHLENS_MODEL_DIR, DISHLENS_API_KEY / OPENAI_API_KEY).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DISHLENS_LOG_LEVEL") {
            self.log.level = val;
        }
        if let Ok(val) = std::env::var("DISHLENS_CATALOG") {
            self.catalog.path = val;
        }
        if let Ok(val) = std::env::var("DISHLENS_MODEL_DIR") {
            self.embedding.cache_dir = val;
        }
        self.vision.api_key = std::env::var("DISHLENS_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
    }

    /// Resolve the catalog path, expanding `~` if needed.
    pub fn resolved_catalog_path(&self) -> PathBuf {
        expand_tilde(&self.catalog.path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
