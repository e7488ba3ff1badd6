//! Error types for the resolution workflow.
//!
//! Failures come in three severities:
//!
//! - [`ResolveError`] aborts the whole run (bad input, a failed extraction or
//!   translation call, a model that cannot load).
//! - [`DishFailure`] degrades a single dish; the batch carries on.
//! - [`crate::vector::DimensionMismatch`] degrades a single score to `0.0`.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// External or local stage of the workflow, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Translation,
    Embedding,
    Ingredients,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Translation => "translation",
            Self::Embedding => "embedding",
            Self::Ingredients => "ingredients",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a call to the external vision/text service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("no API key configured (set DISHLENS_API_KEY or OPENAI_API_KEY)")]
    MissingApiKey,
}

/// A failure that aborts the run before or instead of dish-level work.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no menu image provided")]
    MissingImage,
    #[error("image is {size} bytes, larger than the {limit}-byte limit")]
    ImageTooLarge { size: u64, limit: u64 },
    #[error("unsupported image type: {0}")]
    UnsupportedImage(String),
    #[error("could not read image: {0}")]
    ImageRead(String),
    #[error("{stage} failed: {source}")]
    ExternalService {
        stage: Stage,
        #[source]
        source: ServiceError,
    },
    #[error("no text could be extracted from the image")]
    NoTextExtracted,
    #[error("no dish names could be identified")]
    NoDishes,
    #[error("embedding model failed to load: {0}")]
    ModelLoad(String),
}

impl ResolveError {
    /// Input errors are rejected before any external call and are never retried.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MissingImage
                | Self::ImageTooLarge { .. }
                | Self::UnsupportedImage(_)
                | Self::ImageRead(_)
        )
    }
}

/// Why a single dish could not be resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DishFailure {
    pub stage: Stage,
    pub message: String,
}

impl fmt::Display for DishFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}
