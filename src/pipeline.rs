//! Dish resolution pipeline.
//!
//! One run goes image → extracted text → translated mentions → per-dish
//! embedding, ranking and ingredient lookup. Input validation, extraction,
//! translation and the one-time model load are preconditions: any failure
//! there aborts the run with a [`ResolveError`]. After that every dish is
//! resolved independently:
//!
//! - an embedding failure marks only that dish [`DishOutcome::Failed`] and the
//!   loop moves on;
//! - an ingredient lookup failure is masked with [`INGREDIENTS_UNAVAILABLE`];
//! - a dimension mismatch degrades a score to `0.0` inside the ranker.
//!
//! Embedding and ranking run sequentially in mention order. Ingredient
//! lookups don't touch the model, so they are all started up front on a
//! `JoinSet`, throttled by a semaphore, and joined back by dish index.
//! Cancelling a run aborts only the lookups of dishes that were never
//! reached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinSet};
use tracing::Instrument;

use crate::catalog::Catalog;
use crate::embedding::{ModelError, TextEmbedder};
use crate::error::{DishFailure, ResolveError, ServiceError, Stage};
use crate::ranking::{top_k, SimilarityMatch, DEFAULT_TOP_K};
use crate::services::MenuServices;
use crate::stages::{self, DishMention, MenuImage, TranslationSource};

/// Substituted when an ingredient lookup fails.
pub const INGREDIENTS_UNAVAILABLE: &str = "Could not fetch ingredients";

/// A fully resolved dish.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DishResult {
    #[serde(flatten)]
    pub mention: DishMention,
    pub top_matches: Vec<SimilarityMatch>,
    /// Ingredient text, or [`INGREDIENTS_UNAVAILABLE`].
    pub ingredient_summary: String,
}

impl DishResult {
    pub fn ingredients_available(&self) -> bool {
        self.ingredient_summary != INGREDIENTS_UNAVAILABLE
    }
}

/// Per-dish result of a run, in mention order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DishOutcome {
    Resolved(DishResult),
    Failed {
        mention: DishMention,
        failure: DishFailure,
    },
}

impl DishOutcome {
    pub fn mention(&self) -> &DishMention {
        match self {
            Self::Resolved(result) => &result.mention,
            Self::Failed { mention, .. } => mention,
        }
    }

    pub fn as_resolved(&self) -> Option<&DishResult> {
        match self {
            Self::Resolved(result) => Some(result),
            Self::Failed { .. } => None,
        }
    }
}

/// Dishes resolved from a list of mentions.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub dishes: Vec<DishOutcome>,
    /// The run was cancelled; `dishes` holds only those handled before it.
    pub cancelled: bool,
}

/// Everything a full run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub extracted_text: String,
    pub translation_source: TranslationSource,
    #[serde(flatten)]
    pub resolution: Resolution,
}

impl RunReport {
    pub fn dishes(&self) -> &[DishOutcome] {
        &self.resolution.dishes
    }
}

/// Cooperative cancellation flag, checked between dishes.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub top_k: usize,
    pub max_image_bytes: u64,
    /// Ingredient lookups in flight at once. Zero is treated as one.
    pub max_concurrent_lookups: usize,
}

/// Default cap on concurrent ingredient lookups.
pub const DEFAULT_MAX_CONCURRENT_LOOKUPS: usize = 4;

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_image_bytes: crate::config::DEFAULT_MAX_IMAGE_BYTES,
            max_concurrent_lookups: DEFAULT_MAX_CONCURRENT_LOOKUPS,
        }
    }
}

impl From<&crate::config::DishlensConfig> for PipelineOptions {
    fn from(config: &crate::config::DishlensConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            max_image_bytes: config.input.max_image_bytes,
            max_concurrent_lookups: config.vision.max_concurrent_lookups,
        }
    }
}

pub struct DishResolutionPipeline<S> {
    services: Arc<S>,
    embedder: Arc<TextEmbedder>,
    catalog: Arc<Catalog>,
    options: PipelineOptions,
}

impl<S> DishResolutionPipeline<S>
where
    S: MenuServices + 'static,
{
    pub fn new(
        services: Arc<S>,
        embedder: Arc<TextEmbedder>,
        catalog: Arc<Catalog>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            services,
            embedder,
            catalog,
            options,
        }
    }

    /// Run the whole workflow on a menu photo.
    pub async fn run(
        &self,
        image: Option<&MenuImage>,
        cancel: &Cancellation,
    ) -> Result<RunReport, ResolveError> {
        let run_id = uuid::Uuid::now_v7().to_string();
        let span = tracing::info_span!("resolve", run_id = %run_id);
        self.run_inner(run_id, image, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: String,
        image: Option<&MenuImage>,
        cancel: &Cancellation,
    ) -> Result<RunReport, ResolveError> {
        let image = stages::validate_image(image, self.options.max_image_bytes)?;
        tracing::info!(bytes = image.len(), mime = image.mime(), "extracting dish names");

        let extracted_text = stages::extract_text(self.services.as_ref(), image).await?;
        tracing::info!(lines = extracted_text.lines().count(), "text extracted");

        let translation = stages::translate(self.services.as_ref(), &extracted_text).await?;
        if translation.mentions.is_empty() {
            return Err(ResolveError::NoDishes);
        }
        tracing::info!(
            dishes = translation.mentions.len(),
            source = ?translation.source,
            "dish names translated"
        );
        for mention in &translation.mentions {
            tracing::debug!(original = %mention.original, translated = %mention.translated, "dish");
        }

        let resolution = self.resolve_mentions(&translation.mentions, cancel).await?;

        Ok(RunReport {
            run_id,
            extracted_text,
            translation_source: translation.source,
            resolution,
        })
    }

    /// Embed, rank and enrich each mention.
    ///
    /// Fails only if the embedding model cannot be loaded; every other
    /// failure is recorded on the affected dish.
    pub async fn resolve_mentions(
        &self,
        mentions: &[DishMention],
        cancel: &Cancellation,
    ) -> Result<Resolution, ResolveError> {
        self.warm_up().await?;

        let (lookups, handles) = self.spawn_ingredient_lookups(mentions);

        let mut ranked: Vec<(&DishMention, Result<Vec<SimilarityMatch>, DishFailure>)> =
            Vec::with_capacity(mentions.len());
        let mut cancelled = false;

        for (index, mention) in mentions.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(resolved = index, remaining = mentions.len() - index, "run cancelled");
                cancelled = true;
                break;
            }
            tracing::info!(dish = %mention.translated, "finding similar dishes");
            ranked.push((mention, self.rank_mention(mention).await));
        }

        // Dishes already ranked keep their lookups.
        for handle in &handles[ranked.len()..] {
            handle.abort();
        }
        let mut ingredients = collect_ingredients(lookups).await;

        let dishes = ranked
            .into_iter()
            .enumerate()
            .map(|(index, (mention, ranking))| match ranking {
                Ok(top_matches) => DishOutcome::Resolved(DishResult {
                    mention: mention.clone(),
                    top_matches,
                    ingredient_summary: ingredients
                        .remove(&index)
                        .unwrap_or_else(|| INGREDIENTS_UNAVAILABLE.to_string()),
                }),
                Err(failure) => DishOutcome::Failed {
                    mention: mention.clone(),
                    failure,
                },
            })
            .collect();

        Ok(Resolution { dishes, cancelled })
    }

    /// Start one ingredient lookup per mention, at most
    /// `max_concurrent_lookups` at a time. Handles are indexed like `mentions`.
    fn spawn_ingredient_lookups(
        &self,
        mentions: &[DishMention],
    ) -> (
        JoinSet<(usize, Result<String, ServiceError>)>,
        Vec<AbortHandle>,
    ) {
        let permits = Arc::new(Semaphore::new(self.options.max_concurrent_lookups.max(1)));
        let mut lookups = JoinSet::new();
        let handles = mentions
            .iter()
            .enumerate()
            .map(|(index, mention)| {
                let services = Arc::clone(&self.services);
                let permits = Arc::clone(&permits);
                let dish = mention.translated.clone();
                lookups.spawn(async move {
                    // The semaphore is never closed.
                    let _permit = permits.acquire_owned().await;
                    (index, services.key_ingredients(&dish).await)
                })
            })
            .collect();
        (lookups, handles)
    }

    /// Load the embedding model before the dish loop.
    async fn warm_up(&self) -> Result<(), ResolveError> {
        let embedder = Arc::clone(&self.embedder);
        let provider = tokio::task::spawn_blocking(move || embedder.provider())
            .await
            .map_err(|e| ResolveError::ModelLoad(format!("model load task failed: {e}")))?
            .map_err(|e| ResolveError::ModelLoad(e.to_string()))?;

        if let Some(catalog_dim) = self.catalog.dimension() {
            if catalog_dim != provider.dimensions() {
                tracing::error!(
                    catalog_dim,
                    model_dim = provider.dimensions(),
                    "catalog and embedding model dimensions disagree; all scores will be 0"
                );
            }
        }
        Ok(())
    }

    async fn rank_mention(
        &self,
        mention: &DishMention,
    ) -> Result<Vec<SimilarityMatch>, DishFailure> {
        let embedder = Arc::clone(&self.embedder);
        let text = mention.translated.clone();
        let embedding = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| ModelError::Inference(format!("embedding task failed: {e}")))
            .and_then(|result| result)
            .map_err(|e| {
                tracing::warn!(dish = %mention.translated, error = %e, "embedding failed, skipping dish");
                DishFailure {
                    stage: Stage::Embedding,
                    message: e.to_string(),
                }
            })?;

        let matches = top_k(&embedding, &self.catalog, self.options.top_k);
        if let Some(best) = matches.first() {
            tracing::info!(
                dish = %mention.translated,
                best = %best.entry.label,
                score = best.score,
                "matched"
            );
        }
        Ok(matches)
    }
}

async fn collect_ingredients(
    mut lookups: JoinSet<(usize, Result<String, ServiceError>)>,
) -> HashMap<usize, String> {
    let mut ingredients = HashMap::new();
    while let Some(joined) = lookups.join_next().await {
        match joined {
            Ok((index, Ok(summary))) => {
                ingredients.insert(index, summary);
            }
            Ok((index, Err(e))) => {
                tracing::warn!(dish_index = index, error = %e, "ingredient lookup failed");
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                tracing::warn!(error = %e, "ingredient lookup task failed");
            }
        }
    }
    ingredients
}
