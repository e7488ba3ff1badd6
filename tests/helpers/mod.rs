#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dishlens::catalog::{Catalog, CatalogEntry};
use dishlens::embedding::{EmbeddingProvider, TextEmbedder};
use dishlens::error::ServiceError;
use dishlens::pipeline::{Cancellation, DishResolutionPipeline, PipelineOptions};
use dishlens::services::MenuServices;
use dishlens::stages::MenuImage;

/// Three orthogonal reference dishes: salad, soup, egg.
pub fn test_catalog() -> Arc<Catalog> {
    let entry = |id: &str, label: &str, embedding: Vec<f32>| CatalogEntry {
        id: id.into(),
        label: label.into(),
        image_locator: format!("https://img.example/{id}.jpg"),
        cuisine: Some("french".into()),
        embedding,
    };
    Arc::new(
        Catalog::from_entries(vec![
            entry("1", "Salad", vec![1.0, 0.0, 0.0]),
            entry("2", "Soup", vec![0.0, 1.0, 0.0]),
            entry("3", "Egg", vec![0.0, 0.0, 1.0]),
        ])
        .unwrap(),
    )
}

/// Embeds by keyword so rankings against [`test_catalog`] are predictable.
/// Texts listed in `failing` return an inference error.
pub struct KeywordProvider {
    pub failing: Vec<String>,
    pub embedded: Mutex<Vec<String>>,
    /// Cancelled as soon as `cancel_on` is embedded.
    pub cancel: Option<(String, Cancellation)>,
}

impl KeywordProvider {
    pub fn new() -> Self {
        Self {
            failing: vec![],
            embedded: Mutex::new(vec![]),
            cancel: None,
        }
    }

    pub fn failing_on(text: &str) -> Self {
        Self {
            failing: vec![text.to_string()],
            ..Self::new()
        }
    }

    pub fn cancelling_on(text: &str, cancel: Cancellation) -> Self {
        Self {
            cancel: Some((text.to_string(), cancel)),
            ..Self::new()
        }
    }

    pub fn embedded(&self) -> Vec<String> {
        self.embedded.lock().unwrap().clone()
    }
}

impl EmbeddingProvider for KeywordProvider {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embedded.lock().unwrap().push(text.to_string());
        if let Some((trigger, cancel)) = &self.cancel {
            if trigger == text {
                cancel.cancel();
            }
        }
        if self.failing.iter().any(|f| f == text) {
            anyhow::bail!("onnx session run failed");
        }
        let lower = text.to_lowercase();
        Ok(if lower.contains("salad") {
            vec![1.0, 0.1, 0.0]
        } else if lower.contains("soup") {
            vec![0.0, 1.0, 0.2]
        } else if lower.contains("egg") {
            vec![0.1, 0.0, 1.0]
        } else {
            vec![0.5, 0.5, 0.5]
        })
    }

    fn dimensions(&self) -> usize {
        3
    }
}

/// Scripted [`MenuServices`]. `None` for extraction or translation makes that
/// call fail with an HTTP 500.
pub struct FakeServices {
    pub extraction: Option<String>,
    pub translation: Option<String>,
    pub failing_ingredients: Vec<String>,
    pub calls: AtomicUsize,
    pub ingredient_lookups: Mutex<Vec<String>>,
    /// Each ingredient lookup sleeps this long before answering.
    pub ingredient_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeServices {
    pub fn new(extraction: &str, translation: &str) -> Self {
        Self {
            extraction: Some(extraction.to_string()),
            translation: Some(translation.to_string()),
            failing_ingredients: vec![],
            calls: AtomicUsize::new(0),
            ingredient_lookups: Mutex::new(vec![]),
            ingredient_delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_slow_ingredients(mut self, delay: Duration) -> Self {
        self.ingredient_delay = Some(delay);
        self
    }

    /// Most ingredient lookups that were ever running at the same time.
    pub fn max_concurrent_lookups(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MenuServices for FakeServices {
    async fn extract_dish_text(&self, _image: &MenuImage) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.extraction.clone().ok_or_else(|| ServiceError::Status {
            status: 500,
            message: "vision backend unavailable".into(),
        })
    }

    async fn translate_dishes(&self, _extracted: &str) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.translation.clone().ok_or_else(|| ServiceError::Status {
            status: 401,
            message: "Incorrect API key provided".into(),
        })
    }

    async fn key_ingredients(&self, dish: &str) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ingredient_lookups.lock().unwrap().push(dish.to_string());
        if let Some(delay) = self.ingredient_delay {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        if self.failing_ingredients.iter().any(|d| d == dish) {
            return Err(ServiceError::Timeout);
        }
        Ok(format!("ingredients of {dish}"))
    }
}

/// JSON translation response for `(original, translated)` pairs.
pub fn translation_json(pairs: &[(&str, &str)]) -> String {
    let mentions: Vec<serde_json::Value> = pairs
        .iter()
        .map(|(o, t)| serde_json::json!({ "original": o, "translated": t }))
        .collect();
    serde_json::to_string(&mentions).unwrap()
}

pub fn menu_image(len: usize) -> MenuImage {
    MenuImage::new(vec![0xFF; len], "image/jpeg")
}

pub fn pipeline(
    services: Arc<FakeServices>,
    provider: Arc<KeywordProvider>,
) -> DishResolutionPipeline<FakeServices> {
    DishResolutionPipeline::new(
        services,
        Arc::new(TextEmbedder::preloaded(provider)),
        test_catalog(),
        PipelineOptions::default(),
    )
}
