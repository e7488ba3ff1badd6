//! External vision/text service used for extraction, translation and
//! ingredient lookup.
//!
//! [`MenuServices`] is the seam the pipeline depends on; [`OpenAiServices`]
//! implements it against an OpenAI-compatible chat-completions endpoint.
//! Timeouts are enforced here (the `reqwest` client timeout) and surface as
//! [`ServiceError::Timeout`].

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::VisionConfig;
use crate::error::ServiceError;
use crate::stages::MenuImage;

/// Calls the workflow makes to the outside world.
pub trait MenuServices: Send + Sync {
    /// Dish names visible in the menu photo, one per line.
    fn extract_dish_text(
        &self,
        image: &MenuImage,
    ) -> impl Future<Output = Result<String, ServiceError>> + Send;

    /// Raw translation response for the extracted text, ideally a JSON array
    /// of `{original, translated}` objects.
    fn translate_dishes(
        &self,
        extracted: &str,
    ) -> impl Future<Output = Result<String, ServiceError>> + Send;

    /// Short comma-separated list of key ingredients for a dish.
    fn key_ingredients(
        &self,
        dish: &str,
    ) -> impl Future<Output = Result<String, ServiceError>> + Send;
}

const EXTRACTION_PROMPT: &str = "List every dish name on this menu, one per line, exactly as written. \
Leave out prices, descriptions and section headings.";

fn translation_prompt(extracted: &str) -> String {
    format!(
        "Translate these menu dish names into English. Answer with a JSON array only, \
where each element is {{\"original\": <name as written>, \"translated\": <English name>}}. \
Skip anything that is not a dish name.\n\n{extracted}"
    )
}

fn ingredients_prompt(dish: &str) -> String {
    format!(
        "Give the key ingredients of \"{dish}\" as a short comma-separated list, with no other text."
    )
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiServices {
    http: reqwest::Client,
    config: VisionConfig,
    api_key: String,
}

impl OpenAiServices {
    pub fn new(config: VisionConfig) -> Result<Self, ServiceError> {
        let api_key = config.api_key.clone().ok_or(ServiceError::MissingApiKey)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    async fn chat(&self, content: Value, max_tokens: u32) -> Result<String, ServiceError> {
        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        let body = chat_request(&self.config.model, content, max_tokens);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            let message = upstream_error_message(&text);
            tracing::warn!(status = status.as_u16(), %message, "chat completion rejected");
            return Err(ServiceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        parse_chat_response(&text)
    }
}

impl MenuServices for OpenAiServices {
    async fn extract_dish_text(&self, image: &MenuImage) -> Result<String, ServiceError> {
        let content = json!([
            { "type": "text", "text": EXTRACTION_PROMPT },
            { "type": "image_url", "image_url": { "url": image.data_url() } },
        ]);
        self.chat(content, self.config.extraction_max_tokens).await
    }

    async fn translate_dishes(&self, extracted: &str) -> Result<String, ServiceError> {
        let content = Value::String(translation_prompt(extracted));
        self.chat(content, self.config.translation_max_tokens).await
    }

    async fn key_ingredients(&self, dish: &str) -> Result<String, ServiceError> {
        let content = Value::String(ingredients_prompt(dish));
        self.chat(content, self.config.ingredient_max_tokens).await
    }
}

fn chat_request(model: &str, content: Value, max_tokens: u32) -> Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": content }],
        "max_tokens": max_tokens,
    })
}

fn map_transport_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout
    } else {
        ServiceError::Transport(e.to_string())
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Trimmed content of the first choice.
fn parse_chat_response(body: &str) -> Result<String, ServiceError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ServiceError::MalformedResponse(e.to_string()))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| ServiceError::MalformedResponse("response has no message content".into()))
}

/// `error.message` from an error body, or "Unknown error".
fn upstream_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| "Unknown error".to_string())
}
