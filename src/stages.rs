//! Extraction and translation stages.
//!
//! Thin adapters over [`MenuServices`]: they validate the input image, call the
//! service, and normalize what comes back into [`DishMention`]s. Translation
//! output is decoded strictly first; a response that isn't a JSON array of
//! mentions is salvaged line by line instead of failing the run.

use std::path::Path;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{ResolveError, Stage};
use crate::services::MenuServices;

/// A dish as read off the menu, with its English translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DishMention {
    pub original: String,
    pub translated: String,
}

impl DishMention {
    pub fn new(original: impl Into<String>, translated: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            translated: translated.into(),
        }
    }
}

/// An in-memory menu photo.
#[derive(Clone)]
pub struct MenuImage {
    bytes: Vec<u8>,
    mime: &'static str,
}

impl std::fmt::Debug for MenuImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MenuImage")
            .field("len", &self.bytes.len())
            .field("mime", &self.mime)
            .finish()
    }
}

impl MenuImage {
    pub fn new(bytes: Vec<u8>, mime: &'static str) -> Self {
        Self { bytes, mime }
    }

    /// Read an image from disk. The size ceiling is checked against file
    /// metadata before the file is read.
    pub fn from_path(path: impl AsRef<Path>, max_bytes: u64) -> Result<Self, ResolveError> {
        let path = path.as_ref();
        let mime = mime_for_path(path)?;
        let size = std::fs::metadata(path)
            .map_err(|e| ResolveError::ImageRead(format!("{}: {e}", path.display())))?
            .len();
        if size > max_bytes {
            return Err(ResolveError::ImageTooLarge {
                size,
                limit: max_bytes,
            });
        }
        let bytes = std::fs::read(path)
            .map_err(|e| ResolveError::ImageRead(format!("{}: {e}", path.display())))?;
        Ok(Self::new(bytes, mime))
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    /// `data:` URL carrying the image as base64, as vision APIs accept it.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// MIME type for a supported image extension.
pub fn mime_for_path(path: &Path) -> Result<&'static str, ResolveError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "png" => Ok("image/png"),
        "gif" => Ok("image/gif"),
        "webp" => Ok("image/webp"),
        _ => Err(ResolveError::UnsupportedImage(path.display().to_string())),
    }
}

/// Reject a missing, empty, or oversized image before any external call.
pub fn validate_image(
    image: Option<&MenuImage>,
    max_bytes: u64,
) -> Result<&MenuImage, ResolveError> {
    let image = image.ok_or(ResolveError::MissingImage)?;
    if image.is_empty() {
        return Err(ResolveError::MissingImage);
    }
    if image.len() > max_bytes {
        return Err(ResolveError::ImageTooLarge {
            size: image.len(),
            limit: max_bytes,
        });
    }
    Ok(image)
}

/// Run the vision call and return the trimmed dish text.
pub async fn extract_text<S: MenuServices>(
    services: &S,
    image: &MenuImage,
) -> Result<String, ResolveError> {
    let text = services
        .extract_dish_text(image)
        .await
        .map_err(|source| ResolveError::ExternalService {
            stage: Stage::Extraction,
            source,
        })?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ResolveError::NoTextExtracted);
    }
    Ok(text.to_string())
}

/// Which decoding path produced a [`Translation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationSource {
    /// The response contained a well-formed JSON array of mentions.
    Structured,
    /// The response was salvaged line by line, each line translating to itself.
    LineFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub mentions: Vec<DishMention>,
    pub source: TranslationSource,
}

/// Run the translation call and decode its response.
pub async fn translate<S: MenuServices>(
    services: &S,
    extracted: &str,
) -> Result<Translation, ResolveError> {
    let raw = services
        .translate_dishes(extracted)
        .await
        .map_err(|source| ResolveError::ExternalService {
            stage: Stage::Translation,
            source,
        })?;
    Ok(parse_translation(&raw))
}

/// Decode a translation response.
///
/// The outermost `[ ... ]` span is decoded as a list of mentions, which
/// tolerates prose or code fences around the array. If there is no such span
/// or it doesn't decode, every remaining content line becomes an identity
/// mention.
pub fn parse_translation(raw: &str) -> Translation {
    if let Some(span) = json_array_span(raw) {
        match serde_json::from_str::<Vec<DishMention>>(span) {
            Ok(mentions) => {
                return Translation {
                    mentions: clean_mentions(mentions),
                    source: TranslationSource::Structured,
                };
            }
            Err(e) => {
                tracing::warn!(error = %e, "translation JSON did not decode, falling back to lines");
            }
        }
    } else {
        tracing::warn!("translation response has no JSON array, falling back to lines");
    }

    let mentions = raw
        .lines()
        .map(str::trim)
        .filter(|line| is_dish_line(line))
        .map(|line| DishMention::new(line, line))
        .collect();

    Translation {
        mentions,
        source: TranslationSource::LineFallback,
    }
}

fn json_array_span(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    (start < end).then(|| &raw[start..=end])
}

fn clean_mentions(mentions: Vec<DishMention>) -> Vec<DishMention> {
    mentions
        .into_iter()
        .map(|m| DishMention::new(m.original.trim(), m.translated.trim()))
        .filter(|m| !m.translated.is_empty())
        .collect()
}

/// A fallback line is kept unless it is blank, bare JSON punctuation, a code
/// fence, or a stray `"original"`/`"translated"` field.
fn is_dish_line(line: &str) -> bool {
    !line.is_empty()
        && !line.chars().all(|c| matches!(c, '[' | ']' | '{' | '}' | ','))
        && !line.starts_with("```")
        && !line.starts_with("\"original\"")
        && !line.starts_with("\"translated\"")
}
