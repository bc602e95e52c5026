//! Caption and alt-text generation for uploaded images.
//!
//! The adapter boundary is total: `describe` always produces a usable pair.
//! Service errors, unparsable replies, and missing credentials all degrade to
//! fallback text internally, so the ingestion pipeline never has to handle a
//! captioning failure.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::seq::IndexedRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const MAX_CAPTION_CHARS: usize = 200;
pub const MAX_ALT_CHARS: usize = 100;

const GENERATE_CONTENT_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const PROMPT: &str = "Write a short, warm caption for this image as if posting it to a \
    photo-sharing feed. Stay true to what the image shows without exaggerating. Then write a \
    concise alt text describing the image for screen readers. Reply with pure JSON and nothing \
    else, in the form: { \"caption\": \"...\", \"alt\": \"...\" }";

const FALLBACK_CAPTIONS: [&str; 4] = [
    "An image was shared.",
    "A moment worth keeping.",
    "Fresh from the camera roll.",
    "A picture in place of words.",
];
const FALLBACK_ALT: &str = "User-uploaded image";

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Caption {
    pub caption: String,
    pub alt_text: String,
}

/// The degraded pair used whenever a real description cannot be produced.
#[must_use]
pub fn fallback_caption() -> Caption {
    let caption = FALLBACK_CAPTIONS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(FALLBACK_CAPTIONS[0]);

    Caption {
        caption: caption.to_owned(),
        alt_text: FALLBACK_ALT.to_owned(),
    }
}

#[async_trait]
pub trait CaptionGenerator: Send + Sync {
    /// Describe an image. Never fails outward.
    async fn describe(&self, image: &[u8], content_type: &str) -> Caption;
}

/// Used when no service credential is configured. The degraded deployment is
/// warned about once at startup, not per call.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct StaticCaptioner;

#[async_trait]
impl CaptionGenerator for StaticCaptioner {
    async fn describe(&self, _image: &[u8], _content_type: &str) -> Caption {
        Caption {
            caption: FALLBACK_CAPTIONS[0].to_owned(),
            alt_text: FALLBACK_ALT.to_owned(),
        }
    }
}

#[derive(Debug, Error)]
enum CaptionFetchError {
    #[error("Request to the captioning service failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Captioning service replied with status {0}")]
    Status(reqwest::StatusCode),
    #[error("Captioning service reply contained no text")]
    Empty,
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct CaptionPayload {
    caption: String,
    alt: String,
}

pub struct GeminiCaptioner {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiCaptioner {
    pub fn new(api_key: String, model: String) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            api_key,
            model,
        })
    }

    async fn fetch_description(
        &self,
        image: &[u8],
        content_type: &str,
    ) -> Result<String, CaptionFetchError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part {
                        text: Some(PROMPT.to_owned()),
                        inline_data: None,
                    },
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: content_type.to_owned(),
                            data: BASE64.encode(image),
                        }),
                    },
                ],
            }],
        };

        let url = format!("{GENERATE_CONTENT_URL}/{}:generateContent", self.model);
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CaptionFetchError::Status(status));
        }

        let reply: GenerateContentResponse = response.json().await?;
        reply
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .find_map(|part| part.text)
            .ok_or(CaptionFetchError::Empty)
    }
}

#[async_trait]
impl CaptionGenerator for GeminiCaptioner {
    async fn describe(&self, image: &[u8], content_type: &str) -> Caption {
        let raw = match self.fetch_description(image, content_type).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "Captioning call failed, using fallback");
                return fallback_caption();
            }
        };

        debug!(%raw, "Captioning service reply");

        match interpret_reply(&raw) {
            Some((caption, alt_text)) => {
                let fallback = fallback_caption();
                Caption {
                    caption: non_empty_or(clip(&caption, MAX_CAPTION_CHARS), fallback.caption),
                    alt_text: non_empty_or(clip(&alt_text, MAX_ALT_CHARS), fallback.alt_text),
                }
            }
            None => {
                warn!(%raw, "Captioning reply was not interpretable, using fallback");
                fallback_caption()
            }
        }
    }
}

/// Extract the caption/alt pair from the service's textual reply: strip any
/// code fences, parse as JSON, and fall back to plucking the two fields out
/// of the raw text when the reply is not quite JSON.
fn interpret_reply(raw: &str) -> Option<(String, String)> {
    let cleaned = strip_code_fences(raw);

    if let Ok(payload) = serde_json::from_str::<CaptionPayload>(&cleaned) {
        return Some((payload.caption, payload.alt));
    }

    static CAPTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#""caption"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("caption pattern is valid")
    });
    static ALT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#""alt"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("alt pattern is valid")
    });

    let caption = CAPTION_PATTERN.captures(&cleaned)?.get(1)?.as_str();
    let alt = ALT_PATTERN.captures(&cleaned)?.get(1)?.as_str();
    Some((unescape(caption), unescape(alt)))
}

fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_owned()
}

fn unescape(text: &str) -> String {
    text.replace("\\\"", "\"").replace("\\\\", "\\")
}

/// Truncate to at most `max_chars` characters, never splitting a character.
fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((boundary, _)) => text[..boundary].to_owned(),
        None => text.to_owned(),
    }
}

fn non_empty_or(text: String, fallback: String) -> String {
    if text.trim().is_empty() { fallback } else { text }
}
