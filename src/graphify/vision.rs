//! Vision-model classification over an OpenAI-compatible chat API.
//!
//! One image becomes one `/chat/completions` request asking for a JSON
//! object (see [`crate::prompts::SCHEMA_DESCRIPTION`]). All prompt text
//! lives in [`crate::prompts`]; this module only owns transport, retries
//! and reply parsing.
//!
//! ## Retry Strategy
//!
//! Up to `max_attempts` requests are made per image:
//!
//! | Outcome | Action |
//! |---------|--------|
//! | timeout, HTTP 429, HTTP 5xx | back off `min(base · 2^(n-1), cap)`, retry |
//! | 4xx naming `temperature` as unsupported | drop the field, retry at once |
//! | 4xx naming `response_format` as unsupported | drop it, prepend a strict-JSON system message, retry at once |
//! | any other 4xx | fail with [`VisionError::RemoteRejection`] |
//! | connection refused, DNS, TLS | fail with [`VisionError::Transport`] |
//!
//! Each field is dropped at most once; a second complaint about a field that
//! is already gone is treated as an ordinary rejection.

use crate::config::VisionConfig;
use crate::error::VisionError;
use crate::graphify::{ClassificationRequest, ClassificationResult, ImageClassifier};
use crate::prompts::{user_instruction, STRICT_JSON_PROMPT, SYSTEM_PROMPT};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Characters of a reply quoted in error messages.
const SNIPPET_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Request body. Optional fields vanish from the JSON once dropped.
#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    messages: Vec<Value>,
}

/// Request field an endpoint may refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionalParam {
    Temperature,
    ResponseFormat,
}

impl OptionalParam {
    fn name(self) -> &'static str {
        match self {
            OptionalParam::Temperature => "temperature",
            OptionalParam::ResponseFormat => "response_format",
        }
    }
}

impl ChatRequest {
    fn new(config: &VisionConfig, request: &ClassificationRequest) -> Self {
        let data_url = format!(
            "data:{};base64,{}",
            request.mime_type,
            STANDARD.encode(&request.image)
        );
        let user_text = user_instruction(request.context.as_deref());
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            response_format: Some(ResponseFormat {
                kind: "json_object",
            }),
            messages: vec![
                json!({"role": "system", "content": SYSTEM_PROMPT}),
                json!({
                    "role": "user",
                    "content": [
                        {"type": "text", "text": user_text},
                        {"type": "image_url", "image_url": {"url": data_url}}
                    ]
                }),
            ],
        }
    }

    /// Remove `param` from the body. Returns false if it was already gone.
    fn drop_param(&mut self, param: OptionalParam) -> bool {
        match param {
            OptionalParam::Temperature => self.temperature.take().is_some(),
            OptionalParam::ResponseFormat => {
                if self.response_format.take().is_none() {
                    return false;
                }
                self.messages
                    .insert(0, json!({"role": "system", "content": STRICT_JSON_PROMPT}));
                true
            }
        }
    }
}

/// Client for one OpenAI-compatible vision endpoint.
#[derive(Debug, Clone)]
pub struct VisionClient {
    http: reqwest::Client,
    config: VisionConfig,
}

impl VisionClient {
    pub fn new(config: VisionConfig) -> Result<Self, VisionError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| VisionError::Transport {
                detail: e.to_string(),
            })?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &VisionConfig {
        &self.config
    }

    /// Classify one image, applying the retry table in the module docs.
    pub async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, VisionError> {
        let url = self.config.completions_url();
        let max_attempts = self.config.max_attempts;
        let mut body = ChatRequest::new(&self.config, request);
        let mut last_error = String::from("no attempt made");
        let start = Instant::now();

        for attempt in 1..=max_attempts {
            let sent = self
                .http
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .header(reqwest::header::ACCEPT, "application/json")
                .timeout(Duration::from_secs(self.config.timeout_secs))
                .json(&body)
                .send()
                .await;

            let response = match sent {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    last_error = format!("timeout: {e}");
                    self.back_off(&request.name, attempt, &last_error).await;
                    continue;
                }
                Err(e) => {
                    return Err(VisionError::Transport {
                        detail: e.to_string(),
                    })
                }
            };

            let status = response.status().as_u16();
            let text = match response.text().await {
                Ok(t) => t,
                Err(e) if e.is_timeout() => {
                    last_error = format!("timeout reading body: {e}");
                    self.back_off(&request.name, attempt, &last_error).await;
                    continue;
                }
                Err(e) => {
                    return Err(VisionError::Transport {
                        detail: e.to_string(),
                    })
                }
            };
            let data: Option<Value> = serde_json::from_str(&text).ok();

            if (400..500).contains(&status) && status != 429 {
                if let Some(param) = data.as_ref().and_then(unsupported_param) {
                    if body.drop_param(param) {
                        warn!(
                            "{}: endpoint rejected '{}', retrying without it",
                            request.name,
                            param.name()
                        );
                        last_error = format!("HTTP {status}: unsupported {}", param.name());
                        continue;
                    }
                }
                return Err(VisionError::RemoteRejection {
                    status,
                    body: snippet(&text),
                });
            }

            if status == 429 || (500..600).contains(&status) {
                last_error = format!("HTTP {status}: {}", snippet(&text));
                self.back_off(&request.name, attempt, &last_error).await;
                continue;
            }

            let Some(data) = data else {
                return Err(VisionError::MalformedReply {
                    detail: format!(
                        "Non-JSON response from GPT API (HTTP {status}): {}",
                        snippet(&text)
                    ),
                });
            };

            debug!(
                "{}: reply after {} attempt(s) in {:?}",
                request.name,
                attempt,
                start.elapsed()
            );
            return parse_reply(&data);
        }

        Err(VisionError::RemoteExhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    /// Sleep before the next attempt; skipped after the final one.
    async fn back_off(&self, name: &str, attempt: u32, reason: &str) {
        if attempt >= self.config.max_attempts {
            return;
        }
        let delay = self.config.backoff_for(attempt);
        warn!(
            "{}: attempt {}/{} failed ({}), retrying in {:?}",
            name, attempt, self.config.max_attempts, reason, delay
        );
        sleep(delay).await;
    }
}

#[async_trait]
impl ImageClassifier for VisionClient {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResult, VisionError> {
        VisionClient::classify(self, request).await
    }
}

/// Which optional field, if any, an error body says is unsupported.
fn unsupported_param(data: &Value) -> Option<OptionalParam> {
    let err = data.get("error")?;
    let param = err.get("param").and_then(Value::as_str);
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();

    [OptionalParam::Temperature, OptionalParam::ResponseFormat]
        .into_iter()
        .find(|p| {
            param == Some(p.name())
                || (message.contains(p.name()) && message.contains("unsupported"))
        })
}

/// Pull the JSON object out of `choices[0].message.content`.
fn parse_reply(data: &Value) -> Result<ClassificationResult, VisionError> {
    let content = data
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| VisionError::MalformedReply {
            detail: format!(
                "GPT API returned empty content: {}",
                snippet(&data.to_string())
            ),
        })?;

    let stripped = strip_json_fences(content);
    let value: Value = serde_json::from_str(stripped).map_err(|e| VisionError::MalformedReply {
        detail: format!("{e}. Raw: {}", snippet(content)),
    })?;
    if !value.is_object() {
        return Err(VisionError::MalformedReply {
            detail: format!("expected a JSON object. Raw: {}", snippet(content)),
        });
    }
    serde_json::from_value(value).map_err(|e| VisionError::MalformedReply {
        detail: format!("{e}. Raw: {}", snippet(content)),
    })
}

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```(?:json|JSON)?[ \t]*\n(.*?)\n?```\s*$").unwrap());

/// Remove one outer Markdown code fence, if the whole reply is fenced.
fn strip_json_fences(content: &str) -> &str {
    match RE_JSON_FENCE.captures(content).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => content.trim(),
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_CHARS).collect()
}

/// MIME type for an image: by extension, then by magic bytes, then
/// `application/octet-stream`.
pub fn infer_mime_type(path: &Path, bytes: &[u8]) -> String {
    let by_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match by_ext.as_deref() {
        Some("jpg" | "jpeg") => return "image/jpeg".into(),
        Some("png") => return "image/png".into(),
        Some("webp") => return "image/webp".into(),
        _ => {}
    }
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => "image/png".into(),
        Ok(image::ImageFormat::Jpeg) => "image/jpeg".into(),
        Ok(image::ImageFormat::WebP) => "image/webp".into(),
        Ok(image::ImageFormat::Gif) => "image/gif".into(),
        _ => "application/octet-stream".into(),
    }
}
