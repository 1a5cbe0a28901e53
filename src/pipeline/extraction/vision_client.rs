//! HTTP clients for multimodal (image + text) models.
//!
//! Two back ends share the [`VisionClient`] trait:
//! - **Gemini** `generateContent` (hosted, API key in `x-goog-api-key`)
//! - **Ollama** `/api/chat` (local, optional bearer token)
//!
//! Both use a blocking `reqwest` client with a hard request timeout. Callers
//! run them on blocking threads, never inside an async task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{VisionConfig, VisionProvider};

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Vision service not reachable at {0}")]
    Connection(String),

    #[error("Vision request timed out after {0} seconds")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Vision API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse vision response: {0}")]
    ResponseParsing(String),

    #[error("Vision model returned no text")]
    EmptyResponse,
}

/// Multimodal model abstraction (allows mocking for tests).
pub trait VisionClient: Send + Sync {
    /// Send one instruction plus one image, return the model's free text.
    fn describe_image(
        &self,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, VisionError>;

    fn model_name(&self) -> &str;
}

/// Build the client for a configured provider. `None` when the provider is
/// disabled.
pub fn build_vision_client(
    config: &VisionConfig,
) -> Result<Option<Arc<dyn VisionClient>>, VisionError> {
    let client: Arc<dyn VisionClient> = match config.provider {
        VisionProvider::None => return Ok(None),
        VisionProvider::Gemini => Arc::new(GeminiClient::new(
            &config.base_url,
            &config.model,
            config.api_key.as_deref().unwrap_or_default(),
            config.timeout_secs,
        )?),
        VisionProvider::Ollama => Arc::new(OllamaVisionClient::new(
            &config.base_url,
            &config.model,
            config.api_key.clone(),
            config.timeout_secs,
        )?),
    };
    Ok(Some(client))
}

fn http_client(timeout_secs: u64) -> Result<reqwest::blocking::Client, VisionError> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| VisionError::HttpClient(format!("Failed to create HTTP client: {e}")))
}

fn map_send_error(e: reqwest::Error, base_url: &str, timeout_secs: u64) -> VisionError {
    if e.is_connect() {
        VisionError::Connection(base_url.to_string())
    } else if e.is_timeout() {
        VisionError::Timeout(timeout_secs)
    } else {
        VisionError::HttpClient(e.to_string())
    }
}

fn check_status(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, VisionError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(VisionError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

// ═══════════════════════════════════════════════════════════
// Gemini
// ═══════════════════════════════════════════════════════════

pub struct GeminiClient {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl GeminiClient {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        timeout_secs: u64,
    ) -> Result<Self, VisionError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            client: http_client(timeout_secs)?,
            timeout_secs,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart<'a> {
    Text { text: &'a str },
    Image { inline_data: GeminiInlineData<'a> },
}

#[derive(Serialize)]
struct GeminiInlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

impl GeminiResponse {
    /// Concatenated text parts of the first candidate.
    fn into_text(self) -> Result<String, VisionError> {
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(VisionError::EmptyResponse);
        }
        Ok(text)
    }
}

impl VisionClient for GeminiClient {
    fn describe_image(
        &self,
        prompt: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, VisionError> {
        let body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![
                    GeminiPart::Text { text: prompt },
                    GeminiPart::Image {
                        inline_data: GeminiInlineData {
                            mime_type,
                            data: base64::engine::general_purpose::STANDARD.encode(image),
                        },
                    },
                ],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| map_send_error(e, &self.base_url, self.timeout_secs))?;

        let parsed: GeminiResponse = check_status(response)?
            .json()
            .map_err(|e| VisionError::ResponseParsing(e.to_string()))?;
        parsed.into_text()
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ═══════════════════════════════════════════════════════════
// Ollama
// ═══════════════════════════════════════════════════════════

pub struct OllamaVisionClient {
    base_url: String,
    model: String,
    bearer_token: Option<String>,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaVisionClient {
    pub fn new(
        base_url: &str,
        model: &str,
        bearer_token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, VisionError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            bearer_token: bearer_token.filter(|t| !t.trim().is_empty()),
            client: http_client(timeout_secs)?,
            timeout_secs,
        })
    }
}

/// Request body for Ollama /api/chat
#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct OllamaChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    images: Vec<String>,
}

/// Response body from Ollama /api/chat
#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

impl VisionClient for OllamaVisionClient {
    fn describe_image(
        &self,
        prompt: &str,
        image: &[u8],
        _mime_type: &str,
    ) -> Result<String, VisionError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaChatRequest {
            model: &self.model,
            messages: vec![OllamaChatMessage {
                role: "user",
                content: prompt,
                images: vec![base64::engine::general_purpose::STANDARD.encode(image)],
            }],
            stream: false,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .map_err(|e| map_send_error(e, &self.base_url, self.timeout_secs))?;

        let parsed: OllamaChatResponse = check_status(response)?
            .json()
            .map_err(|e| VisionError::ResponseParsing(e.to_string()))?;
        if parsed.message.content.trim().is_empty() {
            return Err(VisionError::EmptyResponse);
        }
        Ok(parsed.message.content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ═══════════════════════════════════════════════════════════
// Mock
// ═══════════════════════════════════════════════════════════

enum MockReply {
    Text(String),
    Timeout,
    Api(u16),
}

/// Mock vision client for testing. Replies with fixed text or a fixed error.
pub struct MockVisionClient {
    reply: MockReply,
    calls: AtomicUsize,
}

impl MockVisionClient {
    pub fn new(response: &str) -> Self {
        Self {
            reply: MockReply::Text(response.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn timing_out() -> Self {
        Self {
            reply: MockReply::Timeout,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn api_error(status: u16) -> Self {
        Self {
            reply: MockReply::Api(status),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl VisionClient for MockVisionClient {
    fn describe_image(
        &self,
        _prompt: &str,
        _image: &[u8],
        _mime_type: &str,
    ) -> Result<String, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            MockReply::Text(text) => Ok(text.clone()),
            MockReply::Timeout => Err(VisionError::Timeout(1)),
            MockReply::Api(status) => Err(VisionError::Api {
                status: *status,
                body: "mock".into(),
            }),
        }
    }

    fn model_name(&self) -> &str {
        "mock-vision"
    }
}
