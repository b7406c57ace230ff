//! Gemini REST client.
//!
//! Talks to the Generative Language API over blocking HTTP (`ureq`):
//! - `GET  /v1beta/models` (paged) to enumerate model identifiers
//! - `POST /v1beta/models/{model}:generateContent` with inline JPEG parts
//!
//! Rate limiting is recognised from the HTTP status (429) or the structured
//! `error.status` field (`RESOURCE_EXHAUSTED`), never from message text.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use zeroize::Zeroizing;

use super::oracle::{OracleError, OracleRequest, RequestPart, VisionOracle};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";
const RATE_LIMIT_STATUS: &str = "RESOURCE_EXHAUSTED";
const LIST_PAGE_SIZE: &str = "1000";
const MAX_LIST_PAGES: usize = 20;

pub struct GeminiClient {
    api_key: Zeroizing<String>,
    base_url: String,
    agent: ureq::Agent,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: &'static str,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl GeminiClient {
    pub fn new(api_key: &str, timeout: Duration) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, timeout)
    }

    /// Point the client at a different endpoint (proxies, tests).
    pub fn with_base_url(api_key: &str, base_url: &str, timeout: Duration) -> Self {
        Self {
            api_key: Zeroizing::new(api_key.to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }
}

impl VisionOracle for GeminiClient {
    fn generate(&self, model: &str, request: &OracleRequest) -> Result<String, OracleError> {
        let body = serde_json::to_string(&encode_request(request))
            .map_err(|e| OracleError::failed(format!("failed to encode request: {}", e)))?;

        let response = self
            .agent
            .post(&self.generate_url(model))
            .set(API_KEY_HEADER, self.api_key.as_str())
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(classify_http_error)?;

        let text = response
            .into_string()
            .map_err(|e| OracleError::failed(format!("failed to read reply: {}", e)))?;
        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| OracleError::failed(format!("failed to parse reply: {}", e)))?;
        reply_text(parsed)
    }

    fn list_models(&self) -> Result<Vec<String>, OracleError> {
        let url = format!("{}/models", self.base_url);
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let mut call = self
                .agent
                .get(&url)
                .set(API_KEY_HEADER, self.api_key.as_str())
                .query("pageSize", LIST_PAGE_SIZE);
            if let Some(token) = page_token.as_deref() {
                call = call.query("pageToken", token);
            }
            let response = call.call().map_err(classify_http_error)?;
            let text = response
                .into_string()
                .map_err(|e| OracleError::failed(format!("failed to read model list: {}", e)))?;
            let page: ListModelsResponse = serde_json::from_str(&text)
                .map_err(|e| OracleError::failed(format!("failed to parse model list: {}", e)))?;

            names.extend(page.models.into_iter().map(|m| m.name));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(names),
            }
        }
        log::warn!("model list truncated after {} pages", MAX_LIST_PAGES);
        Ok(names)
    }
}

fn encode_request(request: &OracleRequest) -> GenerateRequest<'_> {
    let parts = request
        .parts
        .iter()
        .map(|part| match part {
            RequestPart::Text(text) => Part::Text { text },
            RequestPart::Jpeg(bytes) => Part::Inline {
                inline_data: InlineData {
                    mime_type: "image/jpeg",
                    data: base64::engine::general_purpose::STANDARD.encode(bytes),
                },
            },
        })
        .collect();
    GenerateRequest {
        contents: vec![Content {
            role: "user",
            parts,
        }],
        generation_config: GenerationConfig {
            temperature: request.temperature,
        },
    }
}

fn reply_text(response: GenerateResponse) -> Result<String, OracleError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(OracleError::failed("reply contained no text"));
    }
    Ok(text)
}

fn classify_http_error(err: ureq::Error) -> OracleError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            classify_status(code, &body)
        }
        ureq::Error::Transport(transport) => {
            OracleError::failed(format!("request failed: {}", transport))
        }
    }
}

fn classify_status(code: u16, body: &str) -> OracleError {
    let detail = serde_json::from_str::<ApiErrorBody>(body).ok().map(|b| b.error);
    let message = detail
        .as_ref()
        .map(|d| d.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", code));
    let exhausted = detail
        .as_ref()
        .is_some_and(|d| d.status == RATE_LIMIT_STATUS);

    if code == 429 || exhausted {
        OracleError::rate_limited(message)
    } else {
        OracleError::failed(format!("service returned {}: {}", code, message))
    }
}
