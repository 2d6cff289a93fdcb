//! Google Gemini REST client (the default completion provider).
//!
//! Calls `POST {base}/models/{model}:generateContent` with the key in the
//! `x-goog-api-key` header. Talking to the REST endpoint directly, instead of
//! through a provider abstraction, keeps the HTTP status code available for
//! classifying failures:
//!
//! | Response | Classified as |
//! |----------|---------------|
//! | 2xx with candidate text | success |
//! | 2xx blocked by a safety filter | rejected |
//! | 2xx with an undecodable body | transient |
//! | 408, 5xx | transient |
//! | any other 4xx (bad key, quota, bad request) | rejected |
//! | connect / read error | transient |

use crate::error::AnalysisError;
use crate::pipeline::completion::{
    Completion, CompletionFailure, CompletionRequest, CompletionService,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Public Gemini API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Completion service backed by the Gemini REST API.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, AnalysisError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AnalysisError::ProviderNotConfigured {
                provider: "gemini".into(),
                hint: "Set GEMINI_API_KEY (or GOOGLE_API_KEY) or pass --api-key.".into(),
            });
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AnalysisError::Internal(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

// ── Classification ───────────────────────────────────────────────────────────

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT
}

fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => match env.error.status {
            Some(s) if !env.error.message.is_empty() => format!("{} ({})", env.error.message, s),
            _ if !env.error.message.is_empty() => env.error.message,
            _ => status.to_string(),
        },
        Err(_) if !body.trim().is_empty() => body.trim().chars().take(300).collect(),
        Err(_) => status.to_string(),
    }
}

fn classify_status(status: StatusCode, body: &str) -> CompletionFailure {
    let message = error_message(status, body);
    if is_transient_status(status) {
        CompletionFailure::Transient(format!("HTTP {}: {}", status.as_u16(), message))
    } else {
        CompletionFailure::Rejected {
            code: Some(status.as_u16()),
            message,
        }
    }
}

fn decode_success(body: &str) -> Result<Completion, CompletionFailure> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| CompletionFailure::Transient(format!("undecodable response body: {}", e)))?;

    if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(CompletionFailure::Rejected {
            code: None,
            message: format!("prompt blocked by provider ({})", reason),
        });
    }

    let mut text = String::new();
    let mut finish_reason = None;
    if let Some(candidate) = parsed.candidates.into_iter().next() {
        finish_reason = candidate.finish_reason;
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(t) = part.text {
                    text.push_str(&t);
                }
            }
        }
    }

    if text.trim().is_empty() {
        if let Some(reason) = finish_reason.as_deref() {
            if matches!(reason, "SAFETY" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "RECITATION") {
                return Err(CompletionFailure::Rejected {
                    code: None,
                    message: format!("response blocked by provider ({})", reason),
                });
            }
        }
    }

    let usage = parsed.usage_metadata;
    Ok(Completion {
        text,
        prompt_tokens: usage.as_ref().map(|u| u.prompt_token_count).unwrap_or(0),
        completion_tokens: usage.as_ref().map(|u| u.candidates_token_count).unwrap_or(0),
    })
}

#[async_trait]
impl CompletionService for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionFailure> {
        let body = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };

        let response = self
            .http
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionFailure::Transient(format!("transport error: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CompletionFailure::Transient(format!("reading response: {}", e)))?;
        debug!("gemini: HTTP {} ({} bytes)", status.as_u16(), text.len());

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }
        decode_success(&text)
    }
}
