//! Configuration types for document conflict analysis.
//!
//! Every knob the pipeline consumes lives in [`AnalysisConfig`], built via
//! [`AnalysisConfigBuilder`]. The config is passed explicitly into each
//! component; nothing reads process-wide settings except the provider
//! resolution fallback in [`crate::pipeline::provider`], which consults API-key
//! environment variables only when the config names no key.

use crate::error::AnalysisError;
use crate::pipeline::completion::CompletionService;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Default model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Configuration for an analysis run.
///
/// # Example
/// ```rust
/// use edgequake_doccheck::{AnalysisConfig, AnalysisMode};
///
/// let config = AnalysisConfig::builder()
///     .mode(AnalysisMode::Technical)
///     .max_attempts(5)
///     .concurrency(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_attempts, 5);
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Mode used when a request does not specify one. Default: comprehensive.
    pub default_mode: AnalysisMode,

    /// Model identifier sent to the completion service. Default: `gemini-2.5-flash`.
    pub model: String,

    /// Provider name (`gemini`, `openai`, `anthropic`, `ollama`, …).
    /// If None, Gemini is used when a Gemini key is available, otherwise the
    /// provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed completion service. Takes precedence over `provider_name`.
    pub service: Option<Arc<dyn CompletionService>>,

    /// API key for the Gemini client. Falls back to `GEMINI_API_KEY` /
    /// `GOOGLE_API_KEY` when None.
    pub api_key: Option<String>,

    /// Base URL of the Gemini REST API. Default: the public endpoint.
    pub gemini_base_url: String,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Conflict detection should be repeatable; a low temperature keeps the
    /// model close to the evidence in the documents.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 4000.
    pub max_output_tokens: usize,

    /// Maximum characters of extracted text kept per document. Default: 100 000.
    ///
    /// Longer documents are truncated and flagged so the report can say so.
    pub max_document_chars: usize,

    /// Maximum accepted upload size in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,

    /// Maximum number of documents in one analysis request. Default: 5.
    pub max_documents: usize,

    /// Maximum prompt length in characters. Default: 800 000.
    pub max_prompt_chars: usize,

    /// Per-attempt completion timeout in milliseconds. Default: 60 000.
    pub completion_timeout_ms: u64,

    /// Total completion attempts before giving up on transient failures. Default: 3.
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds, doubled after every attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Maximum number of concurrent completion calls. Default: 4.
    pub concurrency: usize,

    /// Description similarity (0.0–1.0) at or above which two conflicts with
    /// the same category and documents count as duplicates. Default: 0.85.
    pub similarity_threshold: f64,

    /// Keep at most this many conflicts in a report. Default: None (keep all).
    pub max_conflicts: Option<usize>,

    /// Optional progress callback for batch analysis.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            default_mode: AnalysisMode::default(),
            model: DEFAULT_MODEL.to_string(),
            provider_name: None,
            service: None,
            api_key: None,
            gemini_base_url: crate::pipeline::gemini::DEFAULT_BASE_URL.to_string(),
            temperature: 0.1,
            max_output_tokens: 4000,
            max_document_chars: 100_000,
            max_upload_bytes: 50 * 1024 * 1024,
            max_documents: 5,
            max_prompt_chars: 800_000,
            completion_timeout_ms: 60_000,
            max_attempts: 3,
            retry_backoff_ms: 500,
            concurrency: 4,
            similarity_threshold: 0.85,
            max_conflicts: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("default_mode", &self.default_mode)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("service", &self.service.as_ref().map(|s| s.name().to_string()))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("max_document_chars", &self.max_document_chars)
            .field("max_prompt_chars", &self.max_prompt_chars)
            .field("completion_timeout_ms", &self.completion_timeout_ms)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("concurrency", &self.concurrency)
            .field("similarity_threshold", &self.similarity_threshold)
            .field("max_conflicts", &self.max_conflicts)
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }

    /// Per-attempt completion timeout.
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }
}

/// Builder for [`AnalysisConfig`].
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl fmt::Debug for AnalysisConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl AnalysisConfigBuilder {
    pub fn mode(mut self, mode: AnalysisMode) -> Self {
        self.config.default_mode = mode;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn service(mut self, service: Arc<dyn CompletionService>) -> Self {
        self.config.service = Some(service);
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn gemini_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.gemini_base_url = url.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: usize) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn max_document_chars(mut self, n: usize) -> Self {
        self.config.max_document_chars = n;
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn max_documents(mut self, n: usize) -> Self {
        self.config.max_documents = n.max(1);
        self
    }

    pub fn max_prompt_chars(mut self, n: usize) -> Self {
        self.config.max_prompt_chars = n;
        self
    }

    pub fn completion_timeout_ms(mut self, ms: u64) -> Self {
        self.config.completion_timeout_ms = ms;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn similarity_threshold(mut self, t: f64) -> Self {
        self.config.similarity_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn max_conflicts(mut self, n: usize) -> Self {
        self.config.max_conflicts = Some(n);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, AnalysisError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(AnalysisError::InvalidConfig("Model id must not be empty".into()));
        }
        if c.max_document_chars == 0 {
            return Err(AnalysisError::InvalidConfig(
                "max_document_chars must be ≥ 1".into(),
            ));
        }
        if c.max_prompt_chars < c.max_document_chars.min(1024) {
            return Err(AnalysisError::InvalidConfig(format!(
                "max_prompt_chars ({}) is too small to hold any document",
                c.max_prompt_chars
            )));
        }
        if c.completion_timeout_ms == 0 {
            return Err(AnalysisError::InvalidConfig(
                "Completion timeout must be > 0 ms".into(),
            ));
        }
        if c.max_output_tokens == 0 {
            return Err(AnalysisError::InvalidConfig(
                "max_output_tokens must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Named preset controlling the detail the model is asked for.
///
/// | Mode | Asks for |
/// |------|----------|
/// | basic | obvious, high-impact conflicts; core fields only |
/// | comprehensive | subtle conflicts too; evidence quotes and a resolution (default) |
/// | technical | comprehensive + exact values, units and an impact statement |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Basic,
    #[default]
    Comprehensive,
    Technical,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Basic => "basic",
            AnalysisMode::Comprehensive => "comprehensive",
            AnalysisMode::Technical => "technical",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" | "quick" => Ok(AnalysisMode::Basic),
            "comprehensive" | "full" => Ok(AnalysisMode::Comprehensive),
            "technical" => Ok(AnalysisMode::Technical),
            other => Err(AnalysisError::InvalidConfig(format!(
                "Unknown analysis mode '{other}' (expected basic, comprehensive or technical)"
            ))),
        }
    }
}

/// Target format for [`crate::pipeline::export::export_report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Markdown conflict summary report. (default)
    #[default]
    Markdown,
    /// Pretty-printed JSON of the full [`crate::output::AnalysisReport`].
    Json,
    /// Plain-text rendering of the Markdown report.
    Text,
}

impl ExportFormat {
    /// Conventional file extension for the format.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Json => "json",
            ExportFormat::Text => "txt",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let c = AnalysisConfig::default();
        assert_eq!(c.default_mode, AnalysisMode::Comprehensive);
        assert_eq!(c.model, DEFAULT_MODEL);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.retry_backoff_ms, 500);
        assert_eq!(c.completion_timeout(), Duration::from_secs(60));
        assert!(c.max_conflicts.is_none());
    }

    #[test]
    fn builder_clamps_values() {
        let c = AnalysisConfig::builder()
            .max_attempts(0)
            .concurrency(0)
            .similarity_threshold(3.0)
            .temperature(-1.0)
            .build()
            .unwrap();
        assert_eq!(c.max_attempts, 1);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.similarity_threshold, 1.0);
        assert_eq!(c.temperature, 0.0);
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let err = AnalysisConfig::builder()
            .completion_timeout_ms(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_empty_model() {
        assert!(AnalysisConfig::builder().model("  ").build().is_err());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("BASIC".parse::<AnalysisMode>().unwrap(), AnalysisMode::Basic);
        assert_eq!("quick".parse::<AnalysisMode>().unwrap(), AnalysisMode::Basic);
        assert_eq!(
            "technical".parse::<AnalysisMode>().unwrap(),
            AnalysisMode::Technical
        );
        assert!("verbose".parse::<AnalysisMode>().is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = AnalysisConfig::builder().api_key("secret-123").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret-123"));
        assert!(dbg.contains("<redacted>"));
    }
}
