//! Provider resolution and the `edgequake-llm` adapter.
//!
//! Gemini is served by [`GeminiClient`]. Every other backend (OpenAI,
//! Anthropic, Ollama, Azure, Mistral, …) goes through an
//! [`edgequake_llm::LLMProvider`] wrapped in [`LlmProviderService`].

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::pipeline::completion::{
    Completion, CompletionFailure, CompletionRequest, CompletionService,
};
use crate::pipeline::gemini::GeminiClient;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info};

/// Environment variables consulted for a Gemini key, in order.
pub const GEMINI_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// [`CompletionService`] over any `edgequake-llm` provider.
///
/// The provider's model is fixed when it is created, so `request.model` is
/// ignored here.
pub struct LlmProviderService {
    provider: Arc<dyn LLMProvider>,
    name: String,
    model: Option<String>,
}

impl LlmProviderService {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        name: impl Into<String>,
        model: Option<String>,
    ) -> Self {
        Self {
            provider,
            name: name.into(),
            model,
        }
    }
}

#[async_trait]
impl CompletionService for LlmProviderService {
    fn name(&self) -> &str {
        &self.name
    }

    fn model<'a>(&'a self, request: &'a CompletionRequest) -> &'a str {
        self.model.as_deref().unwrap_or(&request.model)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionFailure> {
        let messages = vec![ChatMessage::user(request.prompt.as_str())];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };
        match self.provider.chat(&messages, Some(&options)).await {
            Ok(response) => Ok(Completion {
                text: response.content,
                prompt_tokens: response.prompt_tokens,
                completion_tokens: response.completion_tokens,
            }),
            Err(e) => Err(classify_provider_error(&e.to_string())),
        }
    }
}

static RE_HTTP_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([45]\d\d)\b").unwrap());

const REJECTION_MARKERS: [&str; 9] = [
    "invalid api key",
    "invalid_api_key",
    "unauthorized",
    "authentication",
    "permission denied",
    "forbidden",
    "quota",
    "bad request",
    "invalid_request",
];

/// Classify a provider error from its message.
///
/// An HTTP status in the message decides when present (4xx except 408 is a
/// rejection); otherwise known rejection phrases do. Everything else is
/// treated as transient.
pub fn classify_provider_error(message: &str) -> CompletionFailure {
    let code = RE_HTTP_CODE
        .captures(message)
        .and_then(|c| c[1].parse::<u16>().ok());

    let rejected = match code {
        Some(408) => false,
        Some(c) if (400..500).contains(&c) => true,
        Some(_) => false,
        None => {
            let lower = message.to_lowercase();
            REJECTION_MARKERS.iter().any(|m| lower.contains(m))
        }
    };

    if rejected {
        CompletionFailure::Rejected {
            code,
            message: message.to_string(),
        }
    } else {
        CompletionFailure::Transient(message.to_string())
    }
}

fn gemini_key(config: &AnalysisConfig) -> Option<String> {
    config
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| {
            GEMINI_KEY_VARS
                .iter()
                .filter_map(|v| std::env::var(v).ok())
                .find(|k| !k.trim().is_empty())
        })
}

fn create_named_provider(
    name: &str,
    config: &AnalysisConfig,
) -> Result<Arc<dyn CompletionService>, AnalysisError> {
    if matches!(name.to_ascii_lowercase().as_str(), "gemini" | "google") {
        let key = gemini_key(config).ok_or_else(|| AnalysisError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: "Set GEMINI_API_KEY (or GOOGLE_API_KEY) or pass --api-key.".into(),
        })?;
        return Ok(Arc::new(GeminiClient::new(key, &config.gemini_base_url)?));
    }

    let provider = ProviderFactory::create_llm_provider(name, &config.model).map_err(|e| {
        AnalysisError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(LlmProviderService::new(
        provider,
        name,
        Some(config.model.clone()),
    )))
}

/// Resolve the completion service, from most-specific to least-specific.
///
/// 1. **Pre-built service** (`config.service`), used as-is.
/// 2. **Named provider** (`config.provider_name`): `gemini` uses the REST
///    client, anything else goes through [`ProviderFactory::create_llm_provider`]
///    with `config.model`.
/// 3. **Gemini key** in `config.api_key`, `GEMINI_API_KEY` or `GOOGLE_API_KEY`.
/// 4. **Auto-detection** via [`ProviderFactory::from_env`].
pub fn resolve_service(
    config: &AnalysisConfig,
) -> Result<Arc<dyn CompletionService>, AnalysisError> {
    if let Some(ref service) = config.service {
        return Ok(Arc::clone(service));
    }

    if let Some(ref name) = config.provider_name {
        debug!("Using named provider '{}'", name);
        return create_named_provider(name, config);
    }

    if let Some(key) = gemini_key(config) {
        debug!("Using Gemini ({})", config.model);
        return Ok(Arc::new(GeminiClient::new(key, &config.gemini_base_url)?));
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| AnalysisError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No completion provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;
    info!("Auto-detected completion provider from environment");
    Ok(Arc::new(LlmProviderService::new(llm_provider, "auto", None)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl CompletionService for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _: &CompletionRequest) -> Result<Completion, CompletionFailure> {
            Ok(Completion::text("NO CONFLICTS FOUND"))
        }
    }

    #[test]
    fn http_codes_decide() {
        assert!(matches!(
            classify_provider_error("OpenAI API error (401): Incorrect API key provided"),
            CompletionFailure::Rejected { code: Some(401), .. }
        ));
        assert!(matches!(
            classify_provider_error("HTTP 503 Service Unavailable"),
            CompletionFailure::Transient(_)
        ));
        assert!(matches!(
            classify_provider_error("status 408 request timeout"),
            CompletionFailure::Transient(_)
        ));
    }

    #[test]
    fn phrases_decide_without_code() {
        assert!(matches!(
            classify_provider_error("You exceeded your current quota"),
            CompletionFailure::Rejected { code: None, .. }
        ));
        assert!(matches!(
            classify_provider_error("connection reset by peer"),
            CompletionFailure::Transient(_)
        ));
    }

    #[test]
    fn prebuilt_service_wins() {
        let config = AnalysisConfig::builder()
            .service(Arc::new(Fixed))
            .provider_name("openai")
            .build()
            .unwrap();
        let service = resolve_service(&config).unwrap();
        assert_eq!(service.name(), "fixed");
    }

    #[test]
    fn named_gemini_uses_configured_key() {
        let config = AnalysisConfig::builder()
            .provider_name("gemini")
            .api_key("test-key")
            .build()
            .unwrap();
        let service = resolve_service(&config).unwrap();
        assert_eq!(service.name(), "gemini");
    }

    #[test]
    fn configured_key_selects_gemini() {
        let config = AnalysisConfig::builder().api_key("test-key").build().unwrap();
        assert_eq!(resolve_service(&config).unwrap().name(), "gemini");
    }
}
