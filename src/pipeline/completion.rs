//! Completion client: send one prompt, get raw text back.
//!
//! [`CompletionService`] is the only network boundary of the pipeline. Any
//! backend that turns a prompt into text can implement it: the Gemini REST
//! client in [`crate::pipeline::gemini`], the `edgequake-llm` adapter in
//! [`crate::pipeline::provider`], or a stub in tests.
//!
//! ## Retry Strategy
//!
//! [`complete_with_retry`] bounds every attempt with `tokio::time::timeout`.
//! Timeouts and [`CompletionFailure::Transient`] failures are retried with
//! exponential backoff (`backoff_ms * 2^(n-1)` before attempt `n + 1`); with
//! a 500 ms base and 3 attempts the waits are 500 ms then 1 s.
//! [`CompletionFailure::Rejected`] is returned at once: a bad key or an
//! exhausted quota does not get better by asking again.

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl CompletionRequest {
    /// Request for `prompt` with model and sampling settings from `config`.
    pub fn from_config(prompt: String, config: &AnalysisConfig) -> Self {
        Self {
            prompt,
            model: config.model.clone(),
            max_tokens: config.max_output_tokens,
            temperature: config.temperature,
        }
    }
}

/// Text returned by the service plus token usage when reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Structured failure reported by a [`CompletionService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionFailure {
    /// Worth retrying: transport error, 5xx, overloaded backend.
    Transient(String),
    /// The provider refused the request. Never retried.
    Rejected { code: Option<u16>, message: String },
}

impl std::fmt::Display for CompletionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionFailure::Transient(msg) => write!(f, "{msg}"),
            CompletionFailure::Rejected {
                code: Some(code),
                message,
            } => write!(f, "HTTP {code}: {message}"),
            CompletionFailure::Rejected { code: None, message } => write!(f, "{message}"),
        }
    }
}

/// "Prompt in, text out".
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Short provider name for logs and reports.
    fn name(&self) -> &str;

    /// Model the service will actually use for `request`.
    fn model<'a>(&'a self, request: &'a CompletionRequest) -> &'a str {
        &request.model
    }

    /// Perform a single attempt. Retries and timeouts are the caller's job.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, CompletionFailure>;
}

/// Timeout and retry settings for [`complete_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    /// Bound on each attempt.
    pub timeout: Duration,
    /// Wait before the second attempt; doubled after each failure.
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (attempts are 1-indexed).
    pub fn backoff_before_next(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

impl From<&AnalysisConfig> for RetryPolicy {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            timeout: config.completion_timeout(),
            backoff_ms: config.retry_backoff_ms,
        }
    }
}

/// Counts every attempt sent to a provider, across all requests.
#[derive(Debug, Default)]
pub struct RequestCounter(AtomicU64);

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Statistics of one successful completion call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionStats {
    pub provider: String,
    pub model: String,
    pub attempts: u32,
    pub prompt_chars: usize,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub duration_ms: u64,
}

/// Call `service` under `policy`.
///
/// Returns the completion and its statistics, [`AnalysisError::CompletionRejected`]
/// on the first rejection, or [`AnalysisError::CompletionUnavailable`] once
/// every attempt timed out or failed transiently.
pub async fn complete_with_retry(
    service: &dyn CompletionService,
    request: &CompletionRequest,
    policy: RetryPolicy,
    counter: &RequestCounter,
) -> Result<(Completion, CompletionStats), AnalysisError> {
    let start = Instant::now();
    let mut last_err = String::from("no attempt made");

    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            let backoff = policy.backoff_before_next(attempt - 1);
            warn!(
                "{}: retry {}/{} after {}ms",
                service.name(),
                attempt - 1,
                policy.max_attempts - 1,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        counter.increment();
        match timeout(policy.timeout, service.complete(request)).await {
            Ok(Ok(completion)) => {
                let duration = start.elapsed();
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    service.name(),
                    completion.prompt_tokens,
                    completion.completion_tokens,
                    duration
                );
                let stats = CompletionStats {
                    provider: service.name().to_string(),
                    model: service.model(request).to_string(),
                    attempts: attempt,
                    prompt_chars: request.prompt.chars().count(),
                    prompt_tokens: completion.prompt_tokens,
                    completion_tokens: completion.completion_tokens,
                    duration_ms: duration.as_millis() as u64,
                };
                return Ok((completion, stats));
            }
            Ok(Err(CompletionFailure::Rejected { code, message })) => {
                warn!("{}: request rejected: {}", service.name(), message);
                return Err(AnalysisError::CompletionRejected { code, message });
            }
            Ok(Err(CompletionFailure::Transient(msg))) => {
                warn!("{}: attempt {} failed: {}", service.name(), attempt, msg);
                last_err = msg;
            }
            Err(_) => {
                warn!(
                    "{}: attempt {} timed out after {:?}",
                    service.name(),
                    attempt,
                    policy.timeout
                );
                last_err = format!("timed out after {}ms", policy.timeout.as_millis());
            }
        }
    }

    Err(AnalysisError::CompletionUnavailable {
        attempts: policy.max_attempts,
        last_error: last_err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<Completion, CompletionFailure>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<Completion, CompletionFailure>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionService for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _: &CompletionRequest) -> Result<Completion, CompletionFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(CompletionFailure::Transient("script exhausted".into())))
        }
    }

    struct Hanging;

    #[async_trait]
    impl CompletionService for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _: &CompletionRequest) -> Result<Completion, CompletionFailure> {
            sleep(Duration::from_secs(30)).await;
            Ok(Completion::text("too late"))
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            prompt: "prompt".into(),
            model: "test-model".into(),
            max_tokens: 100,
            temperature: 0.1,
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            timeout: Duration::from_millis(50),
            backoff_ms: 1,
        }
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            max_attempts: 4,
            timeout: Duration::from_secs(1),
            backoff_ms: 500,
        };
        assert_eq!(p.backoff_before_next(1), Duration::from_millis(500));
        assert_eq!(p.backoff_before_next(2), Duration::from_millis(1000));
        assert_eq!(p.backoff_before_next(3), Duration::from_millis(2000));
    }

    #[test]
    fn policy_from_config() {
        let config = AnalysisConfig::default();
        let p = RetryPolicy::from(&config);
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.timeout, Duration::from_secs(60));
        assert_eq!(p.backoff_ms, 500);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failure() {
        let svc = Scripted::new(vec![
            Err(CompletionFailure::Transient("503".into())),
            Ok(Completion::text("ok")),
        ]);
        let counter = RequestCounter::new();
        let (completion, stats) = complete_with_retry(&svc, &request(), policy(3), &counter)
            .await
            .unwrap();
        assert_eq!(completion.text, "ok");
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.model, "test-model");
        assert_eq!(counter.get(), 2);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let svc = Scripted::new(vec![Err(CompletionFailure::Rejected {
            code: Some(401),
            message: "invalid key".into(),
        })]);
        let counter = RequestCounter::new();
        let err = complete_with_retry(&svc, &request(), policy(5), &counter)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::CompletionRejected { code: Some(401), .. }
        ));
        assert_eq!(svc.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeouts_exhaust_attempts() {
        let counter = RequestCounter::new();
        let err = complete_with_retry(&Hanging, &request(), policy(3), &counter)
            .await
            .unwrap_err();
        match err {
            AnalysisError::CompletionUnavailable {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(counter.get(), 3);
    }

    #[tokio::test]
    async fn transient_failures_keep_last_error() {
        let svc = Scripted::new(vec![
            Err(CompletionFailure::Transient("first".into())),
            Err(CompletionFailure::Transient("second".into())),
        ]);
        let counter = RequestCounter::new();
        let err = complete_with_retry(&svc, &request(), policy(2), &counter)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::CompletionUnavailable {
                attempts: 2,
                ref last_error,
            } if last_error == "second"
        ));
    }

    #[test]
    fn failure_display() {
        let f = CompletionFailure::Rejected {
            code: Some(429),
            message: "quota".into(),
        };
        assert_eq!(f.to_string(), "HTTP 429: quota");
        assert_eq!(CompletionFailure::Transient("reset".into()).to_string(), "reset");
    }
}
