//! Analysis entry points.
//!
//! [`Analyzer`] runs one [`AnalysisRequest`] through the pipeline:
//! prompt → completion → parse → assemble. It owns the resolved completion
//! service, the shared request counter and a semaphore that caps concurrent
//! completion calls at `config.concurrency` across every caller.
//!
//! The free functions ([`analyze_files`], [`analyze_to_file`],
//! [`analyze_sync`], [`inspect_files`]) cover the common "paths in, report
//! out" case without building a [`Session`] by hand.

use crate::config::{AnalysisConfig, AnalysisMode, ExportFormat};
use crate::document::Document;
use crate::error::{AnalysisError, Stage};
use crate::output::{AnalysisReport, DocumentSummary};
use crate::pipeline::assemble::{self, AssembleOptions, ReportContext};
use crate::pipeline::completion::{
    self, CompletionRequest, CompletionService, RequestCounter, RetryPolicy,
};
use crate::pipeline::export;
use crate::pipeline::parse::{self, KnownDocument};
use crate::pipeline::prompt::{self, BuiltPrompt, PromptDocument};
use crate::pipeline::provider;
use crate::session::{AnalysisRequest, Session};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Runs analysis requests against one completion service.
pub struct Analyzer {
    config: AnalysisConfig,
    service: Arc<dyn CompletionService>,
    counter: Arc<RequestCounter>,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("service", &self.service.name())
            .field("requests", &self.counter.get())
            .field("config", &self.config)
            .finish()
    }
}

impl Analyzer {
    /// Resolve the completion service from `config` (see
    /// [`provider::resolve_service`]).
    pub fn from_config(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        let service = provider::resolve_service(&config)?;
        Ok(Self::with_service(config, service))
    }

    /// Use `service` regardless of what `config` names.
    pub fn with_service(config: AnalysisConfig, service: Arc<dyn CompletionService>) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            config,
            service,
            counter: Arc::new(RequestCounter::new()),
            permits,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Provider attempts made so far, retries included.
    pub fn request_count(&self) -> u64 {
        self.counter.get()
    }

    /// Build the prompt for `request` without calling the model.
    pub fn build_prompt(
        &self,
        session: &Session,
        request: &AnalysisRequest,
    ) -> Result<BuiltPrompt, AnalysisError> {
        let docs = session.resolve(request)?;
        self.prompt_for(&docs, request.mode)
    }

    fn prompt_for(
        &self,
        docs: &[&Document],
        mode: AnalysisMode,
    ) -> Result<BuiltPrompt, AnalysisError> {
        let prompt_docs: Vec<PromptDocument<'_>> =
            docs.iter().map(|d| PromptDocument::from(*d)).collect();
        prompt::build_prompt(&prompt_docs, mode, self.config.max_prompt_chars)
    }

    /// Run `request` to completion.
    pub async fn analyze(
        &self,
        session: &Session,
        request: &AnalysisRequest,
    ) -> Result<AnalysisReport, AnalysisError> {
        self.analyze_with_cancel(session, request, &CancellationToken::new())
            .await
    }

    /// Run `request`, aborting as soon as `cancel` fires.
    ///
    /// Cancelling drops the in-flight completion future (closing its HTTP
    /// request) and skips every later stage; the result is
    /// [`AnalysisError::Cancelled`] and no partial report.
    pub async fn analyze_with_cancel(
        &self,
        session: &Session,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, AnalysisError> {
        self.run(session, request, cancel, 1).await
    }

    pub(crate) async fn run(
        &self,
        session: &Session,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
        index: usize,
    ) -> Result<AnalysisReport, AnalysisError> {
        let start = Instant::now();
        let cancelled = || AnalysisError::Cancelled {
            request: request.id.to_string(),
        };
        info!(
            "Analysis {}: {} document(s), {} mode",
            request.id,
            request.document_ids.len(),
            request.mode
        );

        // ── Step 1: Build prompt ─────────────────────────────────────────
        self.stage(index, Stage::Prompt);
        let docs = session.resolve(request)?;
        let built = self.prompt_for(&docs, request.mode)?;
        debug!("Prompt: {} chars, tag {}", built.char_len, built.delimiter_tag);

        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        // ── Step 2: Call the model ───────────────────────────────────────
        self.stage(index, Stage::Completion);
        let completion_request = CompletionRequest::from_config(built.text, &self.config);
        let policy = RetryPolicy::from(&self.config);
        let call = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| AnalysisError::Internal(format!("Semaphore closed: {}", e)))?;
            completion::complete_with_retry(
                self.service.as_ref(),
                &completion_request,
                policy,
                &self.counter,
            )
            .await
        };
        let (reply, stats) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Analysis {} cancelled", request.id);
                return Err(cancelled());
            }
            result = call => result?,
        };

        // ── Step 3: Parse reply ──────────────────────────────────────────
        self.stage(index, Stage::Parse);
        let known: Vec<KnownDocument<'_>> = docs
            .iter()
            .map(|d| KnownDocument {
                id: &d.id,
                filename: &d.filename,
            })
            .collect();
        let parsed = parse::parse_response(&reply.text, &known)?;

        // ── Step 4: Assemble report ──────────────────────────────────────
        let context = ReportContext {
            request_id: request.id,
            mode: request.mode,
            documents: docs
                .iter()
                .map(|d| DocumentSummary {
                    id: d.id.clone(),
                    filename: d.filename.clone(),
                    word_count: d.word_count,
                    truncated: d.is_truncated(),
                })
                .collect(),
            stats,
        };
        let report =
            assemble::assemble_report(parsed, context, AssembleOptions::from(&self.config));

        info!(
            "Analysis {} complete: {} conflict(s), {} attempt(s), {}ms",
            request.id,
            report.conflicts.len(),
            report.stats.attempts,
            start.elapsed().as_millis()
        );
        Ok(report)
    }

    fn stage(&self, index: usize, stage: Stage) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage(index, stage);
        }
    }
}

/// Load files into a fresh session, failing on the first unreadable one.
pub async fn load_session<P: AsRef<Path>>(
    paths: &[P],
    config: &AnalysisConfig,
) -> Result<Session, AnalysisError> {
    let mut session = Session::new(config);
    for path in paths {
        session.add_file(path).await?;
    }
    Ok(session)
}

/// Extract the given files without calling a model.
///
/// Does not require a provider or API key.
pub async fn inspect_files<P: AsRef<Path>>(
    paths: &[P],
    config: &AnalysisConfig,
) -> Result<Session, AnalysisError> {
    load_session(paths, config).await
}

/// Analyse the given files as one request.
///
/// This is the primary entry point for the library.
///
/// # Example
/// ```rust,no_run
/// use edgequake_doccheck::{analyze_files, AnalysisConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AnalysisConfig::default();
/// let report = analyze_files(&["handbook.pdf", "syllabus.docx"], None, &config).await?;
/// for c in &report.conflicts {
///     println!("[{}] {}: {}", c.severity, c.category, c.description);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn analyze_files<P: AsRef<Path>>(
    paths: &[P],
    mode: Option<AnalysisMode>,
    config: &AnalysisConfig,
) -> Result<AnalysisReport, AnalysisError> {
    // ── Step 1: Extract documents ────────────────────────────────────────
    let session = load_session(paths, config).await?;

    // ── Step 2: Resolve provider ─────────────────────────────────────────
    let analyzer = Analyzer::from_config(config.clone())?;

    // ── Step 3: Run the pipeline ─────────────────────────────────────────
    let request = session.request_all(mode)?;
    analyzer.analyze(&session, &request).await
}

/// Analyse files and write the exported report to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn analyze_to_file<P: AsRef<Path>>(
    paths: &[P],
    output_path: impl AsRef<Path>,
    format: ExportFormat,
    mode: Option<AnalysisMode>,
    config: &AnalysisConfig,
) -> Result<AnalysisReport, AnalysisError> {
    let report = analyze_files(paths, mode, config).await?;
    let rendered = export::export_report(&report, format)?;
    write_atomic(output_path.as_ref(), rendered.as_bytes()).await?;
    Ok(report)
}

/// Write `bytes` to `path` via a sibling temp file and a rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AnalysisError> {
    let write_err = |e: std::io::Error| AnalysisError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}

/// Synchronous wrapper around [`analyze_files`].
///
/// Creates a temporary tokio runtime internally.
pub fn analyze_sync<P: AsRef<Path>>(
    paths: &[P],
    mode: Option<AnalysisMode>,
    config: &AnalysisConfig,
) -> Result<AnalysisReport, AnalysisError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AnalysisError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(analyze_files(paths, mode, config))
}
