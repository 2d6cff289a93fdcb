//! Error types for the edgequake-doccheck library.
//!
//! Every fatal outcome of an analysis is an [`AnalysisError`]. Variants carry
//! enough context (which document, which request, which limit) for a caller
//! to retry a narrowed request, and [`AnalysisError::stage`] tells which
//! pipeline stage produced the failure.
//!
//! Not everything that goes wrong is fatal. A malformed conflict block in the
//! model's reply is skipped and counted on the report instead of failing the
//! whole analysis; only a reply with *no* usable block becomes
//! [`AnalysisError::EmptyResponse`].

use crate::document::DocumentId;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage at which an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Configuration or provider setup, before any document is touched.
    Setup,
    /// File ingestion and text extraction.
    Ingestion,
    /// Prompt assembly.
    Prompt,
    /// The network call to the completion service.
    Completion,
    /// Parsing the model's reply.
    Parse,
    /// Rendering or writing the report.
    Export,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Setup => "setup",
            Stage::Ingestion => "ingestion",
            Stage::Prompt => "prompt",
            Stage::Completion => "completion",
            Stage::Parse => "parse",
            Stage::Export => "export",
        };
        f.write_str(name)
    }
}

/// All fatal errors returned by the edgequake-doccheck library.
#[derive(Debug, Error)]
pub enum AnalysisError {
    // ── Ingestion errors ──────────────────────────────────────────────────
    /// The file extension / MIME type is not PDF, DOCX or plain text.
    #[error("Unsupported format for '{filename}': {declared}\nSupported: pdf, docx, txt, md")]
    UnsupportedFormat { filename: String, declared: String },

    /// The document could not be turned into text (corrupt, encrypted,
    /// image-only PDF, empty file).
    #[error("Text extraction failed for '{filename}': {reason}")]
    ExtractionFailed { filename: String, reason: String },

    /// The upload exceeds the configured byte limit.
    #[error("'{filename}' is {size} bytes; the upload limit is {limit} bytes")]
    DocumentTooLarge {
        filename: String,
        size: usize,
        limit: usize,
    },

    // ── Request errors ────────────────────────────────────────────────────
    /// A request referenced a document the session does not hold.
    #[error("Document {id} is not part of this session")]
    UnknownDocument { id: DocumentId },

    /// The request is structurally invalid (no documents, too many, …).
    #[error("Invalid analysis request: {0}")]
    InvalidRequest(String),

    /// The assembled prompt is longer than the completion service accepts.
    #[error(
        "Prompt for {documents} document(s) is {length} characters; the limit is {limit}.\n\
Resubmit with fewer documents or a lower --max-doc-chars."
    )]
    PromptTooLarge {
        length: usize,
        limit: usize,
        documents: usize,
    },

    // ── Completion errors ─────────────────────────────────────────────────
    /// Every attempt timed out or hit a transient transport failure.
    #[error("Completion service unavailable after {attempts} attempt(s): {last_error}")]
    CompletionUnavailable { attempts: u32, last_error: String },

    /// The provider refused the request (bad key, quota, invalid request).
    /// Never retried.
    #[error("Completion rejected by provider{}: {message}", http_suffix(.code))]
    CompletionRejected { code: Option<u16>, message: String },

    /// The configured provider could not be initialised.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The request was cancelled by the caller; partial results are discarded.
    #[error("Analysis {request} was cancelled")]
    Cancelled { request: String },

    // ── Parse errors ──────────────────────────────────────────────────────
    /// The model returned an empty reply.
    #[error("The completion service returned an empty response")]
    NoResponse,

    /// The reply was non-empty but contained no usable conflict block.
    #[error("No conflict could be parsed from the model response ({skipped_blocks} malformed block(s) skipped)")]
    EmptyResponse { skipped_blocks: usize },

    // ── Export errors ─────────────────────────────────────────────────────
    /// Could not create or write the report file.
    #[error("Failed to write report '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn http_suffix(code: &Option<u16>) -> String {
    code.map(|c| format!(" (HTTP {c})")).unwrap_or_default()
}

impl AnalysisError {
    /// The pipeline stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            AnalysisError::UnsupportedFormat { .. }
            | AnalysisError::ExtractionFailed { .. }
            | AnalysisError::DocumentTooLarge { .. } => Stage::Ingestion,
            AnalysisError::UnknownDocument { .. }
            | AnalysisError::InvalidRequest(_)
            | AnalysisError::PromptTooLarge { .. } => Stage::Prompt,
            AnalysisError::CompletionUnavailable { .. }
            | AnalysisError::CompletionRejected { .. }
            | AnalysisError::Cancelled { .. } => Stage::Completion,
            AnalysisError::NoResponse | AnalysisError::EmptyResponse { .. } => Stage::Parse,
            AnalysisError::OutputWriteFailed { .. } => Stage::Export,
            AnalysisError::ProviderNotConfigured { .. }
            | AnalysisError::InvalidConfig(_)
            | AnalysisError::Internal(_) => Stage::Setup,
        }
    }

    /// Whether resubmitting the same request later could succeed.
    ///
    /// Only exhausted transient failures qualify; everything else needs the
    /// request or the configuration to change first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AnalysisError::CompletionUnavailable { .. })
    }
}
