//! # edgequake-doccheck
//!
//! Find contradictions between PDF, DOCX and plain-text documents using LLMs.
//!
//! ## Why this crate?
//!
//! Organisations accumulate policies, contracts and procedures that drift
//! apart: one handbook says assignments are due at 5 PM, the syllabus says
//! 11:59 PM. Reading every pair of documents side by side does not scale.
//! This crate extracts the text of up to a handful of documents, asks a model
//! to compare them in one framed prompt, and turns the free-form reply into a
//! ranked list of typed, severity-scored conflict records.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (bytes + name)
//!  │
//!  ├─ 1. Extract   PDF / DOCX / text → normalised plain text (spawn_blocking)
//!  ├─ 2. Prompt    one framed prompt per request and analysis mode
//!  ├─ 3. Complete  Gemini / OpenAI / Anthropic / Ollama … with timeout + retry
//!  ├─ 4. Parse     tolerant block parser, malformed blocks skipped and counted
//!  ├─ 5. Assemble  dedup, severity/confidence ordering, optional cap
//!  └─ 6. Export    JSON, Markdown or plain text
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doccheck::{analyze_files, AnalysisConfig, AnalysisMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Gemini is used when GEMINI_API_KEY / GOOGLE_API_KEY is set,
//!     // otherwise the provider is auto-detected from the environment.
//!     let config = AnalysisConfig::default();
//!     let report = analyze_files(
//!         &["handbook.pdf", "syllabus.docx"],
//!         Some(AnalysisMode::Technical),
//!         &config,
//!     )
//!     .await?;
//!     for c in &report.conflicts {
//!         println!("{} [{}] {}", c.category, c.severity, c.description);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! For uploads held in memory, build a [`Session`] and drive an [`Analyzer`]
//! directly; [`analyze_batch`] runs several requests over one session.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doccheck` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-doccheck = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod session;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze_files, analyze_sync, analyze_to_file, inspect_files, Analyzer};
pub use config::{AnalysisConfig, AnalysisConfigBuilder, AnalysisMode, ExportFormat};
pub use document::{Document, DocumentFormat, DocumentId, ExtractionStatus};
pub use error::{AnalysisError, Stage};
pub use output::{
    AnalysisReport, CompletionStats, ConflictRecord, DocumentSummary, ReportSummary, RiskLevel,
    Severity,
};
pub use pipeline::completion::{
    Completion, CompletionFailure, CompletionRequest, CompletionService,
};
pub use pipeline::export::export_report;
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
pub use session::{AnalysisRequest, Session};
pub use stream::{analyze_batch, analyze_batch_with_cancel, analyze_stream, BatchItem};
