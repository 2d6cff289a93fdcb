//! CLI binary for edgequake-doccheck.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `AnalysisConfig` and prints reports.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_doccheck::analyze::write_atomic;
use edgequake_doccheck::{
    analyze_batch, export_report, AnalysisConfig, AnalysisMode, AnalysisProgressCallback,
    AnalysisReport, Analyzer, DocumentId, ExportFormat, ProgressCallback, Session, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a progress bar over the requests of a batch
/// plus one log line per finished request. Requests finish out of order when
/// a batch runs concurrently.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-request wall-clock start times.
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Spinner only; `on_batch_start` switches to a counted bar.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading documents…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:32.green/238}] {pos}/{len} requests  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Analysing");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_requests: usize) {
        self.activate_bar(total_requests);
    }

    fn on_request_start(&self, index: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
    }

    fn on_stage(&self, index: usize, stage: Stage) {
        let label = match stage {
            Stage::Prompt => "building prompt".to_string(),
            Stage::Completion => "waiting for model".to_string(),
            Stage::Parse => "parsing reply".to_string(),
            other => other.to_string(),
        };
        self.bar.set_message(format!("#{index} {label}"));
    }

    fn on_request_complete(&self, index: usize, total: usize, conflicts: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} Request {:>2}/{:<2}  {:<14}  {}",
            green("✓"),
            index,
            total,
            dim(&format!("{conflicts} conflict(s)")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_request_error(&self, index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(index);

        // First line only, capped, to keep the log tidy.
        let first = error.lines().next().unwrap_or("");
        let msg: String = if first.chars().count() > 80 {
            format!("{}\u{2026}", first.chars().take(79).collect::<String>())
        } else {
            first.to_string()
        };

        self.bar.println(format!(
            "  {} Request {:>2}/{:<2}  {}  {}",
            red("✗"),
            index,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_requests: usize, success_count: usize) {
        let failed = total_requests.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} request(s) analysed",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} request(s) analysed  ({} failed)",
                if failed == total_requests {
                    red("✘")
                } else {
                    yellow("⚠")
                },
                bold(&success_count.to_string()),
                total_requests,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Compare two documents, Markdown report on stdout
  doccheck handbook.pdf syllabus.docx

  # Technical mode, JSON report written to a file
  doccheck --mode technical --format json -o report.json design-v1.pdf design-v2.pdf

  # Two independent analyses run concurrently
  doccheck --batch hr.pdf,contract.docx --batch policy.txt,procedure.md

  # Show what would be sent to the model (no API key needed)
  doccheck --inspect-only handbook.pdf syllabus.docx

  # Use another provider through edgequake-llm
  doccheck --provider openai --model gpt-4.1-mini a.pdf b.pdf

SUPPORTED FORMATS:
  .pdf            text layer only (scanned, image-only PDFs are rejected)
  .docx           Word 2007+ documents
  .txt .md        UTF-8 text (Latin-1 fallback)

ANALYSIS MODES:
  basic           obvious, high-impact conflicts only
  comprehensive   subtle conflicts, evidence quotes and resolutions (default)
  technical       comprehensive + exact values, units and impact

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default provider)
  GOOGLE_API_KEY          Alternative name for the Gemini key
  OPENAI_API_KEY          OpenAI API key (with --provider openai)
  ANTHROPIC_API_KEY       Anthropic API key (with --provider anthropic)
  DOCCHECK_*              Every option, e.g. DOCCHECK_MODE=technical
  RUST_LOG                Override the log filter
"#;

/// Find contradictions between documents using LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "doccheck",
    version,
    about = "Find contradictions between PDF, DOCX and text documents using LLMs",
    long_about = "Extract the text of up to five documents, ask a language model to compare \
them, and print a ranked report of the conflicts it finds. Uses Google Gemini by default; \
OpenAI, Anthropic, Ollama and other providers are available through edgequake-llm.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Documents to analyse together (PDF, DOCX, TXT, MD).
    files: Vec<PathBuf>,

    /// A comma-separated group of files analysed as its own request.
    /// Repeat to run several requests concurrently.
    #[arg(long, value_name = "FILES")]
    batch: Vec<String>,

    /// Analysis mode: basic, comprehensive, technical.
    #[arg(long, env = "DOCCHECK_MODE", value_enum, default_value = "comprehensive")]
    mode: ModeArg,

    /// Report format: markdown, json, text.
    #[arg(long, env = "DOCCHECK_FORMAT", value_enum, default_value = "markdown")]
    format: FormatArg,

    /// Write the report to this file (a directory with --batch).
    #[arg(short, long, env = "DOCCHECK_OUTPUT")]
    output: Option<PathBuf>,

    /// Model ID (e.g. gemini-2.5-flash, gpt-4.1-mini).
    #[arg(long, env = "DOCCHECK_MODEL")]
    model: Option<String>,

    /// Provider: gemini, openai, anthropic, ollama, azure, …
    #[arg(
        long,
        env = "DOCCHECK_PROVIDER",
        long_help = "LLM provider. Defaults to Gemini when a Gemini key is available, \
          otherwise auto-detected from API key env vars."
    )]
    provider: Option<String>,

    /// Gemini API key (overrides GEMINI_API_KEY).
    #[arg(long, env = "DOCCHECK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Max characters of text kept per document.
    #[arg(long, env = "DOCCHECK_MAX_DOC_CHARS", default_value_t = 100_000)]
    max_doc_chars: usize,

    /// Keep at most this many conflicts per report.
    #[arg(long, env = "DOCCHECK_MAX_CONFLICTS")]
    max_conflicts: Option<usize>,

    /// Max model output tokens.
    #[arg(long, env = "DOCCHECK_MAX_TOKENS", default_value_t = 4000)]
    max_tokens: usize,

    /// Model temperature (0.0–2.0).
    #[arg(long, env = "DOCCHECK_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Total completion attempts per request.
    #[arg(long, env = "DOCCHECK_ATTEMPTS", default_value_t = 3)]
    attempts: u32,

    /// Per-attempt completion timeout in seconds.
    #[arg(long, env = "DOCCHECK_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Concurrent completion calls (batch mode).
    #[arg(short, long, env = "DOCCHECK_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Print extraction results only; no model call.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCCHECK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCCHECK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCCHECK_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Basic,
    Comprehensive,
    Technical,
}

impl From<ModeArg> for AnalysisMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Basic => AnalysisMode::Basic,
            ModeArg::Comprehensive => AnalysisMode::Comprehensive,
            ModeArg::Technical => AnalysisMode::Technical,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Markdown,
    Json,
    Text,
}

impl From<FormatArg> for ExportFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Markdown => ExportFormat::Markdown,
            FormatArg::Json => ExportFormat::Json,
            FormatArg::Text => ExportFormat::Text,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let groups = request_groups(&cli)?;
    let format: ExportFormat = cli.format.into();

    // ── Build config ─────────────────────────────────────────────────────
    let progress: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn AnalysisProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    // ── Extract every distinct file once ─────────────────────────────────
    let mut session = Session::new(&config);
    let mut ids: HashMap<PathBuf, DocumentId> = HashMap::new();
    for path in groups.iter().flatten() {
        if ids.contains_key(path) {
            continue;
        }
        let id = session
            .add_file(path)
            .await
            .with_context(|| format!("Failed to load {}", path.display()))?;
        ids.insert(path.clone(), id);
    }
    for (later, earlier) in session.duplicates() {
        if !cli.quiet {
            eprintln!(
                "{} {} has the same text as {}",
                yellow("⚠"),
                later,
                earlier
            );
        }
    }

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        print_inspection(&session, format)?;
        return Ok(());
    }

    // ── Build requests ───────────────────────────────────────────────────
    let mode: AnalysisMode = cli.mode.into();
    let requests = groups
        .iter()
        .map(|group| {
            let group_ids: Vec<DocumentId> =
                group.iter().filter_map(|p| ids.get(p).cloned()).collect();
            session.request(&group_ids, Some(mode))
        })
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid analysis request")?;

    // ── Run analysis ─────────────────────────────────────────────────────
    let analyzer = Analyzer::from_config(config).context("No completion provider available")?;
    let items = analyze_batch(&analyzer, &session, requests).await;

    let total = items.len();
    let mut failed = 0usize;
    for item in items {
        match item.result {
            Ok(report) => {
                let target = output_target(cli.output.as_deref(), total, item.index, format);
                emit_report(&report, format, target.as_deref(), cli.quiet).await?;
            }
            Err(e) => {
                failed += 1;
                if !show_progress {
                    eprintln!("{} Request {}: {}", red("✗"), item.index, e);
                }
            }
        }
    }

    if !cli.quiet {
        eprintln!(
            "   {} provider call(s) via {}",
            dim(&analyzer.request_count().to_string()),
            cyan(analyzer.service_name()),
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} analysis request(s) failed");
    }
    Ok(())
}

/// Positional files form one request; each `--batch` group forms another.
fn request_groups(cli: &Cli) -> Result<Vec<Vec<PathBuf>>> {
    let mut groups = Vec::new();
    if !cli.files.is_empty() {
        groups.push(cli.files.clone());
    }
    for arg in &cli.batch {
        let group: Vec<PathBuf> = arg
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        if group.is_empty() {
            anyhow::bail!("Empty --batch group: '{arg}'");
        }
        groups.push(group);
    }
    if groups.is_empty() {
        anyhow::bail!("No input files given");
    }
    Ok(groups)
}

/// Map CLI args to `AnalysisConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .mode(cli.mode.into())
        .max_document_chars(cli.max_doc_chars)
        .max_output_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_attempts(cli.attempts)
        .completion_timeout_ms(cli.timeout.saturating_mul(1000))
        .concurrency(cli.concurrency);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(n) = cli.max_conflicts {
        builder = builder.max_conflicts(n);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Where a report goes: stdout (`None`), the `-o` file, or
/// `<dir>/report-<n>.<ext>` when several requests ran.
fn output_target(
    output: Option<&Path>,
    total: usize,
    index: usize,
    format: ExportFormat,
) -> Option<PathBuf> {
    let out = output?;
    if total == 1 {
        Some(out.to_path_buf())
    } else {
        Some(out.join(format!("report-{index}.{}", format.extension())))
    }
}

async fn emit_report(
    report: &AnalysisReport,
    format: ExportFormat,
    target: Option<&Path>,
    quiet: bool,
) -> Result<()> {
    let rendered = export_report(report, format).context("Failed to render report")?;
    match target {
        Some(path) => {
            write_atomic(path, rendered.as_bytes())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !quiet {
                let summary = report.summary();
                eprintln!(
                    "{}  {} conflict(s)  risk {}  →  {}",
                    if report.has_conflicts() { yellow("⚠") } else { green("✔") },
                    summary.total,
                    bold(summary.risk_level.label()),
                    bold(&path.display().to_string()),
                );
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(rendered.as_bytes())
                .context("Failed to write to stdout")?;
            if !rendered.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }
    }
    Ok(())
}

fn print_inspection(session: &Session, format: ExportFormat) -> Result<()> {
    if matches!(format, ExportFormat::Json) {
        let docs: Vec<serde_json::Value> = session
            .documents()
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id,
                    "filename": d.filename,
                    "format": d.format,
                    "bytes": d.raw.len(),
                    "words": d.word_count,
                    "chars": d.char_count,
                    "truncated": d.is_truncated(),
                    "sha256": d.content_hash,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&docs).context("Failed to serialise inspection")?
        );
        return Ok(());
    }

    for d in session.documents() {
        println!("{}", bold(&format!("{}  {}", d.id, d.filename)));
        println!("  Format:     {}", d.format);
        println!("  Bytes:      {}", d.raw.len());
        println!("  Words:      {}", d.word_count);
        println!("  Characters: {}", d.char_count);
        if d.is_truncated() {
            println!("  Truncated:  {}", yellow("yes"));
        }
        println!("  SHA-256:    {}", dim(&d.content_hash));
        let preview: String = d.text().chars().take(200).collect();
        println!("  Preview:    {}\n", dim(&preview.replace('\n', " ")));
    }
    Ok(())
}
