//! Response parsing: the model's semi-structured reply → conflict records.
//!
//! The reply is split into blocks at every `CONFLICT <n>` heading. A heading
//! either carries Markdown decoration (`#`, `**`, `__`) or ends right after
//! the number or a colon, so prose that happens to start with "Conflict 2"
//! does not open a block. Inside a block each `Label: value` line starts a
//! field; lines that are not a known label continue the previous field.
//! Labels may be bulleted or bold, and common synonyms are accepted (see
//! [`field_for_label`]).
//!
//! A reply without headings is split at its first labelled line and again
//! wherever a label repeats, so several unheaded conflicts stay separate.
//!
//! A block without a description is skipped and counted. A missing category
//! is inferred from keywords, a missing or unknown severity becomes medium
//! and a missing or unparsable confidence becomes 50; each default is flagged
//! on the record. Parsing is a pure function of its input.

use crate::document::DocumentId;
use crate::error::AnalysisError;
use crate::output::{ConflictRecord, Severity};
use crate::prompts::NO_CONFLICTS_SENTINEL;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Confidence applied when the model gives none.
pub const DEFAULT_CONFIDENCE: u8 = 50;

/// Category applied when the model gives none and no keyword matches.
pub const FALLBACK_CATEGORY: &str = "General Conflict";

/// Keyword groups used to infer a missing category; first match wins.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Deadline Conflict",
        &["deadline", "due date", "time", "schedule", "submission"],
    ),
    (
        "Policy Conflict",
        &["policy", "rule", "regulation", "guideline", "procedure"],
    ),
    (
        "Requirement Mismatch",
        &["requirement", "standard", "criteria", "threshold"],
    ),
    (
        "Attendance Policy",
        &["attendance", "presence", "participation"],
    ),
    (
        "Grading Conflict",
        &["grade", "grading", "assessment", "evaluation"],
    ),
    (
        "Authority Conflict",
        &["responsibility", "authority", "jurisdiction", "oversight"],
    ),
];

/// A document the reply may refer to.
#[derive(Debug, Clone, Copy)]
pub struct KnownDocument<'a> {
    pub id: &'a DocumentId,
    pub filename: &'a str,
}

/// Result of parsing one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Records in reply order.
    pub conflicts: Vec<ConflictRecord>,
    /// Malformed blocks skipped.
    pub skipped_blocks: usize,
    /// The reply was the no-conflicts sentinel.
    pub no_conflicts_declared: bool,
}

static RE_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?mi)^[ \t>]*(?:",
        // Decorated: `### Conflict 2 ...`, `**Conflict 2: title**`
        r"(?:#{1,6}[ \t]*(?:\*\*|__)?|\*\*|__)[ \t]*conflict[ \t]*(?:#[ \t]*)?(\d+)\b.*",
        // Bare: `CONFLICT 2` or `Conflict 2: title`
        r"|conflict[ \t]*(?:#[ \t]*)?(\d+)[ \t]*(?::.*)?",
        r")$",
    ))
    .unwrap()
});

static RE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^[ \t]*(?:[-*+][ \t]+)?(?:\*\*|__)?([A-Za-z][A-Za-z /]{0,30}?)(?:\*\*|__)?",
        r"[ \t]*:[ \t]*(?:\*\*|__)?[ \t]*(.*)$",
    ))
    .unwrap()
});

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(-)?(\d+(?:\.\d+)?|\.\d+)[ \t]*(?:(%)|/[ \t]*(\d+(?:\.\d+)?))?").unwrap()
});

static RE_DOC_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bdoc(?:ument)?[ \t]*[-_#]?[ \t]*(\d+)\b").unwrap());

static RE_SEQUENTIAL_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^DOC-(\d+)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Category,
    Severity,
    Confidence,
    Documents,
    Description,
    Evidence,
    Resolution,
    Impact,
}

/// Map a label (case-insensitive) to the field it fills.
fn field_for_label(label: &str) -> Option<Field> {
    let label = label.trim().to_lowercase();
    let field = match label.as_str() {
        "category" | "type" | "conflict type" | "category/type" | "kind" => Field::Category,
        "severity" | "priority" | "severity level" => Field::Severity,
        "confidence" | "confidence score" | "confidence level" => Field::Confidence,
        "documents" | "document" | "documents involved" | "sources" | "referenced documents" => {
            Field::Documents
        }
        "description" | "explanation" | "summary" | "details" => Field::Description,
        "evidence" | "quotes" | "quote" | "conflicting text" => Field::Evidence,
        "resolution" | "suggestion" | "recommendation" | "suggested resolution" => {
            Field::Resolution
        }
        "impact" => Field::Impact,
        _ => return None,
    };
    Some(field)
}

/// The field and value of a `Label: value` line with a known label.
fn labelled_line(line: &str) -> Option<(Field, &str)> {
    let caps = RE_FIELD.captures(line)?;
    let field = field_for_label(caps.get(1)?.as_str())?;
    Some((field, caps.get(2).map_or("", |m| m.as_str())))
}

/// Parse a raw model reply.
///
/// # Errors
/// [`AnalysisError::NoResponse`] for an empty or whitespace reply,
/// [`AnalysisError::EmptyResponse`] when a non-empty reply yields no valid
/// conflict and is not the no-conflicts sentinel.
pub fn parse_response(
    raw: &str,
    known: &[KnownDocument<'_>],
) -> Result<ParsedResponse, AnalysisError> {
    let text = raw.replace("\r\n", "\n");
    if text.trim().is_empty() {
        return Err(AnalysisError::NoResponse);
    }

    let mut blocks = split_blocks(&text);
    if blocks.is_empty() {
        blocks = split_unheaded(&text);
    }

    if blocks.is_empty() {
        if declares_no_conflicts(&text) {
            debug!("Model declared no conflicts");
            return Ok(ParsedResponse {
                conflicts: Vec::new(),
                skipped_blocks: 0,
                no_conflicts_declared: true,
            });
        }
        return Err(AnalysisError::EmptyResponse { skipped_blocks: 0 });
    }

    let mut conflicts = Vec::with_capacity(blocks.len());
    let mut skipped = 0;
    for (n, block) in &blocks {
        match parse_block(block, known) {
            Some(record) => conflicts.push(record),
            None => {
                warn!("Skipping malformed conflict block {}", n);
                skipped += 1;
            }
        }
    }

    if conflicts.is_empty() {
        return Err(AnalysisError::EmptyResponse {
            skipped_blocks: skipped,
        });
    }

    debug!(
        "Parsed {} conflict(s), skipped {} block(s)",
        conflicts.len(),
        skipped
    );
    Ok(ParsedResponse {
        conflicts,
        skipped_blocks: skipped,
        no_conflicts_declared: false,
    })
}

/// The sentinel counts only as a line of its own in a reply without field
/// labels.
fn declares_no_conflicts(text: &str) -> bool {
    if text.lines().any(|l| labelled_line(l).is_some()) {
        return false;
    }
    text.lines().any(|line| {
        line.trim_matches(|c: char| {
            c.is_whitespace() || matches!(c, '*' | '_' | '#' | '>' | '`' | '.' | '!')
        })
        .eq_ignore_ascii_case(NO_CONFLICTS_SENTINEL)
    })
}

fn heading_number<'t>(caps: &regex::Captures<'t>) -> Option<regex::Match<'t>> {
    caps.get(1).or_else(|| caps.get(2))
}

/// Split at headings; returns `(heading number, body)` pairs.
fn split_blocks(text: &str) -> Vec<(String, &str)> {
    let headings: Vec<_> = RE_HEADING.captures_iter(text).collect();
    let mut blocks = Vec::with_capacity(headings.len());
    for (i, caps) in headings.iter().enumerate() {
        let (Some(whole), Some(num)) = (caps.get(0), heading_number(caps)) else {
            continue;
        };
        let end = headings
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        blocks.push((num.as_str().to_string(), &text[whole.end()..end]));
    }
    blocks
}

/// Split a reply without headings: the first labelled line opens a block and
/// a label already seen in the current block opens the next one. Text before
/// the first label is dropped.
fn split_unheaded(text: &str) -> Vec<(String, &str)> {
    let mut starts: Vec<usize> = Vec::new();
    let mut seen: Vec<Field> = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if let Some((field, _)) = labelled_line(line.trim_end_matches('\n')) {
            if starts.is_empty() || seen.contains(&field) {
                starts.push(offset);
                seen.clear();
            }
            seen.push(field);
        }
        offset += line.len();
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            ((i + 1).to_string(), &text[start..end])
        })
        .collect()
}

#[derive(Default)]
struct RawFields {
    category: Option<String>,
    severity: Option<String>,
    confidence: Option<String>,
    documents: Option<String>,
    description: Option<String>,
    evidence: Option<String>,
    resolution: Option<String>,
    impact: Option<String>,
}

impl RawFields {
    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Category => &mut self.category,
            Field::Severity => &mut self.severity,
            Field::Confidence => &mut self.confidence,
            Field::Documents => &mut self.documents,
            Field::Description => &mut self.description,
            Field::Evidence => &mut self.evidence,
            Field::Resolution => &mut self.resolution,
            Field::Impact => &mut self.impact,
        }
    }
}

fn collect_fields(block: &str) -> RawFields {
    let mut fields = RawFields::default();
    let mut current: Option<Field> = None;

    for line in block.lines() {
        if line.trim_start().starts_with("```") {
            continue;
        }

        match labelled_line(line) {
            Some((field, value)) => {
                current = Some(field);
                let slot = fields.slot(field);
                // A repeated label extends the first occurrence.
                match slot {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(value);
                    }
                    None => *slot = Some(value.to_string()),
                }
            }
            None => {
                if let Some(field) = current {
                    if let Some(existing) = fields.slot(field) {
                        existing.push('\n');
                        existing.push_str(line.trim());
                    }
                }
            }
        }
    }
    fields
}

/// Remove emphasis left around a value: balanced pairs on both ends, and a
/// dangling `**`/`__` whose partner the label pattern already consumed.
fn strip_emphasis(mut s: &str) -> &str {
    loop {
        let before = s;
        for marker in ["**", "__"] {
            let odd = s.matches(marker).count() % 2 == 1;
            if odd && s.ends_with(marker) {
                s = s[..s.len() - marker.len()].trim_end();
            } else if odd && s.starts_with(marker) {
                s = s[marker.len()..].trim_start();
            }
        }
        for marker in ["**", "__", "*", "_"] {
            if s.len() > 2 * marker.len() && s.starts_with(marker) && s.ends_with(marker) {
                s = s[marker.len()..s.len() - marker.len()].trim();
            }
        }
        if s == before {
            return s;
        }
    }
}

/// Trim, strip leftover emphasis markers and collapse blank runs.
fn clean_value(value: Option<String>) -> Option<String> {
    let value = value?;
    let lines: Vec<&str> = value.lines().map(str::trim).collect();
    let mut out = String::new();
    let mut blank = false;
    for line in lines {
        if line.is_empty() {
            blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank { "\n\n" } else { "\n" });
        }
        blank = false;
        out.push_str(line);
    }
    let out = strip_emphasis(out.trim()).to_string();
    (!out.is_empty()).then_some(out)
}

/// Category from the first keyword group mentioned in `text`.
fn infer_category(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| find_token(&lower, w).is_some()))
        .map_or(FALLBACK_CATEGORY, |(category, _)| *category)
}

fn parse_block(block: &str, known: &[KnownDocument<'_>]) -> Option<ConflictRecord> {
    let raw = collect_fields(block);
    let description = clean_value(raw.description)?;
    let (category, category_estimated) = match clean_value(raw.category) {
        Some(c) => (c, false),
        None => (infer_category(block).to_string(), true),
    };

    let (severity, severity_estimated) =
        match clean_value(raw.severity).and_then(|s| parse_severity(&s)) {
            Some(s) => (s, false),
            None => (Severity::Medium, true),
        };
    let (confidence, confidence_estimated) =
        match clean_value(raw.confidence).and_then(|c| parse_confidence(&c)) {
            Some(c) => (c, false),
            None => (DEFAULT_CONFIDENCE, true),
        };

    let documents_field = clean_value(raw.documents);
    let mut documents = documents_field
        .as_deref()
        .map(|d| find_references(d, known))
        .unwrap_or_default();
    if documents.is_empty() {
        documents = find_references(block, known);
    }

    Some(ConflictRecord {
        category,
        severity,
        confidence,
        description,
        documents,
        evidence: clean_value(raw.evidence),
        resolution: clean_value(raw.resolution),
        impact: clean_value(raw.impact),
        category_estimated,
        severity_estimated,
        confidence_estimated,
    })
}

/// First word decides: `high`/`critical`/`severe`/`major`, `medium`/`moderate`,
/// `low`/`minor`.
pub fn parse_severity(value: &str) -> Option<Severity> {
    let word = value
        .split(|c: char| !c.is_alphabetic())
        .find(|w| !w.is_empty())?
        .to_lowercase();
    match word.as_str() {
        "high" | "critical" | "severe" | "major" => Some(Severity::High),
        "medium" | "moderate" | "med" => Some(Severity::Medium),
        "low" | "minor" => Some(Severity::Low),
        _ => None,
    }
}

/// First number in `value`, as a 0–100 score: `85`, `85%`, `0.85` (×100),
/// `8.5/10` (scaled to the denominator). Negative values clamp to 0.
pub fn parse_confidence(value: &str) -> Option<u8> {
    let caps = RE_NUMBER.captures(value)?;
    let digits = caps.get(2)?.as_str();
    let mut n: f64 = digits.parse().ok()?;
    if caps.get(1).is_some() {
        return Some(0);
    }
    if let Some(scale) = caps.get(4).and_then(|d| d.as_str().parse::<f64>().ok()) {
        if scale > 0.0 {
            n = n / scale * 100.0;
        }
    } else if caps.get(3).is_none() && digits.contains('.') && n <= 1.0 {
        n *= 100.0;
    }
    Some(n.round().clamp(0.0, 100.0) as u8)
}

/// Documents mentioned in `text` (by id, file name or file stem), ordered by
/// first mention.
fn find_references(text: &str, known: &[KnownDocument<'_>]) -> Vec<DocumentId> {
    let lower = text.to_lowercase();
    let numbered: Vec<(usize, u64)> = RE_DOC_NUMBER
        .captures_iter(text)
        .filter_map(|c| {
            let start = c.get(0)?.start();
            let n = c.get(1)?.as_str().parse().ok()?;
            Some((start, n))
        })
        .collect();

    let mut hits: Vec<(usize, usize)> = Vec::new();
    for (idx, doc) in known.iter().enumerate() {
        let mut first: Option<usize> = None;
        let mut note = |pos: usize| first = Some(first.map_or(pos, |f| f.min(pos)));

        if let Some(n) = RE_SEQUENTIAL_ID
            .captures(doc.id.as_str())
            .and_then(|c| c[1].parse::<u64>().ok())
        {
            if let Some(&(pos, _)) = numbered.iter().find(|(_, m)| *m == n) {
                note(pos);
            }
        } else if let Some(pos) = find_token(&lower, &doc.id.as_str().to_lowercase()) {
            note(pos);
        }

        let filename = doc.filename.to_lowercase();
        if !filename.is_empty() {
            if let Some(pos) = lower.find(&filename) {
                note(pos);
            }
            let stem = filename.rsplit_once('.').map_or(filename.as_str(), |(s, _)| s);
            if let Some(pos) = find_token(&lower, stem) {
                note(pos);
            }
        }

        if let Some(pos) = first {
            hits.push((pos, idx));
        }
    }

    hits.sort();
    hits.into_iter().map(|(_, idx)| known[idx].id.clone()).collect()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

/// Position of `needle` in `hay` where it is not part of a longer word.
fn find_token(hay: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let mut from = 0;
    while let Some(off) = hay[from..].find(needle) {
        let start = from + off;
        let end = start + needle.len();
        let before_ok = hay[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !is_word_char(c));
        let after_ok = hay[end..].chars().next().map_or(true, |c| !is_word_char(c));
        if before_ok && after_ok {
            return Some(start);
        }
        from = start + needle.len().max(1);
    }
    None
}
