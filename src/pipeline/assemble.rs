//! Report assembly: deduplicate, order and cap parsed conflicts.
//!
//! Two records are near-duplicates when they share a category (case-
//! insensitive), reference the same set of documents and their descriptions
//! have a Sørensen–Dice similarity over character bigrams at or above the
//! configured threshold. The higher-confidence record survives; on a tie the
//! earlier one does.
//!
//! Ordering is a stable sort by severity (high first), then confidence
//! (descending), so records that compare equal keep the model's order.

use crate::config::{AnalysisConfig, AnalysisMode};
use crate::document::DocumentId;
use crate::output::{AnalysisReport, CompletionStats, ConflictRecord, DocumentSummary};
use crate::pipeline::parse::ParsedResponse;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;
use uuid::Uuid;

/// Request metadata carried into the report.
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub request_id: Uuid,
    pub mode: AnalysisMode,
    pub documents: Vec<DocumentSummary>,
    pub stats: CompletionStats,
}

/// Assembly settings taken from [`AnalysisConfig`].
#[derive(Debug, Clone, Copy)]
pub struct AssembleOptions {
    pub similarity_threshold: f64,
    pub max_conflicts: Option<usize>,
}

impl From<&AnalysisConfig> for AssembleOptions {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            max_conflicts: config.max_conflicts,
        }
    }
}

/// Build the final report from parsed records.
pub fn assemble_report(
    parsed: ParsedResponse,
    context: ReportContext,
    options: AssembleOptions,
) -> AnalysisReport {
    let before = parsed.conflicts.len();
    let mut conflicts = deduplicate(parsed.conflicts, options.similarity_threshold);
    let duplicates_removed = before - conflicts.len();

    sort_conflicts(&mut conflicts);

    let mut omitted_conflicts = 0;
    if let Some(max) = options.max_conflicts {
        if conflicts.len() > max {
            omitted_conflicts = conflicts.len() - max;
            conflicts.truncate(max);
        }
    }

    debug!(
        "Assembled report: {} conflict(s), {} duplicate(s) removed, {} omitted",
        conflicts.len(),
        duplicates_removed,
        omitted_conflicts
    );

    AnalysisReport {
        id: Uuid::new_v4(),
        request_id: context.request_id,
        generated_at: Utc::now(),
        mode: context.mode,
        model: context.stats.model.clone(),
        documents: context.documents,
        conflicts,
        skipped_blocks: parsed.skipped_blocks,
        duplicates_removed,
        omitted_conflicts,
        no_conflicts_declared: parsed.no_conflicts_declared,
        stats: context.stats,
    }
}

/// Stable sort: severity descending, then confidence descending.
pub fn sort_conflicts(conflicts: &mut [ConflictRecord]) {
    conflicts.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.confidence.cmp(&a.confidence))
    });
}

/// Drop near-duplicates, keeping the higher-confidence record in the
/// position of the first one seen.
///
/// A later record is compared against every description merged into a kept
/// slot, not only the surviving one, so the outcome does not depend on which
/// duplicate happened to win.
pub fn deduplicate(records: Vec<ConflictRecord>, threshold: f64) -> Vec<ConflictRecord> {
    let mut kept: Vec<(ConflictRecord, Vec<String>)> = Vec::with_capacity(records.len());
    for record in records {
        let slot = kept.iter().position(|(k, seen)| {
            seen.iter().any(|description| is_duplicate(k, description, &record, threshold))
        });
        match slot {
            Some(i) => {
                let (current, seen) = &mut kept[i];
                seen.push(record.description.clone());
                if record.confidence > current.confidence {
                    *current = record;
                }
            }
            None => {
                let seen = vec![record.description.clone()];
                kept.push((record, seen));
            }
        }
    }
    kept.into_iter().map(|(record, _)| record).collect()
}

fn document_set(ids: &[DocumentId]) -> BTreeSet<&DocumentId> {
    ids.iter().collect()
}

fn is_duplicate(
    kept: &ConflictRecord,
    kept_description: &str,
    candidate: &ConflictRecord,
    threshold: f64,
) -> bool {
    kept.category.trim().eq_ignore_ascii_case(candidate.category.trim())
        && document_set(&kept.documents) == document_set(&candidate.documents)
        && dice_similarity(kept_description, &candidate.description) >= threshold
}

fn normalise_for_similarity(s: &str) -> Vec<char> {
    let lowered = s.to_lowercase();
    let mut out = Vec::with_capacity(lowered.len());
    let mut last_space = true;
    for c in lowered.chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    if out.last() == Some(&' ') {
        out.pop();
    }
    out
}

/// Sørensen–Dice coefficient over character bigrams (multiset), case- and
/// whitespace-insensitive. Returns a value in `0.0..=1.0`.
pub fn dice_similarity(a: &str, b: &str) -> f64 {
    let a = normalise_for_similarity(a);
    let b = normalise_for_similarity(b);
    if a == b {
        return 1.0;
    }
    if a.len() < 2 || b.len() < 2 {
        return 0.0;
    }

    let mut counts: HashMap<(char, char), usize> = HashMap::new();
    for w in a.windows(2) {
        *counts.entry((w[0], w[1])).or_default() += 1;
    }
    let mut shared = 0usize;
    for w in b.windows(2) {
        if let Some(n) = counts.get_mut(&(w[0], w[1])) {
            if *n > 0 {
                *n -= 1;
                shared += 1;
            }
        }
    }
    let total = (a.len() - 1) + (b.len() - 1);
    (2 * shared) as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Severity;

    fn record(
        category: &str,
        severity: Severity,
        confidence: u8,
        description: &str,
    ) -> ConflictRecord {
        ConflictRecord {
            category: category.into(),
            severity,
            confidence,
            description: description.into(),
            documents: vec![DocumentId::sequential(1), DocumentId::sequential(2)],
            evidence: None,
            resolution: None,
            impact: None,
            category_estimated: false,
            severity_estimated: false,
            confidence_estimated: false,
        }
    }

    fn context() -> ReportContext {
        ReportContext {
            request_id: Uuid::new_v4(),
            mode: AnalysisMode::Comprehensive,
            documents: vec![],
            stats: CompletionStats {
                model: "m".into(),
                ..Default::default()
            },
        }
    }

    fn options() -> AssembleOptions {
        AssembleOptions {
            similarity_threshold: 0.85,
            max_conflicts: None,
        }
    }

    fn parsed(conflicts: Vec<ConflictRecord>) -> ParsedResponse {
        ParsedResponse {
            conflicts,
            skipped_blocks: 0,
            no_conflicts_declared: false,
        }
    }

    #[test]
    fn dice_bounds() {
        assert_eq!(dice_similarity("night", "night"), 1.0);
        assert_eq!(dice_similarity("Night  ", "night"), 1.0);
        assert_eq!(dice_similarity("ab", "cd"), 0.0);
        // "night" / "nacht": bigrams share only "ht".
        assert!((dice_similarity("night", "nacht") - 0.25).abs() < 1e-9);
    }

    #[test]
    fn ordering_invariant_holds() {
        let report = assemble_report(
            parsed(vec![
                record("A", Severity::Low, 99, "one"),
                record("B", Severity::High, 40, "two"),
                record("C", Severity::Medium, 80, "three"),
                record("D", Severity::High, 90, "four"),
                record("E", Severity::Medium, 95, "five"),
            ]),
            context(),
            options(),
        );
        let order: Vec<&str> = report.conflicts.iter().map(|c| c.category.as_str()).collect();
        assert_eq!(order, vec!["D", "B", "E", "C", "A"]);
        for pair in report.conflicts.windows(2) {
            assert!(pair[0].severity >= pair[1].severity);
            if pair[0].severity == pair[1].severity {
                assert!(pair[0].confidence >= pair[1].confidence);
            }
        }
    }

    #[test]
    fn sort_is_stable_for_ties() {
        let mut v = vec![
            record("first", Severity::Medium, 70, "x"),
            record("second", Severity::Medium, 70, "y"),
        ];
        sort_conflicts(&mut v);
        assert_eq!(v[0].category, "first");
    }

    #[test]
    fn dedup_keeps_higher_confidence() {
        let report = assemble_report(
            parsed(vec![
                record(
                    "Temporal",
                    Severity::High,
                    70,
                    "Deadline is 5 PM in DOC-1 but 11:59 PM in DOC-2.",
                ),
                record(
                    "temporal",
                    Severity::High,
                    90,
                    "Deadline is 5 PM in DOC-1 but 11:59 PM in DOC-2!",
                ),
            ]),
            context(),
            options(),
        );
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].confidence, 90);
        assert_eq!(report.duplicates_removed, 1);
    }

    #[test]
    fn different_documents_are_not_duplicates() {
        let a = record("Temporal", Severity::High, 70, "same words");
        let mut b = a.clone();
        b.documents = vec![DocumentId::sequential(1), DocumentId::sequential(3)];
        assert_eq!(deduplicate(vec![a, b], 0.85).len(), 2);
    }

    #[test]
    fn document_order_does_not_matter() {
        let a = record("Temporal", Severity::High, 70, "same words");
        let mut b = a.clone();
        b.documents.reverse();
        assert_eq!(deduplicate(vec![a, b], 0.85).len(), 1);
    }

    #[test]
    fn dedup_does_not_depend_on_which_duplicate_won() {
        // "abcxyz" matches "abcdef" (0.4) and wins on confidence; "zbcdef"
        // only matches the first description (0.8 against 0.2).
        let records = vec![
            record("Policy", Severity::Low, 50, "abcdef"),
            record("Policy", Severity::Low, 90, "abcxyz"),
            record("Policy", Severity::Low, 10, "zbcdef"),
        ];
        let kept = deduplicate(records, 0.4);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 90);
        assert_eq!(kept[0].description, "abcxyz");
    }

    #[test]
    fn dissimilar_descriptions_survive() {
        let a = record("Policy", Severity::Low, 60, "Remote work requires manager approval");
        let b = record("Policy", Severity::Low, 60, "Expense claims must be filed within 30 days");
        assert_eq!(deduplicate(vec![a, b], 0.85).len(), 2);
    }

    #[test]
    fn cap_records_omitted_count() {
        let report = assemble_report(
            parsed(vec![
                record("A", Severity::Low, 10, "a"),
                record("B", Severity::High, 10, "b"),
                record("C", Severity::Medium, 10, "c"),
            ]),
            context(),
            AssembleOptions {
                similarity_threshold: 0.85,
                max_conflicts: Some(2),
            },
        );
        assert_eq!(report.conflicts.len(), 2);
        assert_eq!(report.omitted_conflicts, 1);
        assert_eq!(report.conflicts[0].category, "B");
    }

    #[test]
    fn report_carries_context() {
        let ctx = context();
        let request_id = ctx.request_id;
        let report = assemble_report(
            ParsedResponse {
                conflicts: vec![],
                skipped_blocks: 0,
                no_conflicts_declared: true,
            },
            ctx,
            options(),
        );
        assert_eq!(report.request_id, request_id);
        assert_eq!(report.model, "m");
        assert!(report.no_conflicts_declared);
        assert!(!report.has_conflicts());
    }
}
