//! Report export: JSON, Markdown or plain text.

use crate::config::ExportFormat;
use crate::error::AnalysisError;
use crate::output::{AnalysisReport, ConflictRecord, ReportSummary};
use std::fmt::Write as _;

/// Render `report` in `format`.
pub fn export_report(
    report: &AnalysisReport,
    format: ExportFormat,
) -> Result<String, AnalysisError> {
    match format {
        ExportFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|e| AnalysisError::Internal(format!("JSON serialisation: {}", e))),
        ExportFormat::Markdown => Ok(render_markdown(report)),
        ExportFormat::Text => Ok(render_text(report)),
    }
}

fn doc_list(conflict: &ConflictRecord) -> String {
    if conflict.documents.is_empty() {
        "unspecified".to_string()
    } else {
        conflict
            .documents
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn estimate_note(conflict: &ConflictRecord) -> Option<String> {
    let missing: Vec<&str> = [
        ("category", conflict.category_estimated),
        ("severity", conflict.severity_estimated),
        ("confidence", conflict.confidence_estimated),
    ]
    .iter()
    .filter(|(_, estimated)| *estimated)
    .map(|(field, _)| *field)
    .collect();
    match missing.as_slice() {
        [] => None,
        [one] => Some(format!("{one} not stated by the model; default applied")),
        [rest @ .., last] => Some(format!(
            "{} and {last} not stated by the model; defaults applied",
            rest.join(", ")
        )),
    }
}

fn notes(report: &AnalysisReport) -> Vec<String> {
    let mut notes = Vec::new();
    if report.skipped_blocks > 0 {
        notes.push(format!(
            "{} malformed conflict block(s) in the model reply were skipped",
            report.skipped_blocks
        ));
    }
    if report.duplicates_removed > 0 {
        notes.push(format!(
            "{} near-duplicate conflict(s) were merged",
            report.duplicates_removed
        ));
    }
    if report.omitted_conflicts > 0 {
        notes.push(format!(
            "{} lower-ranked conflict(s) were omitted from this report",
            report.omitted_conflicts
        ));
    }
    for doc in report.documents.iter().filter(|d| d.truncated) {
        notes.push(format!(
            "{} ({}) was truncated before analysis",
            doc.id, doc.filename
        ));
    }
    notes
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|")
}

// ── Markdown ─────────────────────────────────────────────────────────────────

fn render_markdown(report: &AnalysisReport) -> String {
    let summary: ReportSummary = report.summary();
    let mut md = String::new();

    md.push_str("# Document Conflict Analysis Report\n\n");
    let _ = writeln!(md, "- **Report ID:** {}", report.id);
    let _ = writeln!(
        md,
        "- **Generated:** {}",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(md, "- **Mode:** {}", report.mode);
    let _ = writeln!(md, "- **Model:** {}", report.model);
    let _ = writeln!(md, "- **Documents analysed:** {}\n", report.documents.len());

    if !report.documents.is_empty() {
        md.push_str("## Documents\n\n| ID | File | Words | Truncated |\n|---|---|---|---|\n");
        for doc in &report.documents {
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} |",
                doc.id,
                escape_cell(&doc.filename),
                doc.word_count,
                if doc.truncated { "yes" } else { "no" }
            );
        }
        md.push('\n');
    }

    md.push_str("## Summary\n\n");
    let _ = writeln!(md, "- **Total conflicts:** {}", summary.total);
    let _ = writeln!(md, "- **Risk level:** {}", summary.risk_level.label());
    let _ = writeln!(
        md,
        "- **By severity:** {} high, {} medium, {} low",
        summary.by_severity.high, summary.by_severity.medium, summary.by_severity.low
    );
    if summary.total > 0 {
        let _ = writeln!(
            md,
            "- **Average confidence:** {:.0}%",
            summary.average_confidence
        );
    }
    md.push('\n');

    md.push_str("## Conflicts\n\n");
    if report.conflicts.is_empty() {
        md.push_str("No conflicts were found between the documents.\n\n");
    }
    for (i, c) in report.conflicts.iter().enumerate() {
        let _ = writeln!(
            md,
            "### {}. {} ({} severity, {}% confidence)\n",
            i + 1,
            c.category,
            c.severity.label(),
            c.confidence
        );
        let _ = writeln!(md, "**Documents:** {}\n", doc_list(c));
        let _ = writeln!(md, "{}\n", c.description);
        if let Some(ref e) = c.evidence {
            let _ = writeln!(md, "**Evidence:**\n");
            for line in e.lines() {
                let _ = writeln!(md, "> {}", line);
            }
            md.push('\n');
        }
        if let Some(ref r) = c.resolution {
            let _ = writeln!(md, "**Resolution:** {}\n", r);
        }
        if let Some(ref imp) = c.impact {
            let _ = writeln!(md, "**Impact:** {}\n", imp);
        }
        if let Some(note) = estimate_note(c) {
            let _ = writeln!(md, "_Note: {}._\n", note);
        }
    }

    md.push_str("## Recommendations\n\n");
    for (i, r) in summary.recommendations.iter().enumerate() {
        let _ = writeln!(md, "{}. {}", i + 1, r);
    }

    let notes = notes(report);
    if !notes.is_empty() {
        md.push_str("\n## Notes\n\n");
        for n in notes {
            let _ = writeln!(md, "- {}", n);
        }
    }
    md
}

// ── Plain text ───────────────────────────────────────────────────────────────

fn render_text(report: &AnalysisReport) -> String {
    let summary = report.summary();
    let rule = "=".repeat(60);
    let mut out = String::new();

    let _ = writeln!(out, "DOCUMENT CONFLICT ANALYSIS REPORT\n{}", rule);
    let _ = writeln!(out, "Report ID:  {}", report.id);
    let _ = writeln!(
        out,
        "Generated:  {}",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out, "Mode:       {}", report.mode);
    let _ = writeln!(out, "Model:      {}", report.model);
    for doc in &report.documents {
        let _ = writeln!(
            out,
            "Document:   {}  {} ({} words{})",
            doc.id,
            doc.filename,
            doc.word_count,
            if doc.truncated { ", truncated" } else { "" }
        );
    }

    let _ = writeln!(out, "\nSUMMARY\n{}", "-".repeat(60));
    let _ = writeln!(out, "Total conflicts:  {}", summary.total);
    let _ = writeln!(out, "Risk level:       {}", summary.risk_level.label());
    let _ = writeln!(
        out,
        "By severity:      {} high, {} medium, {} low",
        summary.by_severity.high, summary.by_severity.medium, summary.by_severity.low
    );

    let _ = writeln!(out, "\nCONFLICTS\n{}", "-".repeat(60));
    if report.conflicts.is_empty() {
        out.push_str("No conflicts were found between the documents.\n");
    }
    for (i, c) in report.conflicts.iter().enumerate() {
        let _ = writeln!(
            out,
            "\n[{}] {} | {} | {}% confidence",
            i + 1,
            c.category,
            c.severity.label().to_uppercase(),
            c.confidence
        );
        let _ = writeln!(out, "    Documents:   {}", doc_list(c));
        let _ = writeln!(out, "    Description: {}", indent(&c.description));
        if let Some(ref e) = c.evidence {
            let _ = writeln!(out, "    Evidence:    {}", indent(e));
        }
        if let Some(ref r) = c.resolution {
            let _ = writeln!(out, "    Resolution:  {}", indent(r));
        }
        if let Some(ref imp) = c.impact {
            let _ = writeln!(out, "    Impact:      {}", indent(imp));
        }
        if let Some(note) = estimate_note(c) {
            let _ = writeln!(out, "    Note:        {}", note);
        }
    }

    let _ = writeln!(out, "\nRECOMMENDATIONS\n{}", "-".repeat(60));
    for (i, r) in summary.recommendations.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, r);
    }

    let notes = notes(report);
    if !notes.is_empty() {
        let _ = writeln!(out, "\nNOTES\n{}", "-".repeat(60));
        for n in notes {
            let _ = writeln!(out, "* {}", n);
        }
    }
    out
}

/// Continuation lines aligned under the value column.
fn indent(s: &str) -> String {
    s.replace('\n', "\n                 ")
}
