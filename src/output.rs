//! Analysis results: conflict records, reports and derived summaries.

use crate::config::AnalysisMode;
use crate::document::DocumentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub use crate::pipeline::completion::CompletionStats;

/// Conflict severity. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One contradiction reported by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Free-text tag such as `Temporal` or `Policy contradiction`.
    pub category: String,
    pub severity: Severity,
    /// 0–100.
    pub confidence: u8,
    pub description: String,
    /// Documents the conflict involves, in first-mention order.
    pub documents: Vec<DocumentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    /// Category was missing and inferred from keywords.
    #[serde(default)]
    pub category_estimated: bool,
    /// Severity was missing or unrecognised and defaulted to medium.
    #[serde(default)]
    pub severity_estimated: bool,
    /// Confidence was missing or unparsable and defaulted to 50.
    #[serde(default)]
    pub confidence_estimated: bool,
}

/// What a report says about one input document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub filename: String,
    pub word_count: usize,
    pub truncated: bool,
}

/// Final, ordered result of one analysis request.
///
/// `conflicts` is ordered by severity (high first), ties broken by
/// descending confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub id: Uuid,
    /// Id of the [`crate::session::AnalysisRequest`] that produced this report.
    pub request_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub mode: AnalysisMode,
    pub model: String,
    pub documents: Vec<DocumentSummary>,
    pub conflicts: Vec<ConflictRecord>,
    /// Malformed blocks the parser skipped.
    pub skipped_blocks: usize,
    /// Near-duplicate conflicts merged away.
    pub duplicates_removed: usize,
    /// Conflicts dropped by the `max_conflicts` cap.
    pub omitted_conflicts: usize,
    /// The model explicitly answered that there are no conflicts.
    pub no_conflicts_declared: bool,
    pub stats: CompletionStats,
}

impl AnalysisReport {
    pub fn summary(&self) -> ReportSummary {
        ReportSummary::from_conflicts(&self.conflicts)
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Overall risk derived from severity counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Critical with ≥3 high; high with ≥1 high or ≥5 medium; medium with ≥3
    /// conflicts in total; low otherwise.
    pub fn assess(counts: &SeverityCounts) -> Self {
        if counts.high >= 3 {
            RiskLevel::Critical
        } else if counts.high >= 1 || counts.medium >= 5 {
            RiskLevel::High
        } else if counts.total() >= 3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

/// Aggregate view of a report, computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub by_severity: SeverityCounts,
    pub by_category: BTreeMap<String, usize>,
    /// Mean confidence, 0.0 when there are no conflicts.
    pub average_confidence: f64,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
}

const MAX_RECOMMENDATIONS: usize = 8;

impl ReportSummary {
    pub fn from_conflicts(conflicts: &[ConflictRecord]) -> Self {
        let mut by_severity = SeverityCounts::default();
        let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
        for c in conflicts {
            match c.severity {
                Severity::High => by_severity.high += 1,
                Severity::Medium => by_severity.medium += 1,
                Severity::Low => by_severity.low += 1,
            }
            *by_category.entry(c.category.clone()).or_default() += 1;
        }

        let average_confidence = if conflicts.is_empty() {
            0.0
        } else {
            conflicts.iter().map(|c| c.confidence as f64).sum::<f64>() / conflicts.len() as f64
        };

        let risk_level = RiskLevel::assess(&by_severity);
        let recommendations = recommendations(&by_severity, &by_category);

        Self {
            total: conflicts.len(),
            by_severity,
            by_category,
            average_confidence,
            risk_level,
            recommendations,
        }
    }
}

fn recommendations(counts: &SeverityCounts, by_category: &BTreeMap<String, usize>) -> Vec<String> {
    if counts.total() == 0 {
        return vec![
            "No conflicts detected; the documents appear consistent".to_string(),
            "Re-run the analysis whenever one of the documents changes".to_string(),
        ];
    }

    let mut out = Vec::new();
    if counts.high > 0 {
        out.push(format!(
            "URGENT: Address {} high-severity conflict(s) immediately",
            counts.high
        ));
    }
    if counts.medium > 3 {
        out.push(format!(
            "IMPORTANT: Schedule resolution of {} medium-priority conflicts",
            counts.medium
        ));
    }
    // First category wins a tie (BTreeMap order).
    let most_common = by_category
        .iter()
        .fold(None::<(&String, usize)>, |best, (cat, &n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((cat, n)),
        });
    if let Some((category, n)) = most_common {
        out.push(format!(
            "Focus on {} issues: most frequent conflict type ({} instance{})",
            category,
            n,
            if n == 1 { "" } else { "s" }
        ));
    }
    out.extend(
        [
            "Create a master document to serve as the authoritative source",
            "Form a cross-functional team to review and resolve conflicts",
            "Implement regular document consistency audits",
            "Establish a change management process for document updates",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    out.truncate(MAX_RECOMMENDATIONS);
    out
}
