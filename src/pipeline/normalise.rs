//! Normalisation: deterministic cleanup of extracted document text.
//!
//! PDF and DOCX extraction leave behind layout artefacts (hard-wrapped runs
//! of spaces, form feeds, zero-width joiners, Windows line endings) that
//! inflate the prompt without carrying meaning. The rules below remove them
//! without rewording anything.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so that later rules only ever see `\n`.
//! Invisible characters go before control characters so a stray BOM between
//! two spaces still lets the whitespace collapse.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all normalisation rules to extracted text.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, …)
/// 3. Drop control characters other than `\n` and `\t`
/// 4. Collapse runs of horizontal whitespace to a single space
/// 5. Trim each line
/// 6. Collapse 3+ consecutive blank lines down to one blank line
/// 7. Trim the whole text
pub fn normalise_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = drop_control_chars(&s);
    let s = collapse_horizontal_whitespace(&s);
    let s = trim_lines(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip invisible Unicode ──────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}' // zero-width space
                    | '\u{200C}' // zero-width non-joiner
                    | '\u{200D}' // zero-width joiner
                    | '\u{2060}' // word joiner
                    | '\u{FEFF}' // BOM
                    | '\u{00AD}' // soft hyphen
            )
        })
        .collect()
}

// ── Rule 3: Drop control characters ──────────────────────────────────────────

fn drop_control_chars(input: &str) -> String {
    input
        .chars()
        .map(|c| if c == '\u{000C}' || c == '\u{000B}' { '\n' } else { c })
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

// ── Rule 4: Collapse horizontal whitespace ───────────────────────────────────

static RE_HSPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\u{00A0}\u{3000}]{2,}|\u{00A0}").unwrap());

fn collapse_horizontal_whitespace(input: &str) -> String {
    RE_HSPACE.replace_all(input, " ").to_string()
}

// ── Rule 5: Trim each line ───────────────────────────────────────────────────

fn trim_lines(input: &str) -> String {
    input.lines().map(str::trim).collect::<Vec<_>>().join("\n")
}

// ── Rule 6: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_invisible_chars() {
        assert_eq!(
            remove_invisible_chars("dead\u{200B}line\u{FEFF} is\u{00AD}"),
            "deadline is"
        );
    }

    #[test]
    fn test_control_chars() {
        assert_eq!(drop_control_chars("a\u{0007}b\tc\nd"), "ab\tc\nd");
        assert_eq!(drop_control_chars("page1\u{000C}page2"), "page1\npage2");
    }

    #[test]
    fn test_horizontal_whitespace() {
        assert_eq!(
            collapse_horizontal_whitespace("due   by\t\t5 PM\u{00A0}today"),
            "due by 5 PM today"
        );
        assert_eq!(collapse_horizontal_whitespace("keep\tsingle tab"), "keep\tsingle tab");
    }

    #[test]
    fn test_trim_lines() {
        assert_eq!(trim_lines("  a  \n\tb\t"), "a\nb");
    }

    #[test]
    fn test_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_full_pipeline() {
        let input = "\u{FEFF}  Section 1  \r\n\r\n\r\n\r\nThe   deadline is 5 PM.  \r\n";
        assert_eq!(normalise_text(input), "Section 1\n\nThe deadline is 5 PM.");
    }

    #[test]
    fn test_whitespace_only_becomes_empty() {
        assert_eq!(normalise_text(" \n\t\r\n\u{200B} "), "");
    }
}
