//! Text extraction: turn an uploaded PDF, DOCX or text file into plain text.
//!
//! Extraction is a pure function of the bytes and the declared type. The
//! declared type is either a MIME type or an extension; when it is empty or
//! the generic `application/octet-stream`, the file name's extension decides.
//!
//! Magic bytes are checked before any parser runs so that a mislabelled
//! upload produces a readable error instead of a parser failure deep inside a
//! third-party crate.
//!
//! The PDF parser can panic on malformed cross-reference tables, so it runs
//! under `catch_unwind` and a panic becomes [`AnalysisError::ExtractionFailed`].

use crate::document::{DocumentFormat, ExtractedText};
use crate::error::AnalysisError;
use crate::pipeline::normalise::normalise_text;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::io::{Cursor, Read};
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

/// Size and length limits applied during extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractLimits {
    /// Maximum characters kept after normalisation.
    pub max_chars: usize,
    /// Maximum accepted upload size in bytes.
    pub max_bytes: usize,
}

impl From<&crate::config::AnalysisConfig> for ExtractLimits {
    fn from(config: &crate::config::AnalysisConfig) -> Self {
        Self {
            max_chars: config.max_document_chars,
            max_bytes: config.max_upload_bytes,
        }
    }
}

/// Resolve the document format from the declared type, falling back to the
/// file name when the declared type carries no information.
pub fn resolve_format(filename: &str, declared: &str) -> Result<DocumentFormat, AnalysisError> {
    let declared = declared.trim();
    let generic = declared.is_empty() || declared.eq_ignore_ascii_case("application/octet-stream");
    let format = if generic {
        DocumentFormat::from_filename(filename)
    } else {
        DocumentFormat::from_declared(declared)
    };
    format.ok_or_else(|| AnalysisError::UnsupportedFormat {
        filename: filename.to_string(),
        declared: if generic {
            filename.rsplit('.').next().unwrap_or(filename).to_string()
        } else {
            declared.to_string()
        },
    })
}

/// Extract, normalise and cap the text of one upload.
pub fn extract_text(
    filename: &str,
    declared: &str,
    bytes: &[u8],
    limits: ExtractLimits,
) -> Result<(DocumentFormat, ExtractedText), AnalysisError> {
    let format = resolve_format(filename, declared)?;

    if bytes.len() > limits.max_bytes {
        return Err(AnalysisError::DocumentTooLarge {
            filename: filename.to_string(),
            size: bytes.len(),
            limit: limits.max_bytes,
        });
    }
    if bytes.is_empty() {
        return Err(failed(filename, "file is empty"));
    }

    let raw = match format {
        DocumentFormat::Txt => decode_plain_text(bytes),
        DocumentFormat::Pdf => {
            check_magic(filename, bytes, b"%PDF", "PDF")?;
            extract_pdf(filename, bytes)?
        }
        DocumentFormat::Docx => {
            check_magic(filename, bytes, b"PK", "DOCX (ZIP)")?;
            extract_docx(filename, bytes)?
        }
    };

    let text = normalise_text(&raw);
    if text.is_empty() {
        return Err(failed(
            filename,
            "no extractable text (empty or image-only document)",
        ));
    }

    let extracted = ExtractedText::capped(text, limits.max_chars);
    debug!(
        "Extracted {} chars from '{}' ({}){}",
        extracted.original_chars,
        filename,
        format,
        if extracted.truncated { ", truncated" } else { "" }
    );
    Ok((format, extracted))
}

/// Run [`extract_text`] on the blocking thread pool.
pub async fn extract_text_blocking(
    filename: String,
    declared: String,
    bytes: Vec<u8>,
    limits: ExtractLimits,
) -> Result<(DocumentFormat, ExtractedText, Vec<u8>), AnalysisError> {
    tokio::task::spawn_blocking(move || {
        extract_text(&filename, &declared, &bytes, limits).map(|(f, t)| (f, t, bytes))
    })
    .await
    .map_err(|e| AnalysisError::Internal(format!("Extraction task panicked: {}", e)))?
}

fn failed(filename: &str, reason: impl Into<String>) -> AnalysisError {
    AnalysisError::ExtractionFailed {
        filename: filename.to_string(),
        reason: reason.into(),
    }
}

fn check_magic(
    filename: &str,
    bytes: &[u8],
    magic: &[u8],
    kind: &str,
) -> Result<(), AnalysisError> {
    if bytes.starts_with(magic) {
        return Ok(());
    }
    let head: Vec<u8> = bytes.iter().take(4).copied().collect();
    Err(failed(
        filename,
        format!("not a {} file (starts with {:02x?})", kind, head),
    ))
}

// ── Plain text ───────────────────────────────────────────────────────────────

/// UTF-8 with an optional BOM; anything else is read as Latin-1.
fn decode_plain_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

// ── PDF ──────────────────────────────────────────────────────────────────────

fn extract_pdf(filename: &str, bytes: &[u8]) -> Result<String, AnalysisError> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(bytes)
    }));

    match result {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => {
            let msg = e.to_string();
            let lower = msg.to_lowercase();
            if lower.contains("encrypt") || lower.contains("password") {
                Err(failed(filename, "document is encrypted"))
            } else {
                Err(failed(filename, format!("corrupt PDF: {}", msg)))
            }
        }
        Err(_) => Err(failed(filename, "PDF parser crashed on malformed input")),
    }
}

// ── DOCX ─────────────────────────────────────────────────────────────────────

static RE_DOCX_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|</w:p>|<w:tab\s*/>|<w:(?:br|cr)(?:\s[^>]*)?/>")
        .unwrap()
});

static RE_XML_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").unwrap());

fn extract_docx(filename: &str, bytes: &[u8]) -> Result<String, AnalysisError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| failed(filename, format!("corrupt DOCX container: {}", e)))?;

    let mut xml = String::new();
    {
        let mut entry = archive
            .by_name("word/document.xml")
            .map_err(|_| failed(filename, "DOCX has no word/document.xml"))?;
        if entry.encrypted() {
            return Err(failed(filename, "document is encrypted"));
        }
        entry
            .read_to_string(&mut xml)
            .map_err(|e| failed(filename, format!("unreadable document.xml: {}", e)))?;
    }

    Ok(docx_xml_to_text(&xml))
}

/// Flatten WordprocessingML body XML to text.
pub(crate) fn docx_xml_to_text(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len() / 4);
    for caps in RE_DOCX_TOKEN.captures_iter(xml) {
        if let Some(run) = caps.get(1) {
            out.push_str(&unescape_xml(run.as_str()));
            continue;
        }
        let token = caps.get(0).map(|m| m.as_str()).unwrap_or("");
        if token == "</w:p>" {
            out.push('\n');
        } else if token.starts_with("<w:tab") {
            out.push('\t');
        } else {
            out.push('\n');
        }
    }
    out
}

fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    RE_XML_ENTITY
        .replace_all(s, |caps: &Captures| {
            let name = &caps[1];
            let decoded = match name {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ if name.starts_with("#x") => u32::from_str_radix(&name[2..], 16)
                    .ok()
                    .and_then(char::from_u32),
                _ if name.starts_with('#') => name[1..].parse().ok().and_then(char::from_u32),
                _ => None,
            };
            decoded
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ExtractLimits {
        ExtractLimits {
            max_chars: 1_000,
            max_bytes: 10_000,
        }
    }

    #[test]
    fn txt_is_normalised() {
        let (format, text) =
            extract_text("notes.txt", "text/plain", b"  The deadline is 5 PM.  \r\n", limits())
                .unwrap();
        assert_eq!(format, DocumentFormat::Txt);
        assert_eq!(text.text, "The deadline is 5 PM.");
        assert!(!text.truncated);
    }

    #[test]
    fn txt_strips_bom_and_falls_back_to_latin1() {
        assert_eq!(decode_plain_text(b"\xEF\xBB\xBFhello"), "hello");
        assert_eq!(decode_plain_text(b"caf\xE9"), "café");
    }

    #[test]
    fn declared_type_falls_back_to_filename() {
        assert_eq!(
            resolve_format("brief.md", "application/octet-stream").unwrap(),
            DocumentFormat::Txt
        );
        assert_eq!(resolve_format("brief.pdf", "").unwrap(), DocumentFormat::Pdf);
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let err = extract_text("sheet.xlsx", "", b"PK\x03\x04", limits()).unwrap_err();
        assert!(matches!(err, AnalysisError::UnsupportedFormat { .. }));
        let err = extract_text("x.png", "image/png", b"\x89PNG", limits()).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::UnsupportedFormat { declared, .. } if declared == "image/png"
        ));
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let bytes = vec![b'a'; 11];
        let err = extract_text(
            "big.txt",
            "txt",
            &bytes,
            ExtractLimits {
                max_chars: 100,
                max_bytes: 10,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::DocumentTooLarge { size: 11, limit: 10, .. }));
    }

    #[test]
    fn long_text_is_truncated_not_silently_cut() {
        let body = "word ".repeat(100);
        let (_, text) = extract_text(
            "long.txt",
            "txt",
            body.as_bytes(),
            ExtractLimits {
                max_chars: 50,
                max_bytes: 10_000,
            },
        )
        .unwrap();
        assert!(text.truncated);
        assert_eq!(text.text.chars().count(), 50);
        assert_eq!(text.original_chars, body.trim().chars().count());
    }

    #[test]
    fn whitespace_only_text_fails() {
        let err = extract_text("blank.txt", "txt", b" \n\n\t ", limits()).unwrap_err();
        assert!(matches!(err, AnalysisError::ExtractionFailed { .. }));
    }

    #[test]
    fn pdf_magic_is_checked() {
        let err =
            extract_text("fake.pdf", "application/pdf", b"hello world", limits()).unwrap_err();
        match err {
            AnalysisError::ExtractionFailed { reason, .. } => assert!(reason.contains("not a PDF")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn corrupt_pdf_fails_cleanly() {
        let err = extract_text("broken.pdf", "pdf", b"%PDF-1.4\ngarbage", limits()).unwrap_err();
        assert!(matches!(err, AnalysisError::ExtractionFailed { .. }));
    }

    #[test]
    fn docx_magic_is_checked() {
        let err = extract_text("fake.docx", "docx", b"not a zip", limits()).unwrap_err();
        assert!(matches!(err, AnalysisError::ExtractionFailed { .. }));
    }

    #[test]
    fn corrupt_docx_container_fails() {
        let err = extract_text("broken.docx", "docx", b"PK\x03\x04junk", limits()).unwrap_err();
        assert!(matches!(err, AnalysisError::ExtractionFailed { .. }));
    }

    #[test]
    fn docx_xml_runs_paragraphs_and_entities() {
        let xml = r#"<w:document><w:body>
            <w:p><w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/></w:tabs></w:pPr>
              <w:r><w:t>Deadline:</w:t></w:r><w:r><w:tab/><w:t xml:space="preserve"> 5 PM &amp; not later</w:t></w:r></w:p>
            <w:p><w:r><w:t>Line one</w:t><w:br/><w:t>&lt;two&gt; &#233;</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let text = docx_xml_to_text(xml);
        assert_eq!(text, "Deadline:\t 5 PM & not later\nLine one\n<two> é\n");
    }

    #[test]
    fn unknown_entities_are_kept() {
        assert_eq!(unescape_xml("a &nbsp; b"), "a &nbsp; b");
        assert_eq!(unescape_xml("&#x41;&#66;"), "AB");
    }

    #[tokio::test]
    async fn blocking_wrapper_returns_bytes() {
        let (format, text, bytes) = extract_text_blocking(
            "a.txt".into(),
            "".into(),
            b"hello".to_vec(),
            limits(),
        )
        .await
        .unwrap();
        assert_eq!(format, DocumentFormat::Txt);
        assert_eq!(text.text, "hello");
        assert_eq!(bytes, b"hello");
    }
}
