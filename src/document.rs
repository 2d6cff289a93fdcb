//! Uploaded documents and their extracted text.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Session-scoped identifier of an uploaded document (`DOC-1`, `DOC-2`, …).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Sequential id for the `n`-th document (1-indexed).
    pub fn sequential(n: usize) -> Self {
        Self(format!("DOC-{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Txt,
}

impl DocumentFormat {
    /// Resolve from a bare extension (`pdf`, `.DOCX`, `md`).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            "txt" | "text" | "md" | "markdown" => Some(DocumentFormat::Txt),
            _ => None,
        }
    }

    /// Resolve from a MIME type, ignoring parameters such as `charset`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" => Some(DocumentFormat::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(DocumentFormat::Docx)
            }
            "text/plain" | "text/markdown" => Some(DocumentFormat::Txt),
            _ => None,
        }
    }

    /// Resolve from a file name's extension.
    pub fn from_filename(filename: &str) -> Option<Self> {
        Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Resolve a declared type that may be either a MIME type or an extension.
    pub fn from_declared(declared: &str) -> Option<Self> {
        if declared.contains('/') {
            Self::from_mime(declared)
        } else {
            Self::from_extension(declared)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Txt => "txt",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text produced by the extractor, possibly capped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedText {
    /// Normalised text, at most `max_document_chars` characters.
    pub text: String,

    /// True when the normalised text was longer than the cap.
    pub truncated: bool,

    /// Character count before truncation.
    pub original_chars: usize,
}

impl ExtractedText {
    /// Cap `text` to `max_chars` characters on a character boundary.
    pub fn capped(text: String, max_chars: usize) -> Self {
        let original_chars = text.chars().count();
        if original_chars <= max_chars {
            return Self {
                text,
                truncated: false,
                original_chars,
            };
        }
        let cut = text
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        let mut text = text;
        text.truncate(cut);
        Self {
            text,
            truncated: true,
            original_chars,
        }
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Outcome of extraction for a document held by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionStatus {
    Extracted,
    Truncated { original_chars: usize },
}

/// An uploaded document whose text has been extracted.
///
/// Immutable once created; owned by the [`crate::session::Session`] that
/// accepted the upload.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub filename: String,
    pub format: DocumentFormat,
    pub raw: Vec<u8>,
    pub extracted: ExtractedText,
    pub status: ExtractionStatus,
    pub word_count: usize,
    pub char_count: usize,
    /// Hex SHA-256 of the extracted text.
    pub content_hash: String,
}

impl Document {
    pub fn new(
        id: DocumentId,
        filename: impl Into<String>,
        format: DocumentFormat,
        raw: Vec<u8>,
        extracted: ExtractedText,
    ) -> Self {
        let status = if extracted.truncated {
            ExtractionStatus::Truncated {
                original_chars: extracted.original_chars,
            }
        } else {
            ExtractionStatus::Extracted
        };
        let content_hash = hex::encode(Sha256::digest(extracted.text.as_bytes()));
        Self {
            id,
            filename: filename.into(),
            format,
            word_count: extracted.word_count(),
            char_count: extracted.char_count(),
            raw,
            extracted,
            status,
            content_hash,
        }
    }

    pub fn text(&self) -> &str {
        &self.extracted.text
    }

    pub fn is_truncated(&self) -> bool {
        self.extracted.truncated
    }
}
