//! Sessions own uploaded documents and mint analysis requests.
//!
//! A [`Session`] replaces ambient UI state: it holds the documents a user has
//! uploaded, assigns their ids, and validates every [`AnalysisRequest`]
//! against what it holds. Dropping the session discards the documents.

use crate::config::{AnalysisConfig, AnalysisMode};
use crate::document::{Document, DocumentFormat, DocumentId};
use crate::error::AnalysisError;
use crate::pipeline::extract::{self, ExtractLimits};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// One analysis invocation over a set of session documents. Read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub id: Uuid,
    pub document_ids: Vec<DocumentId>,
    pub mode: AnalysisMode,
    pub created_at: DateTime<Utc>,
}

/// Documents uploaded by one user.
#[derive(Debug)]
pub struct Session {
    documents: Vec<Document>,
    next_seq: usize,
    limits: ExtractLimits,
    max_documents: usize,
    default_mode: AnalysisMode,
}

impl Session {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            documents: Vec::new(),
            next_seq: 1,
            limits: ExtractLimits::from(config),
            max_documents: config.max_documents,
            default_mode: config.default_mode,
        }
    }

    fn next_id(&mut self) -> DocumentId {
        let id = DocumentId::sequential(self.next_seq);
        self.next_seq += 1;
        id
    }

    fn insert(
        &mut self,
        filename: &str,
        format: DocumentFormat,
        bytes: Vec<u8>,
        extracted: crate::document::ExtractedText,
    ) -> DocumentId {
        let id = self.next_id();
        let doc = Document::new(id.clone(), filename, format, bytes, extracted);
        if let Some(original) = self.documents.iter().find(|d| d.content_hash == doc.content_hash) {
            warn!(
                "'{}' has the same text as '{}' ({})",
                filename, original.filename, original.id
            );
        }
        info!(
            "Added {} '{}' ({}, {} words{})",
            id,
            filename,
            format,
            doc.word_count,
            if doc.is_truncated() { ", truncated" } else { "" }
        );
        self.documents.push(doc);
        id
    }

    /// Extract and store an upload. `declared` is a MIME type or extension;
    /// pass `""` to use the file name.
    pub fn add_upload(
        &mut self,
        filename: &str,
        declared: &str,
        bytes: Vec<u8>,
    ) -> Result<DocumentId, AnalysisError> {
        let (format, extracted) = extract::extract_text(filename, declared, &bytes, self.limits)?;
        Ok(self.insert(filename, format, bytes, extracted))
    }

    /// [`Session::add_upload`] with extraction on the blocking pool.
    pub async fn add_upload_async(
        &mut self,
        filename: &str,
        declared: &str,
        bytes: Vec<u8>,
    ) -> Result<DocumentId, AnalysisError> {
        let (format, extracted, bytes) = extract::extract_text_blocking(
            filename.to_string(),
            declared.to_string(),
            bytes,
            self.limits,
        )
        .await?;
        Ok(self.insert(filename, format, bytes, extracted))
    }

    /// Read a file from disk and add it; the extension decides the format.
    pub async fn add_file(&mut self, path: impl AsRef<Path>) -> Result<DocumentId, AnalysisError> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        // Reject unsupported types before reading the file.
        extract::resolve_format(&filename, "")?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AnalysisError::ExtractionFailed {
                filename: filename.clone(),
                reason: format!("cannot read {}: {}", path.display(), e),
            })?;
        self.add_upload_async(&filename, "", bytes).await
    }

    pub fn document(&self, id: &DocumentId) -> Option<&Document> {
        self.documents.iter().find(|d| &d.id == id)
    }

    /// Documents in upload order.
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Remove a document. Ids are never reused.
    pub fn remove(&mut self, id: &DocumentId) -> Option<Document> {
        let pos = self.documents.iter().position(|d| &d.id == id)?;
        Some(self.documents.remove(pos))
    }

    /// Pairs `(later, earlier)` of documents with identical extracted text.
    pub fn duplicates(&self) -> Vec<(DocumentId, DocumentId)> {
        let mut out = Vec::new();
        for (i, doc) in self.documents.iter().enumerate() {
            if let Some(earlier) = self.documents[..i]
                .iter()
                .find(|d| d.content_hash == doc.content_hash)
            {
                out.push((doc.id.clone(), earlier.id.clone()));
            }
        }
        out
    }

    /// Build a request over `ids`; `mode` falls back to the configured default.
    pub fn request(
        &self,
        ids: &[DocumentId],
        mode: Option<AnalysisMode>,
    ) -> Result<AnalysisRequest, AnalysisError> {
        if ids.is_empty() {
            return Err(AnalysisError::InvalidRequest(
                "at least one document is required".into(),
            ));
        }
        if ids.len() > self.max_documents {
            return Err(AnalysisError::InvalidRequest(format!(
                "{} documents requested; at most {} per analysis",
                ids.len(),
                self.max_documents
            )));
        }
        for (i, id) in ids.iter().enumerate() {
            if self.document(id).is_none() {
                return Err(AnalysisError::UnknownDocument { id: id.clone() });
            }
            if ids[..i].contains(id) {
                return Err(AnalysisError::InvalidRequest(format!(
                    "document {} listed more than once",
                    id
                )));
            }
        }
        Ok(AnalysisRequest {
            id: Uuid::new_v4(),
            document_ids: ids.to_vec(),
            mode: mode.unwrap_or(self.default_mode),
            created_at: Utc::now(),
        })
    }

    /// Request over every document in the session.
    pub fn request_all(
        &self,
        mode: Option<AnalysisMode>,
    ) -> Result<AnalysisRequest, AnalysisError> {
        let ids: Vec<DocumentId> = self.documents.iter().map(|d| d.id.clone()).collect();
        self.request(&ids, mode)
    }

    /// Resolve a request's ids to documents, in request order.
    pub fn resolve(&self, request: &AnalysisRequest) -> Result<Vec<&Document>, AnalysisError> {
        request
            .document_ids
            .iter()
            .map(|id| {
                self.document(id)
                    .ok_or_else(|| AnalysisError::UnknownDocument { id: id.clone() })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(&AnalysisConfig::builder().max_documents(2).build().unwrap())
    }

    #[test]
    fn ids_are_sequential_and_not_reused() {
        let mut s = session();
        let a = s.add_upload("a.txt", "text/plain", b"alpha".to_vec()).unwrap();
        let b = s.add_upload("b.txt", "", b"beta".to_vec()).unwrap();
        assert_eq!(a.as_str(), "DOC-1");
        assert_eq!(b.as_str(), "DOC-2");
        s.remove(&a);
        let c = s.add_upload("c.txt", "", b"gamma".to_vec()).unwrap();
        assert_eq!(c.as_str(), "DOC-3");
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn failed_upload_is_not_stored() {
        let mut s = session();
        assert!(s.add_upload("x.exe", "", b"MZ".to_vec()).is_err());
        assert!(s.is_empty());
    }

    #[test]
    fn request_validation() {
        let mut s = session();
        let a = s.add_upload("a.txt", "", b"alpha".to_vec()).unwrap();
        let b = s.add_upload("b.txt", "", b"beta".to_vec()).unwrap();
        let c = s.add_upload("c.txt", "", b"gamma".to_vec()).unwrap();

        assert!(matches!(s.request(&[], None), Err(AnalysisError::InvalidRequest(_))));
        assert!(matches!(
            s.request(&[a.clone(), b.clone(), c.clone()], None),
            Err(AnalysisError::InvalidRequest(_))
        ));
        assert!(matches!(
            s.request(&[a.clone(), a.clone()], None),
            Err(AnalysisError::InvalidRequest(_))
        ));
        let ghost = DocumentId::new("DOC-99");
        assert!(matches!(
            s.request(&[ghost], None),
            Err(AnalysisError::UnknownDocument { .. })
        ));

        let req = s.request(&[b.clone(), a.clone()], Some(AnalysisMode::Basic)).unwrap();
        assert_eq!(req.mode, AnalysisMode::Basic);
        let docs = s.resolve(&req).unwrap();
        assert_eq!(docs[0].id, b);
        assert_eq!(docs[1].id, a);
    }

    #[test]
    fn default_mode_applies() {
        let mut s = session();
        let a = s.add_upload("a.txt", "", b"alpha".to_vec()).unwrap();
        assert_eq!(s.request(&[a], None).unwrap().mode, AnalysisMode::Comprehensive);
    }

    #[test]
    fn duplicate_uploads_are_reported() {
        let mut s = session();
        let a = s.add_upload("a.txt", "", b"same text".to_vec()).unwrap();
        let b = s.add_upload("copy.txt", "", b"  same text\n".to_vec()).unwrap();
        assert_eq!(s.duplicates(), vec![(b, a)]);
    }

    #[tokio::test]
    async fn add_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.md");
        std::fs::write(&path, "Office hours end at 5 PM.").unwrap();
        let mut s = session();
        let id = s.add_file(&path).await.unwrap();
        let doc = s.document(&id).unwrap();
        assert_eq!(doc.filename, "policy.md");
        assert_eq!(doc.format, DocumentFormat::Txt);
        assert_eq!(doc.text(), "Office hours end at 5 PM.");
    }

    #[tokio::test]
    async fn add_file_missing_path_fails() {
        let mut s = session();
        let err = s.add_file("/definitely/not/here.txt").await.unwrap_err();
        assert!(matches!(err, AnalysisError::ExtractionFailed { .. }));
    }
}
