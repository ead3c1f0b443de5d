use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use super::domain::{
    Candidate, CandidateId, Document, DocumentId, DocumentStatus, DocumentType, DocumentTypeCode,
    FileRef, NewCandidate, NewDocument, NewTimelineEvent, TimelineEvent,
};

/// Reads and writes available inside a single store transaction.
///
/// Listing methods return rows in ascending identifier order so cycle processing is
/// reproducible.
pub trait StoreTransaction {
    fn candidates(&self) -> Result<Vec<Candidate>, RepositoryError>;
    fn candidate(&self, id: CandidateId) -> Result<Option<Candidate>, RepositoryError>;
    fn insert_candidate(&mut self, candidate: NewCandidate) -> Result<Candidate, RepositoryError>;
    fn update_candidate(&mut self, candidate: &Candidate) -> Result<(), RepositoryError>;

    fn document_type(
        &self,
        code: DocumentTypeCode,
    ) -> Result<Option<DocumentType>, RepositoryError>;
    fn document_types(&self) -> Result<Vec<DocumentType>, RepositoryError>;

    fn documents_for(&self, candidate: CandidateId) -> Result<Vec<Document>, RepositoryError>;
    fn document(&self, id: DocumentId) -> Result<Option<Document>, RepositoryError>;
    fn insert_document(&mut self, document: NewDocument) -> Result<Document, RepositoryError>;
    fn update_document(&mut self, document: &Document) -> Result<(), RepositoryError>;
    fn delete_document(&mut self, id: DocumentId) -> Result<(), RepositoryError>;

    fn latest_event_for_document(
        &self,
        id: DocumentId,
    ) -> Result<Option<TimelineEvent>, RepositoryError>;
    fn latest_event_for_candidate(
        &self,
        id: CandidateId,
    ) -> Result<Option<TimelineEvent>, RepositoryError>;
    fn append_event(&mut self, event: NewTimelineEvent) -> Result<TimelineEvent, RepositoryError>;
    fn events_for_candidate(
        &self,
        id: CandidateId,
    ) -> Result<Vec<TimelineEvent>, RepositoryError>;
    /// Nulls document references that point at deleted documents, returning how many events
    /// were touched. Events themselves are never removed.
    fn detach_orphaned_events(&mut self) -> Result<usize, RepositoryError>;

    /// Documents of one type and status for a candidate, ascending by id.
    fn documents_matching(
        &self,
        candidate: CandidateId,
        type_code: DocumentTypeCode,
        status: DocumentStatus,
    ) -> Result<Vec<Document>, RepositoryError> {
        Ok(self
            .documents_for(candidate)?
            .into_iter()
            .filter(|document| document.type_code == type_code && document.status == status)
            .collect())
    }
}

/// Shared persistence layer. Every multi-record mutation goes through `transaction`, which
/// commits only when the closure returns `Ok`.
pub trait DocumentStore: Send + Sync {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<T, E>,
        E: From<RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("{0} not found")]
    NotFound(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Raw document bytes handed to the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentContent {
    pub file: FileRef,
    pub bytes: Vec<u8>,
}

/// File storage boundary resolving opaque handles into content.
pub trait DocumentSource: Send + Sync {
    fn load(&self, file: &FileRef) -> Result<DocumentContent, SourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("file {0} not found")]
    Missing(FileRef),
    #[error("file {file} rejected: {reason}")]
    Rejected { file: FileRef, reason: String },
    #[error("failed to read {file}: {source}")]
    Io {
        file: FileRef,
        #[source]
        source: std::io::Error,
    },
}

/// Reads files relative to a root directory, refusing handles that escape it.
#[derive(Debug, Clone)]
pub struct FsDocumentSource {
    root: PathBuf,
}

impl FsDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, file: &FileRef) -> Result<PathBuf, SourceError> {
        let relative = Path::new(&file.0);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(SourceError::Rejected {
                file: file.clone(),
                reason: "path must stay inside the document root".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

impl DocumentSource for FsDocumentSource {
    fn load(&self, file: &FileRef) -> Result<DocumentContent, SourceError> {
        let path = self.resolve(file)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(DocumentContent {
                file: file.clone(),
                bytes,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::Missing(file.clone()))
            }
            Err(source) => Err(SourceError::Io {
                file: file.clone(),
                source,
            }),
        }
    }
}

/// Messaging boundary (SMS/WhatsApp adapters live outside this crate).
pub trait Notifier: Send + Sync {
    fn notify(&self, phone: &str, text: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
    #[error("recipient {0} rejected")]
    Recipient(String),
}

/// Sanitized representation of a candidate and its documents for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateStatusView {
    pub candidate_id: CandidateId,
    pub status: &'static str,
    pub documents: Vec<DocumentStatusView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentStatusView {
    pub document_id: DocumentId,
    pub type_code: DocumentTypeCode,
    pub status: &'static str,
    pub retry_count: u8,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

impl CandidateStatusView {
    pub fn build(candidate: &Candidate, documents: &[Document]) -> Self {
        Self {
            candidate_id: candidate.id,
            status: candidate.status.label(),
            documents: documents
                .iter()
                .map(|document| DocumentStatusView {
                    document_id: document.id,
                    type_code: document.type_code,
                    status: document.status.label(),
                    retry_count: document.retry_count,
                    notes: document.notes.clone(),
                })
                .collect(),
        }
    }
}
