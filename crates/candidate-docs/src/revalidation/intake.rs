//! Entry points used by the onboarding flow: requesting documents, attaching uploaded files,
//! and recording that a candidate does not have a document.

use std::sync::Arc;

use super::aggregator::CandidateStatusAggregator;
use super::clock::Clock;
use super::domain::{
    Candidate, CandidateId, CandidateStatus, Document, DocumentId, DocumentStatus,
    DocumentTypeCode, FileRef, NewDocument, TimelineEventType,
};
use super::repository::{DocumentStore, RepositoryError, StoreTransaction};
use super::timeline::{TimelineEntry, TimelineRecorder};

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("candidate {0} was rejected; intake is closed")]
    CandidateRejected(CandidateId),
    #[error("document {document} is {status} and cannot be marked as not possessed")]
    NotMarkable {
        document: DocumentId,
        status: &'static str,
    },
}

pub struct DocumentIntake<S, K> {
    store: Arc<S>,
    recorder: TimelineRecorder<K>,
    aggregator: CandidateStatusAggregator<K>,
    clock: Arc<K>,
}

impl<S, K> DocumentIntake<S, K>
where
    S: DocumentStore,
    K: Clock,
{
    pub fn new(store: Arc<S>, clock: Arc<K>) -> Self {
        let recorder = TimelineRecorder::new(Arc::clone(&clock));
        Self {
            store,
            aggregator: CandidateStatusAggregator::new(recorder.clone()),
            recorder,
            clock,
        }
    }

    /// Creates a pending document for every mandatory type the candidate does not have yet.
    pub fn start_process(&self, candidate_id: CandidateId) -> Result<Vec<Document>, IntakeError> {
        self.store.transaction(|tx| {
            let candidate = open_candidate(tx, candidate_id)?;
            let existing = tx.documents_for(candidate_id)?;
            let mut requested = Vec::new();

            for document_type in tx.document_types()? {
                if !document_type.is_mandatory_for(candidate.contract_type)
                    || existing
                        .iter()
                        .any(|document| document.type_code == document_type.code)
                {
                    continue;
                }
                let document = tx.insert_document(NewDocument {
                    candidate_id,
                    type_code: document_type.code,
                    status: DocumentStatus::Pending,
                    file: None,
                    submitted_at: None,
                    notes: String::new(),
                })?;
                self.recorder.record(
                    tx,
                    TimelineEntry::for_document(candidate_id, document.id, TimelineEventType::Requested)
                        .to_status(DocumentStatus::Pending)
                        .notes(document_type.name),
                )?;
                requested.push(document);
            }

            self.aggregator.recompute(tx, candidate_id)?;
            Ok(requested)
        })
    }

    /// Attaches an uploaded file. The oldest pending document of the declared type receives it;
    /// without one, a new received document is created.
    pub fn receive_file(
        &self,
        candidate_id: CandidateId,
        type_code: DocumentTypeCode,
        file: FileRef,
    ) -> Result<Document, IntakeError> {
        self.store.transaction(|tx| {
            open_candidate(tx, candidate_id)?;
            let now = self.clock.now();
            let slot = tx
                .documents_matching(candidate_id, type_code, DocumentStatus::Pending)?
                .into_iter()
                .next();

            let (document, previous) = match slot {
                Some(mut document) => {
                    let previous = document.status;
                    document.status = DocumentStatus::Received;
                    document.file = Some(file);
                    document.submitted_at = Some(now);
                    tx.update_document(&document)?;
                    (document, Some(previous))
                }
                None => {
                    let document = tx.insert_document(NewDocument {
                        candidate_id,
                        type_code,
                        status: DocumentStatus::Received,
                        file: Some(file),
                        submitted_at: Some(now),
                        notes: String::new(),
                    })?;
                    (document, None)
                }
            };

            let mut entry =
                TimelineEntry::for_document(candidate_id, document.id, TimelineEventType::Received)
                    .to_status(DocumentStatus::Received);
            if let Some(previous) = previous {
                entry = entry.from_status(previous);
            }
            self.recorder.record(tx, entry)?;
            self.aggregator.recompute(tx, candidate_id)?;
            Ok(document)
        })
    }

    /// Records the candidate's declaration that they do not have this document.
    pub fn mark_not_possessed(
        &self,
        document_id: DocumentId,
        reason: &str,
    ) -> Result<Document, IntakeError> {
        self.store.transaction(|tx| {
            let mut document = tx
                .document(document_id)?
                .ok_or_else(|| RepositoryError::NotFound(document_id.to_string()))?;
            open_candidate(tx, document.candidate_id)?;
            if !matches!(
                document.status,
                DocumentStatus::Pending | DocumentStatus::Invalid
            ) {
                return Err(IntakeError::NotMarkable {
                    document: document_id,
                    status: document.status.label(),
                });
            }

            let previous = document.status;
            document.status = DocumentStatus::NotPossessed;
            document.notes = reason.trim().to_string();
            tx.update_document(&document)?;
            self.recorder.record(
                tx,
                TimelineEntry::for_document(
                    document.candidate_id,
                    document.id,
                    TimelineEventType::NotPossessed,
                )
                .from_status(previous)
                .to_status(DocumentStatus::NotPossessed)
                .notes(document.notes.clone()),
            )?;
            self.aggregator.recompute(tx, document.candidate_id)?;
            Ok(document)
        })
    }
}

fn open_candidate(
    tx: &mut dyn StoreTransaction,
    candidate_id: CandidateId,
) -> Result<Candidate, IntakeError> {
    let candidate = tx
        .candidate(candidate_id)?
        .ok_or_else(|| RepositoryError::NotFound(candidate_id.to_string()))?;
    if candidate.status == CandidateStatus::Rejected {
        return Err(IntakeError::CandidateRejected(candidate_id));
    }
    Ok(candidate)
}
