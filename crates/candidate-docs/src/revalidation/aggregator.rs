use serde::Serialize;

use super::clock::Clock;
use super::domain::{CandidateId, CandidateStatus, DocumentStatus, TimelineEventType};
use super::repository::{RepositoryError, StoreTransaction};
use super::timeline::{TimelineEntry, TimelineRecorder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub candidate_id: CandidateId,
    pub from: CandidateStatus,
    pub to: CandidateStatus,
}

/// Derives the candidate status from its mandatory documents.
pub struct CandidateStatusAggregator<K> {
    recorder: TimelineRecorder<K>,
}

impl<K: Clock> CandidateStatusAggregator<K> {
    pub fn new(recorder: TimelineRecorder<K>) -> Self {
        Self { recorder }
    }

    /// Recomputes and persists the status. Returns `None` when nothing changed, so repeated
    /// calls on unchanged data never add events.
    pub fn recompute(
        &self,
        tx: &mut dyn StoreTransaction,
        candidate_id: CandidateId,
    ) -> Result<Option<StatusChange>, RepositoryError> {
        let mut candidate = tx
            .candidate(candidate_id)?
            .ok_or_else(|| RepositoryError::NotFound(candidate_id.to_string()))?;
        if candidate.status == CandidateStatus::Rejected {
            return Ok(None);
        }

        let documents = tx.documents_for(candidate_id)?;
        let mut mandatory_statuses = Vec::new();
        for document in &documents {
            let mandatory = tx
                .document_type(document.type_code)?
                .is_some_and(|document_type| {
                    document_type.is_mandatory_for(candidate.contract_type)
                });
            if mandatory {
                mandatory_statuses.push(document.status);
            }
        }

        let derived = derive_status(&mandatory_statuses);
        if derived == candidate.status {
            return Ok(None);
        }

        let previous = candidate.status;
        candidate.status = derived;
        tx.update_candidate(&candidate)?;
        self.recorder.record(
            tx,
            TimelineEntry::for_candidate(candidate_id, TimelineEventType::CandidateStatusChanged)
                .from_status(previous)
                .to_status(derived),
        )?;

        Ok(Some(StatusChange {
            candidate_id,
            from: previous,
            to: derived,
        }))
    }
}

/// Priority order: any invalid, then any outstanding, otherwise complete.
pub fn derive_status(mandatory: &[DocumentStatus]) -> CandidateStatus {
    if mandatory.contains(&DocumentStatus::Invalid) {
        CandidateStatus::DocumentsInvalid
    } else if mandatory
        .iter()
        .any(|status| matches!(status, DocumentStatus::Pending | DocumentStatus::Received))
    {
        CandidateStatus::DocumentsPending
    } else {
        CandidateStatus::Completed
    }
}
