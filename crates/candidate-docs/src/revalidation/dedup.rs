use std::collections::BTreeMap;
use std::sync::Arc;

use super::clock::Clock;
use super::domain::{CandidateId, Document, DocumentId, DocumentStatus, TimelineEventType};
use super::repository::{RepositoryError, StoreTransaction};
use super::timeline::{TimelineEntry, TimelineRecorder};

/// Result of folding a classified document into the candidate's pending slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub target: Document,
    /// Other pending documents of the same type removed by the sweep.
    pub swept: Vec<DocumentId>,
}

/// Removes or merges redundant documents. Every operation runs inside the caller's
/// transaction so deletions and their events commit together.
pub struct DedupResolver<K> {
    recorder: TimelineRecorder<K>,
    clock: Arc<K>,
}

impl<K: Clock> DedupResolver<K> {
    pub fn new(recorder: TimelineRecorder<K>, clock: Arc<K>) -> Self {
        Self { recorder, clock }
    }

    /// Deletes `duplicate`, leaving an event that points at the validated `survivor`.
    pub fn remove_as_duplicate(
        &self,
        tx: &mut dyn StoreTransaction,
        duplicate: &Document,
        survivor: &Document,
    ) -> Result<(), RepositoryError> {
        tx.delete_document(duplicate.id)?;
        self.recorder.record(
            tx,
            TimelineEntry::for_document(
                duplicate.candidate_id,
                duplicate.id,
                TimelineEventType::RemovedDuplicate,
            )
            .from_status(duplicate.status)
            .related_to(survivor.id)
            .notes(format!(
                "duplicate of validated {} ({})",
                survivor.id, survivor.type_code
            )),
        )?;
        Ok(())
    }

    /// Moves `source`'s file into the pending `target`, validates the target, deletes the
    /// source, then deletes any other pending documents of the target's type.
    pub fn merge_into_pending(
        &self,
        tx: &mut dyn StoreTransaction,
        source: &Document,
        target: &Document,
    ) -> Result<MergeOutcome, RepositoryError> {
        let now = self.clock.now();
        let mut merged = target.clone();
        merged.file = source.file.clone();
        merged.status = DocumentStatus::Validated;
        merged.retry_count = 0;
        merged.submitted_at = source.submitted_at.or(Some(now));
        merged.validated_at = Some(now);
        merged.notes = format!("file received as {} ({})", source.id, source.type_code);
        tx.update_document(&merged)?;
        self.recorder.record(
            tx,
            TimelineEntry::for_document(merged.candidate_id, merged.id, TimelineEventType::Validated)
                .from_status(target.status)
                .to_status(DocumentStatus::Validated)
                .related_to(source.id)
                .notes(merged.notes.clone()),
        )?;

        tx.delete_document(source.id)?;
        self.recorder.record(
            tx,
            TimelineEntry::for_document(
                source.candidate_id,
                source.id,
                TimelineEventType::RemovedReplaced,
            )
            .from_status(source.status)
            .related_to(merged.id)
            .notes(format!("replaced by {} ({})", merged.id, merged.type_code)),
        )?;

        let mut swept = Vec::new();
        let siblings = tx.documents_matching(
            merged.candidate_id,
            merged.type_code,
            DocumentStatus::Pending,
        )?;
        for sibling in siblings.iter().filter(|sibling| sibling.id != merged.id) {
            self.remove_as_duplicate(tx, sibling, &merged)?;
            swept.push(sibling.id);
        }

        Ok(MergeOutcome {
            target: merged,
            swept,
        })
    }

    /// Deletes pending documents whose type the candidate already has validated. The lowest
    /// validated id of each type is the survivor referenced by the events.
    pub fn remove_duplicates_general(
        &self,
        tx: &mut dyn StoreTransaction,
        candidate: CandidateId,
    ) -> Result<Vec<DocumentId>, RepositoryError> {
        let documents = tx.documents_for(candidate)?;
        let mut survivors = BTreeMap::new();
        for document in documents
            .iter()
            .filter(|document| document.status == DocumentStatus::Validated)
        {
            survivors.entry(document.type_code).or_insert(document);
        }

        let mut removed = Vec::new();
        for pending in documents
            .iter()
            .filter(|document| document.status == DocumentStatus::Pending)
        {
            if let Some(survivor) = survivors.get(&pending.type_code) {
                self.remove_as_duplicate(tx, pending, survivor)?;
                removed.push(pending.id);
            }
        }
        Ok(removed)
    }
}
