//! Applies one classification outcome to one document.
//!
//! Rules, first match wins:
//!
//! 1. overloaded / rate limited: no change, no retry consumed, `deferred` event
//! 2. processing error: `invalid`, retry consumed
//! 3. unrecognized (or unconfigured) type: `invalid`, retry consumed
//! 4. another document of the resolved type is already validated: remove as duplicate
//! 5. resolved type differs and a pending slot of that type exists: merge into the slot
//! 6. otherwise: correct the type if needed and validate, resetting the retry count

use std::sync::Arc;

use serde::Serialize;

use super::classifier::ClassificationOutcome;
use super::clock::Clock;
use super::dedup::DedupResolver;
use super::domain::{Document, DocumentId, DocumentStatus, DocumentTypeCode, TimelineEventType};
use super::repository::{RepositoryError, StoreTransaction};
use super::resolver::TypeResolver;
use super::timeline::{TimelineEntry, TimelineRecorder};

/// Upper bound for the configurable retry budget.
pub const MAX_RETRY_CEILING: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Missing,
    NotEligible,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    Deferred {
        document: DocumentId,
    },
    Invalidated {
        document: DocumentId,
        retry_count: u8,
    },
    Validated {
        document: DocumentId,
        type_code: DocumentTypeCode,
        corrected_from: Option<DocumentTypeCode>,
    },
    RemovedDuplicate {
        document: DocumentId,
        survivor: DocumentId,
    },
    MergedIntoPending {
        document: DocumentId,
        target: DocumentId,
        swept: Vec<DocumentId>,
    },
    Skipped {
        document: DocumentId,
        reason: SkipReason,
    },
}

pub struct DocumentStateMachine<K> {
    resolver: TypeResolver,
    recorder: TimelineRecorder<K>,
    dedup: DedupResolver<K>,
    clock: Arc<K>,
    max_retries: u8,
}

impl<K: Clock> DocumentStateMachine<K> {
    pub fn new(clock: Arc<K>, max_retries: u8) -> Self {
        let recorder = TimelineRecorder::new(Arc::clone(&clock));
        let dedup = DedupResolver::new(recorder.clone(), Arc::clone(&clock));
        Self {
            resolver: TypeResolver,
            recorder,
            dedup,
            clock,
            max_retries: max_retries.min(MAX_RETRY_CEILING),
        }
    }

    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }

    pub fn dedup(&self) -> &DedupResolver<K> {
        &self.dedup
    }

    /// Whether the document may be submitted to the classifier this cycle.
    ///
    /// Invalid face photos go to manual review instead: resubmitting the same failed
    /// comparison does not change its result.
    pub fn is_eligible(&self, document: &Document) -> bool {
        let awaiting = matches!(
            document.status,
            DocumentStatus::Invalid | DocumentStatus::Received
        );
        let failed_face_photo = document.type_code == DocumentTypeCode::FacePhoto
            && document.status == DocumentStatus::Invalid;
        awaiting && document.retry_count < self.max_retries && !document.locked && !failed_face_photo
    }

    pub fn apply(
        &self,
        tx: &mut dyn StoreTransaction,
        document_id: DocumentId,
        outcome: &ClassificationOutcome,
    ) -> Result<Transition, RepositoryError> {
        let Some(document) = tx.document(document_id)? else {
            return Ok(Transition::Skipped {
                document: document_id,
                reason: SkipReason::Missing,
            });
        };
        if !self.is_eligible(&document) {
            return Ok(Transition::Skipped {
                document: document_id,
                reason: SkipReason::NotEligible,
            });
        }

        let (type_code, detail) = match outcome {
            ClassificationOutcome::Overloaded | ClassificationOutcome::RateLimited => {
                return self.defer(tx, &document, outcome);
            }
            ClassificationOutcome::ProcessingError { message } => {
                return self.invalidate(tx, document, message.clone());
            }
            ClassificationOutcome::Success { type_code, detail } => (type_code, detail),
        };

        let resolved = self.resolver.resolve(type_code, detail.as_deref());
        if resolved.is_unrecognized() {
            let note = match resolved.note {
                Some(hint) => format!("type not recognized: {hint}"),
                None => "type not recognized".to_string(),
            };
            return self.invalidate(tx, document, note);
        }
        let configured = tx
            .document_type(resolved.code)?
            .is_some_and(|document_type| document_type.active);
        if !configured {
            let note = format!("type not recognized: {} is not an active type", resolved.code);
            return self.invalidate(tx, document, note);
        }

        let survivor = tx
            .documents_matching(document.candidate_id, resolved.code, DocumentStatus::Validated)?
            .into_iter()
            .find(|validated| validated.id != document.id);
        if let Some(survivor) = survivor {
            self.dedup.remove_as_duplicate(tx, &document, &survivor)?;
            return Ok(Transition::RemovedDuplicate {
                document: document.id,
                survivor: survivor.id,
            });
        }

        if resolved.code != document.type_code {
            let slot = tx
                .documents_matching(document.candidate_id, resolved.code, DocumentStatus::Pending)?
                .into_iter()
                .next();
            if let Some(slot) = slot {
                let merge = self.dedup.merge_into_pending(tx, &document, &slot)?;
                return Ok(Transition::MergedIntoPending {
                    document: document.id,
                    target: merge.target.id,
                    swept: merge.swept,
                });
            }
        }

        self.validate(tx, document, resolved.code)
    }

    fn defer(
        &self,
        tx: &mut dyn StoreTransaction,
        document: &Document,
        outcome: &ClassificationOutcome,
    ) -> Result<Transition, RepositoryError> {
        let reason = match outcome {
            ClassificationOutcome::RateLimited => "classifier rate limited",
            _ => "classifier overloaded",
        };
        self.recorder.record(
            tx,
            TimelineEntry::for_document(document.candidate_id, document.id, TimelineEventType::Deferred)
                .from_status(document.status)
                .to_status(document.status)
                .notes(reason),
        )?;
        Ok(Transition::Deferred {
            document: document.id,
        })
    }

    fn invalidate(
        &self,
        tx: &mut dyn StoreTransaction,
        mut document: Document,
        note: String,
    ) -> Result<Transition, RepositoryError> {
        let previous = document.status;
        document.status = DocumentStatus::Invalid;
        document.retry_count = document.retry_count.saturating_add(1).min(self.max_retries);
        document.notes = note.clone();
        tx.update_document(&document)?;
        self.recorder.record(
            tx,
            TimelineEntry::for_document(
                document.candidate_id,
                document.id,
                TimelineEventType::Invalidated,
            )
            .from_status(previous)
            .to_status(DocumentStatus::Invalid)
            .notes(note),
        )?;
        Ok(Transition::Invalidated {
            document: document.id,
            retry_count: document.retry_count,
        })
    }

    fn validate(
        &self,
        tx: &mut dyn StoreTransaction,
        mut document: Document,
        type_code: DocumentTypeCode,
    ) -> Result<Transition, RepositoryError> {
        let previous = document.status;
        let corrected_from = (document.type_code != type_code).then_some(document.type_code);
        document.type_code = type_code;
        document.status = DocumentStatus::Validated;
        document.retry_count = 0;
        document.validated_at = Some(self.clock.now());
        document.notes = match corrected_from {
            Some(original) => format!("type corrected from {original}"),
            None => String::new(),
        };
        tx.update_document(&document)?;
        self.recorder.record(
            tx,
            TimelineEntry::for_document(document.candidate_id, document.id, TimelineEventType::Validated)
                .from_status(previous)
                .to_status(DocumentStatus::Validated)
                .notes(document.notes.clone()),
        )?;
        Ok(Transition::Validated {
            document: document.id,
            type_code,
            corrected_from,
        })
    }
}
