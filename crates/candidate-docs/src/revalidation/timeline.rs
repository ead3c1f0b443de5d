use std::sync::Arc;
use std::time::Duration;

use super::clock::Clock;
use super::domain::{
    CandidateId, DocumentId, NewTimelineEvent, TimelineEvent, TimelineEventType, TrackedStatus,
};
use super::repository::{RepositoryError, StoreTransaction};

/// What happened; the recorder stamps the time and the duration since the previous event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub candidate_id: CandidateId,
    pub document_id: Option<DocumentId>,
    pub related_document_id: Option<DocumentId>,
    pub event_type: TimelineEventType,
    pub prev_status: Option<TrackedStatus>,
    pub new_status: Option<TrackedStatus>,
    pub notes: Option<String>,
}

impl TimelineEntry {
    pub fn for_document(
        candidate_id: CandidateId,
        document_id: DocumentId,
        event_type: TimelineEventType,
    ) -> Self {
        Self {
            candidate_id,
            document_id: Some(document_id),
            related_document_id: None,
            event_type,
            prev_status: None,
            new_status: None,
            notes: None,
        }
    }

    pub fn for_candidate(candidate_id: CandidateId, event_type: TimelineEventType) -> Self {
        Self {
            candidate_id,
            document_id: None,
            related_document_id: None,
            event_type,
            prev_status: None,
            new_status: None,
            notes: None,
        }
    }

    pub fn from_status(mut self, status: impl Into<TrackedStatus>) -> Self {
        self.prev_status = Some(status.into());
        self
    }

    pub fn to_status(mut self, status: impl Into<TrackedStatus>) -> Self {
        self.new_status = Some(status.into());
        self
    }

    pub fn related_to(mut self, document_id: DocumentId) -> Self {
        self.related_document_id = Some(document_id);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        let notes = notes.into();
        self.notes = (!notes.is_empty()).then_some(notes);
        self
    }
}

/// Single write path for the audit timeline.
pub struct TimelineRecorder<K> {
    clock: Arc<K>,
}

impl<K> Clone for TimelineRecorder<K> {
    fn clone(&self) -> Self {
        Self {
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<K: Clock> TimelineRecorder<K> {
    pub fn new(clock: Arc<K>) -> Self {
        Self { clock }
    }

    /// Appends an event. The previous event is looked up per document when one is given,
    /// otherwise per candidate; a prior timestamp that is not strictly earlier yields zero.
    pub fn record(
        &self,
        tx: &mut dyn StoreTransaction,
        entry: TimelineEntry,
    ) -> Result<TimelineEvent, RepositoryError> {
        let occurred_at = self.clock.now();
        let previous = match entry.document_id {
            Some(document_id) => tx.latest_event_for_document(document_id)?,
            None => tx.latest_event_for_candidate(entry.candidate_id)?,
        };
        let duration_since_previous = previous.map(|prior| {
            (occurred_at - prior.occurred_at)
                .to_std()
                .unwrap_or(Duration::ZERO)
        });

        tx.append_event(NewTimelineEvent {
            candidate_id: entry.candidate_id,
            document_id: entry.document_id,
            related_document_id: entry.related_document_id,
            event_type: entry.event_type,
            prev_status: entry.prev_status,
            new_status: entry.new_status,
            occurred_at,
            duration_since_previous,
            notes: entry.notes,
        })
    }
}
