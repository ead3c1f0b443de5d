//! In-memory store used by tests, demos, and single-node deployments.
//!
//! Candidate and document rows are copied per transaction and replace the committed rows only
//! when the closure succeeds. The timeline log is shared instead: a transaction appends to it in
//! place and keeps an undo list for detached references, so a failing step truncates the log
//! and restores what it touched.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::catalog::DocumentCatalog;
use super::domain::{
    Candidate, CandidateId, Document, DocumentId, DocumentType, DocumentTypeCode, EventId,
    NewCandidate, NewDocument, NewTimelineEvent, TimelineEvent,
};
use super::repository::{DocumentStore, RepositoryError, StoreTransaction};

#[derive(Debug, Clone, Default)]
struct Records {
    candidates: BTreeMap<CandidateId, Candidate>,
    document_types: BTreeMap<DocumentTypeCode, DocumentType>,
    documents: BTreeMap<DocumentId, Document>,
    next_candidate: u64,
    next_document: u64,
    next_event: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Records,
    events: Vec<TimelineEvent>,
}

/// References an event held before a detach touched it.
#[derive(Debug)]
struct DetachedRefs {
    index: usize,
    document_id: Option<DocumentId>,
    related_document_id: Option<DocumentId>,
}

struct MemoryTransaction<'a> {
    records: Records,
    events: &'a mut Vec<TimelineEvent>,
    committed_len: usize,
    detached: Vec<DetachedRefs>,
}

impl MemoryTransaction<'_> {
    fn rollback(self) {
        self.events.truncate(self.committed_len);
        for undo in self.detached.into_iter().rev() {
            if let Some(event) = self.events.get_mut(undo.index) {
                event.document_id = undo.document_id;
                event.related_document_id = undo.related_document_id;
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new(catalog: &DocumentCatalog) -> Self {
        let records = Records {
            document_types: catalog
                .types()
                .map(|document_type| (document_type.code, document_type.clone()))
                .collect(),
            ..Records::default()
        };
        Self {
            state: Mutex::new(MemoryState {
                records,
                events: Vec::new(),
            }),
        }
    }
}

impl DocumentStore for InMemoryStore {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))?;
        let state = &mut *guard;
        let mut tx = MemoryTransaction {
            records: state.records.clone(),
            committed_len: state.events.len(),
            events: &mut state.events,
            detached: Vec::new(),
        };
        match work(&mut tx) {
            Ok(output) => {
                let MemoryTransaction { records, .. } = tx;
                state.records = records;
                Ok(output)
            }
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }
}

fn latest(events: impl Iterator<Item = TimelineEvent>) -> Option<TimelineEvent> {
    events.max_by(|a, b| (a.occurred_at, a.id).cmp(&(b.occurred_at, b.id)))
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn candidates(&self) -> Result<Vec<Candidate>, RepositoryError> {
        Ok(self.records.candidates.values().cloned().collect())
    }

    fn candidate(&self, id: CandidateId) -> Result<Option<Candidate>, RepositoryError> {
        Ok(self.records.candidates.get(&id).cloned())
    }

    fn insert_candidate(&mut self, candidate: NewCandidate) -> Result<Candidate, RepositoryError> {
        self.records.next_candidate += 1;
        let record = Candidate {
            id: CandidateId(self.records.next_candidate),
            full_name: candidate.full_name,
            phone: candidate.phone,
            status: candidate.status,
            contract_type: candidate.contract_type,
        };
        self.records.candidates.insert(record.id, record.clone());
        Ok(record)
    }

    fn update_candidate(&mut self, candidate: &Candidate) -> Result<(), RepositoryError> {
        match self.records.candidates.get_mut(&candidate.id) {
            Some(slot) => {
                *slot = candidate.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(candidate.id.to_string())),
        }
    }

    fn document_type(
        &self,
        code: DocumentTypeCode,
    ) -> Result<Option<DocumentType>, RepositoryError> {
        Ok(self.records.document_types.get(&code).cloned())
    }

    fn document_types(&self) -> Result<Vec<DocumentType>, RepositoryError> {
        Ok(self.records.document_types.values().cloned().collect())
    }

    fn documents_for(&self, candidate: CandidateId) -> Result<Vec<Document>, RepositoryError> {
        Ok(self
            .records.documents
            .values()
            .filter(|document| document.candidate_id == candidate)
            .cloned()
            .collect())
    }

    fn document(&self, id: DocumentId) -> Result<Option<Document>, RepositoryError> {
        Ok(self.records.documents.get(&id).cloned())
    }

    fn insert_document(&mut self, document: NewDocument) -> Result<Document, RepositoryError> {
        if !self.records.candidates.contains_key(&document.candidate_id) {
            return Err(RepositoryError::NotFound(document.candidate_id.to_string()));
        }
        self.records.next_document += 1;
        let record = Document {
            id: DocumentId(self.records.next_document),
            candidate_id: document.candidate_id,
            type_code: document.type_code,
            status: document.status,
            retry_count: 0,
            notes: document.notes,
            file: document.file,
            submitted_at: document.submitted_at,
            validated_at: None,
            locked: false,
        };
        self.records.documents.insert(record.id, record.clone());
        Ok(record)
    }

    fn update_document(&mut self, document: &Document) -> Result<(), RepositoryError> {
        match self.records.documents.get_mut(&document.id) {
            Some(slot) => {
                *slot = document.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(document.id.to_string())),
        }
    }

    fn delete_document(&mut self, id: DocumentId) -> Result<(), RepositoryError> {
        self.records.documents
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    fn latest_event_for_document(
        &self,
        id: DocumentId,
    ) -> Result<Option<TimelineEvent>, RepositoryError> {
        Ok(latest(
            self.events
                .iter()
                .filter(|event| event.document_id == Some(id))
                .cloned(),
        ))
    }

    fn latest_event_for_candidate(
        &self,
        id: CandidateId,
    ) -> Result<Option<TimelineEvent>, RepositoryError> {
        Ok(latest(
            self.events
                .iter()
                .filter(|event| event.candidate_id == id)
                .cloned(),
        ))
    }

    fn append_event(&mut self, event: NewTimelineEvent) -> Result<TimelineEvent, RepositoryError> {
        self.records.next_event += 1;
        let record = TimelineEvent {
            id: EventId(self.records.next_event),
            candidate_id: event.candidate_id,
            document_id: event.document_id,
            related_document_id: event.related_document_id,
            event_type: event.event_type,
            prev_status: event.prev_status,
            new_status: event.new_status,
            occurred_at: event.occurred_at,
            duration_since_previous: event.duration_since_previous,
            notes: event.notes,
        };
        self.events.push(record.clone());
        Ok(record)
    }

    fn events_for_candidate(
        &self,
        id: CandidateId,
    ) -> Result<Vec<TimelineEvent>, RepositoryError> {
        Ok(self
            .events
            .iter()
            .filter(|event| event.candidate_id == id)
            .cloned()
            .collect())
    }

    fn detach_orphaned_events(&mut self) -> Result<usize, RepositoryError> {
        let documents = &self.records.documents;
        let orphaned = |id: Option<DocumentId>| id.is_some_and(|id| !documents.contains_key(&id));
        let mut touched = 0;
        for (index, event) in self.events.iter_mut().enumerate() {
            let document_gone = orphaned(event.document_id);
            let related_gone = orphaned(event.related_document_id);
            if !document_gone && !related_gone {
                continue;
            }
            self.detached.push(DetachedRefs {
                index,
                document_id: event.document_id,
                related_document_id: event.related_document_id,
            });
            if document_gone {
                event.document_id = None;
            }
            if related_gone {
                event.related_document_id = None;
            }
            touched += 1;
        }
        Ok(touched)
    }
}
