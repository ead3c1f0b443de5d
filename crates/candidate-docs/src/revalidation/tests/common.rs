use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use axum::response::Response;
use chrono::{TimeZone, Utc};
use serde_json::Value;

use crate::revalidation::catalog::DocumentCatalog;
use crate::revalidation::classifier::{ClassificationOutcome, ClassifierClient, ClassifierResponse};
use crate::revalidation::clock::ManualClock;
use crate::revalidation::domain::{
    Candidate, CandidateId, CandidateStatus, ContractType, Document, DocumentId, DocumentStatus,
    DocumentType, DocumentTypeCode, FileRef, NewCandidate, NewDocument, NewTimelineEvent,
    TimelineEvent,
};
use crate::revalidation::memory::InMemoryStore;
use crate::revalidation::repository::{
    DocumentContent, DocumentSource, DocumentStore, NotifyError, Notifier, RepositoryError,
    SourceError, StoreTransaction,
};
use crate::revalidation::scheduler::{Collaborators, CycleScheduler, RevalidationSettings};
use crate::revalidation::state_machine::DocumentStateMachine;

pub(super) fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::starting_at(
        Utc.with_ymd_and_hms(2025, 5, 2, 9, 0, 0).unwrap(),
    ))
}

/// In-memory store plus a virtual clock, with helpers to seed rows directly.
pub(super) struct Fixture {
    pub(super) store: Arc<InMemoryStore>,
    pub(super) clock: Arc<ManualClock>,
}

impl Fixture {
    pub(super) fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new(&DocumentCatalog::standard())),
            clock: clock(),
        }
    }

    pub(super) fn candidate(&self, status: CandidateStatus) -> CandidateId {
        self.candidate_with(status, ContractType::Employee, Some("+55 11 98888-7777"))
    }

    pub(super) fn candidate_with(
        &self,
        status: CandidateStatus,
        contract_type: ContractType,
        phone: Option<&str>,
    ) -> CandidateId {
        self.store
            .transaction(|tx| {
                tx.insert_candidate(NewCandidate {
                    full_name: "Joana Ribeiro".to_string(),
                    phone: phone.map(str::to_string),
                    status,
                    contract_type,
                })
            })
            .expect("candidate inserted")
            .id
    }

    /// Seeds a document. Anything past `pending` gets a file reference.
    pub(super) fn document(
        &self,
        candidate: CandidateId,
        type_code: DocumentTypeCode,
        status: DocumentStatus,
    ) -> Document {
        self.document_with(candidate, type_code, status, 0)
    }

    pub(super) fn document_with(
        &self,
        candidate: CandidateId,
        type_code: DocumentTypeCode,
        status: DocumentStatus,
        retry_count: u8,
    ) -> Document {
        let submitted_at = self.clock_now();
        self.store
            .transaction(|tx| {
                let mut document = tx.insert_document(NewDocument {
                    candidate_id: candidate,
                    type_code,
                    status,
                    file: (status != DocumentStatus::Pending).then(|| {
                        FileRef(format!("{candidate}/{}.pdf", type_code.as_str().to_lowercase()))
                    }),
                    submitted_at: (status != DocumentStatus::Pending).then_some(submitted_at),
                    notes: String::new(),
                })?;
                document.retry_count = retry_count;
                tx.update_document(&document)?;
                Ok::<_, RepositoryError>(document)
            })
            .expect("document inserted")
    }

    pub(super) fn lock(&self, id: DocumentId) {
        self.store
            .transaction(|tx| {
                let mut document = tx
                    .document(id)?
                    .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
                document.locked = true;
                tx.update_document(&document)
            })
            .expect("document locked");
    }

    pub(super) fn get(&self, id: DocumentId) -> Option<Document> {
        self.store
            .transaction(|tx| tx.document(id))
            .expect("document read")
    }

    pub(super) fn documents(&self, candidate: CandidateId) -> Vec<Document> {
        self.store
            .transaction(|tx| tx.documents_for(candidate))
            .expect("documents read")
    }

    pub(super) fn candidate_record(&self, id: CandidateId) -> Candidate {
        self.store
            .transaction(|tx| tx.candidate(id))
            .expect("candidate read")
            .expect("candidate exists")
    }

    pub(super) fn events(&self, candidate: CandidateId) -> Vec<TimelineEvent> {
        self.store
            .transaction(|tx| tx.events_for_candidate(candidate))
            .expect("events read")
    }

    pub(super) fn machine(&self) -> DocumentStateMachine<ManualClock> {
        DocumentStateMachine::new(self.clock.clone(), 5)
    }

    pub(super) fn apply(
        &self,
        machine: &DocumentStateMachine<ManualClock>,
        id: DocumentId,
        outcome: ClassificationOutcome,
    ) -> crate::revalidation::state_machine::Transition {
        self.store
            .transaction(|tx| machine.apply(tx, id, &outcome))
            .expect("transition applied")
    }

    pub(super) fn scheduler(
        &self,
        classifier: Arc<ScriptedClassifier>,
        notifier: Arc<RecordingNotifier>,
    ) -> CycleScheduler<InMemoryStore, ManualClock> {
        CycleScheduler::new(
            self.store.clone(),
            collaborators(classifier, notifier),
            self.clock.clone(),
            RevalidationSettings::default(),
        )
    }

    fn clock_now(&self) -> chrono::DateTime<Utc> {
        use crate::revalidation::clock::Clock;
        self.clock.now()
    }
}

pub(super) fn collaborators(
    classifier: Arc<ScriptedClassifier>,
    notifier: Arc<RecordingNotifier>,
) -> Collaborators {
    Collaborators {
        classifier,
        source: Arc::new(StaticSource::default()),
        notifier,
    }
}

pub(super) fn success(code: &str) -> ClassificationOutcome {
    ClassificationOutcome::Success {
        type_code: code.to_string(),
        detail: None,
    }
}

/// Classifier answering from per-file scripts; unscripted files get a processing error.
#[derive(Default)]
pub(super) struct ScriptedClassifier {
    replies: Mutex<HashMap<String, VecDeque<String>>>,
    calls: Mutex<Vec<FileRef>>,
}

impl ScriptedClassifier {
    pub(super) fn reply(self: &Arc<Self>, document: &Document, raw: &str) -> Arc<Self> {
        let file = document.file.clone().expect("document has a file");
        self.replies
            .lock()
            .expect("classifier mutex poisoned")
            .entry(file.0)
            .or_default()
            .push_back(raw.to_string());
        Arc::clone(self)
    }

    pub(super) fn calls(&self) -> Vec<FileRef> {
        self.calls.lock().expect("classifier mutex poisoned").clone()
    }
}

impl ClassifierClient for ScriptedClassifier {
    fn classify(&self, content: &DocumentContent) -> ClassifierResponse {
        self.calls
            .lock()
            .expect("classifier mutex poisoned")
            .push(content.file.clone());
        let reply = self
            .replies
            .lock()
            .expect("classifier mutex poisoned")
            .get_mut(&content.file.0)
            .and_then(VecDeque::pop_front);
        match reply {
            Some(raw) => ClassifierResponse {
                response_bytes: raw.len(),
                outcome: ClassificationOutcome::from_raw(&raw),
            },
            None => ClassifierResponse {
                outcome: ClassificationOutcome::processing_error("no scripted reply"),
                response_bytes: 0,
            },
        }
    }
}

/// Serves placeholder bytes for every file except the ones marked missing.
#[derive(Default)]
pub(super) struct StaticSource {
    missing: HashSet<String>,
}

impl StaticSource {
    pub(super) fn without(files: &[&str]) -> Self {
        Self {
            missing: files.iter().map(|file| file.to_string()).collect(),
        }
    }
}

impl DocumentSource for StaticSource {
    fn load(&self, file: &FileRef) -> Result<DocumentContent, SourceError> {
        if self.missing.contains(&file.0) {
            return Err(SourceError::Missing(file.clone()));
        }
        Ok(DocumentContent {
            file: file.clone(),
            bytes: b"%PDF-1.4 scanned page".to_vec(),
        })
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub(super) fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub(super) fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().expect("notifier mutex poisoned").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, phone: &str, text: &str) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Transport("gateway offline".to_string()));
        }
        self.messages
            .lock()
            .expect("notifier mutex poisoned")
            .push((phone.to_string(), text.to_string()));
        Ok(())
    }
}

/// Store whose updates to one document always fail, for exercising per-document isolation.
pub(super) struct FailingUpdateStore {
    pub(super) inner: Arc<InMemoryStore>,
    pub(super) target: DocumentId,
}

impl DocumentStore for FailingUpdateStore {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let target = self.target;
        self.inner.transaction(|tx| {
            let mut guarded = FailOnUpdate { inner: tx, target };
            work(&mut guarded)
        })
    }
}

struct FailOnUpdate<'a> {
    inner: &'a mut dyn StoreTransaction,
    target: DocumentId,
}

impl StoreTransaction for FailOnUpdate<'_> {
    fn candidates(&self) -> Result<Vec<Candidate>, RepositoryError> {
        self.inner.candidates()
    }

    fn candidate(&self, id: CandidateId) -> Result<Option<Candidate>, RepositoryError> {
        self.inner.candidate(id)
    }

    fn insert_candidate(&mut self, candidate: NewCandidate) -> Result<Candidate, RepositoryError> {
        self.inner.insert_candidate(candidate)
    }

    fn update_candidate(&mut self, candidate: &Candidate) -> Result<(), RepositoryError> {
        self.inner.update_candidate(candidate)
    }

    fn document_type(
        &self,
        code: DocumentTypeCode,
    ) -> Result<Option<DocumentType>, RepositoryError> {
        self.inner.document_type(code)
    }

    fn document_types(&self) -> Result<Vec<DocumentType>, RepositoryError> {
        self.inner.document_types()
    }

    fn documents_for(&self, candidate: CandidateId) -> Result<Vec<Document>, RepositoryError> {
        self.inner.documents_for(candidate)
    }

    fn document(&self, id: DocumentId) -> Result<Option<Document>, RepositoryError> {
        self.inner.document(id)
    }

    fn insert_document(&mut self, document: NewDocument) -> Result<Document, RepositoryError> {
        self.inner.insert_document(document)
    }

    fn update_document(&mut self, document: &Document) -> Result<(), RepositoryError> {
        if document.id == self.target {
            return Err(RepositoryError::Unavailable("disk full".to_string()));
        }
        self.inner.update_document(document)
    }

    fn delete_document(&mut self, id: DocumentId) -> Result<(), RepositoryError> {
        self.inner.delete_document(id)
    }

    fn latest_event_for_document(
        &self,
        id: DocumentId,
    ) -> Result<Option<TimelineEvent>, RepositoryError> {
        self.inner.latest_event_for_document(id)
    }

    fn latest_event_for_candidate(
        &self,
        id: CandidateId,
    ) -> Result<Option<TimelineEvent>, RepositoryError> {
        self.inner.latest_event_for_candidate(id)
    }

    fn append_event(&mut self, event: NewTimelineEvent) -> Result<TimelineEvent, RepositoryError> {
        self.inner.append_event(event)
    }

    fn events_for_candidate(
        &self,
        id: CandidateId,
    ) -> Result<Vec<TimelineEvent>, RepositoryError> {
        self.inner.events_for_candidate(id)
    }

    fn detach_orphaned_events(&mut self) -> Result<usize, RepositoryError> {
        self.inner.detach_orphaned_events()
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) fn assert_not_found(response: &Response) {
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
