use super::common::*;
use crate::revalidation::clock::ManualClock;
use crate::revalidation::domain::{
    CandidateStatus, DocumentStatus, DocumentTypeCode, TimelineEventType,
};
use crate::revalidation::lease::{Lease, LeaseError, LeaseRegistry, MemoryLease, ProcessLease};
use crate::revalidation::memory::InMemoryStore;
use crate::revalidation::rate_limit::RateLimitConfig;
use crate::revalidation::scheduler::{
    Collaborators, CycleScheduler, CycleTarget, EngineError, RevalidationSettings,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[test]
fn cycle_applies_outcomes_and_aggregates() {
    let fixture = Fixture::new();
    let candidate = fixture.candidate(CandidateStatus::DocumentsPending);
    let identity =
        fixture.document(candidate, DocumentTypeCode::IdentityCard, DocumentStatus::Received);
    let address =
        fixture.document(candidate, DocumentTypeCode::ProofOfAddress, DocumentStatus::Received);
    let bank = fixture.document(candidate, DocumentTypeCode::BankAccount, DocumentStatus::Invalid);
    let classifier = Arc::new(ScriptedClassifier::default())
        .reply(&identity, "rg")
        .reply(&address, "other|blurry photo of a receipt")
        .reply(&bank, "overloaded");
    let notifier = Arc::new(RecordingNotifier::default());
    let scheduler = fixture.scheduler(classifier.clone(), notifier.clone());

    let report = scheduler.run_cycle(CycleTarget::All).expect("cycle completes");

    assert_eq!(report.candidates, 1);
    assert_eq!(report.classified, 3);
    assert_eq!(report.validated, 1);
    assert_eq!(report.invalidated, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.status_changes.len(), 1);
    assert_eq!(report.status_changes[0].to, CandidateStatus::DocumentsInvalid);
    assert_eq!(report.notifications_sent, 1);

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, "+55 11 98888-7777");
    assert!(messages[0].1.contains("PROOF_OF_ADDRESS"));
    assert!(messages[0].1.contains("BANK_ACCOUNT"));

    assert_eq!(scheduler.last_cycle().get(), Some(report));
    assert_eq!(classifier.calls().len(), 3);
}

#[test]
fn one_failing_document_does_not_stop_its_siblings() {
    let fixture = Fixture::new();
    let candidate = fixture.candidate(CandidateStatus::DocumentsPending);
    let broken = fixture.document(candidate, DocumentTypeCode::TaxId, DocumentStatus::Received);
    let healthy =
        fixture.document(candidate, DocumentTypeCode::IdentityCard, DocumentStatus::Received);
    let classifier = Arc::new(ScriptedClassifier::default())
        .reply(&broken, "cpf")
        .reply(&healthy, "rg");
    let store = Arc::new(FailingUpdateStore {
        inner: fixture.store.clone(),
        target: broken.id,
    });
    let scheduler = CycleScheduler::new(
        store,
        collaborators(classifier, Arc::new(RecordingNotifier::default())),
        fixture.clock.clone(),
        RevalidationSettings::default(),
    );

    let report = scheduler.run_cycle(CycleTarget::All).expect("cycle completes");

    assert_eq!(report.failed, 1);
    assert_eq!(report.validated, 1);
    assert_eq!(fixture.get(broken.id).unwrap().status, DocumentStatus::Received);
    assert_eq!(fixture.get(healthy.id).unwrap().status, DocumentStatus::Validated);
    assert!(report.finished_at.is_some());
}

#[test]
fn missing_files_fail_without_calling_the_classifier() {
    let fixture = Fixture::new();
    let candidate = fixture.candidate(CandidateStatus::DocumentsPending);
    let document = fixture.document(candidate, DocumentTypeCode::TaxId, DocumentStatus::Received);
    let file = document.file.clone().unwrap();
    let classifier = Arc::new(ScriptedClassifier::default());
    let scheduler = CycleScheduler::new(
        fixture.store.clone(),
        Collaborators {
            classifier: classifier.clone(),
            source: Arc::new(StaticSource::without(&[file.0.as_str()])),
            notifier: Arc::new(RecordingNotifier::default()),
        },
        fixture.clock.clone(),
        RevalidationSettings::default(),
    );

    let report = scheduler.run_cycle(CycleTarget::All).unwrap();

    assert_eq!(report.invalidated, 1);
    assert_eq!(report.classified, 0);
    assert!(classifier.calls().is_empty());
    let stored = fixture.get(document.id).unwrap();
    assert_eq!(stored.retry_count, 1);
    assert!(stored.notes.contains("not found"));
    assert_eq!(scheduler.limiter().snapshot().requests, 0);
}

#[test]
fn terminal_candidates_are_selected_only_with_not_possessed_documents() {
    let fixture = Fixture::new();
    let rejected = fixture.candidate(CandidateStatus::Rejected);
    let rejected_doc =
        fixture.document(rejected, DocumentTypeCode::TaxId, DocumentStatus::Received);
    let completed = fixture.candidate(CandidateStatus::Completed);
    let completed_doc =
        fixture.document(completed, DocumentTypeCode::TaxId, DocumentStatus::Received);
    let reopened = fixture.candidate(CandidateStatus::Completed);
    fixture.document(reopened, DocumentTypeCode::Reservist, DocumentStatus::NotPossessed);
    let reopened_doc =
        fixture.document(reopened, DocumentTypeCode::Reservist, DocumentStatus::Received);
    let classifier = Arc::new(ScriptedClassifier::default())
        .reply(&rejected_doc, "cpf")
        .reply(&completed_doc, "cpf")
        .reply(&reopened_doc, "reservista");
    let scheduler = fixture.scheduler(classifier.clone(), Arc::new(RecordingNotifier::default()));

    let report = scheduler.run_cycle(CycleTarget::All).unwrap();

    assert_eq!(report.candidates, 1);
    assert_eq!(classifier.calls(), vec![reopened_doc.file.clone().unwrap()]);
    assert_eq!(
        fixture.get(rejected_doc.id).unwrap().status,
        DocumentStatus::Received
    );
}

#[test]
fn rejected_candidate_with_not_possessed_document_is_revisited_but_stays_rejected() {
    let fixture = Fixture::new();
    let rejected = fixture.candidate(CandidateStatus::Rejected);
    fixture.document(rejected, DocumentTypeCode::Reservist, DocumentStatus::NotPossessed);
    let upload = fixture.document(rejected, DocumentTypeCode::Reservist, DocumentStatus::Received);
    let classifier = Arc::new(ScriptedClassifier::default()).reply(&upload, "reservista");
    let scheduler = fixture.scheduler(classifier.clone(), Arc::new(RecordingNotifier::default()));

    let report = scheduler.run_cycle(CycleTarget::All).unwrap();

    assert_eq!(report.candidates, 1);
    assert_eq!(classifier.calls(), vec![upload.file.clone().unwrap()]);
    assert_eq!(fixture.get(upload.id).unwrap().status, DocumentStatus::Validated);
    assert!(report.status_changes.is_empty());
    assert_eq!(
        fixture.candidate_record(rejected).status,
        CandidateStatus::Rejected
    );
}

#[test]
fn manual_run_targets_a_single_candidate() {
    let fixture = Fixture::new();
    let first = fixture.candidate(CandidateStatus::DocumentsPending);
    let first_doc = fixture.document(first, DocumentTypeCode::TaxId, DocumentStatus::Received);
    let second = fixture.candidate(CandidateStatus::DocumentsPending);
    let second_doc = fixture.document(second, DocumentTypeCode::TaxId, DocumentStatus::Received);
    let classifier = Arc::new(ScriptedClassifier::default())
        .reply(&first_doc, "cpf")
        .reply(&second_doc, "cpf");
    let scheduler = fixture.scheduler(classifier, Arc::new(RecordingNotifier::default()));

    let report = scheduler.run_cycle(CycleTarget::Candidate(second)).unwrap();

    assert_eq!(report.candidates, 1);
    assert_eq!(fixture.get(first_doc.id).unwrap().status, DocumentStatus::Received);
    assert_eq!(fixture.get(second_doc.id).unwrap().status, DocumentStatus::Validated);
}

#[test]
fn cycle_detaches_references_to_deleted_documents() {
    let fixture = Fixture::new();
    let candidate = fixture.candidate(CandidateStatus::DocumentsPending);
    let slot = fixture.document(candidate, DocumentTypeCode::WorkRecord, DocumentStatus::Pending);
    let upload = fixture.document(candidate, DocumentTypeCode::Others, DocumentStatus::Received);
    let classifier = Arc::new(ScriptedClassifier::default()).reply(&upload, "carteira de trabalho");
    let scheduler = fixture.scheduler(classifier, Arc::new(RecordingNotifier::default()));

    let report = scheduler.run_cycle(CycleTarget::All).unwrap();

    assert_eq!(report.merged, 1);
    assert!(report.orphaned_events_detached >= 2);
    let events = fixture.events(candidate);
    let replaced = events
        .iter()
        .find(|event| event.event_type == TimelineEventType::RemovedReplaced)
        .expect("replacement recorded");
    assert_eq!(replaced.document_id, None);
    assert_eq!(replaced.related_document_id, Some(slot.id));
    let validated = events
        .iter()
        .find(|event| event.event_type == TimelineEventType::Validated)
        .unwrap();
    assert_eq!(validated.document_id, Some(slot.id));
    assert_eq!(validated.related_document_id, None);
}

#[test]
fn request_cap_makes_the_cycle_wait_for_the_next_window() {
    let fixture = Fixture::new();
    let candidate = fixture.candidate(CandidateStatus::DocumentsPending);
    let mut classifier = Arc::new(ScriptedClassifier::default());
    for code in [
        DocumentTypeCode::IdentityCard,
        DocumentTypeCode::TaxId,
        DocumentTypeCode::BankAccount,
    ] {
        let document = fixture.document(candidate, code, DocumentStatus::Received);
        classifier = classifier.reply(&document, code.as_str());
    }
    let scheduler = CycleScheduler::new(
        fixture.store.clone(),
        collaborators(classifier, Arc::new(RecordingNotifier::default())),
        fixture.clock.clone(),
        RevalidationSettings {
            rate_limit: RateLimitConfig {
                requests_per_minute: 2,
                cost_units_per_minute: 5500,
            },
            ..RevalidationSettings::default()
        },
    );

    let report = scheduler.run_cycle(CycleTarget::All).unwrap();

    assert_eq!(report.validated, 3);
    assert_eq!(fixture.clock.sleeps(), vec![Duration::from_secs(60)]);
}

#[test]
fn notifier_failures_are_not_fatal() {
    let fixture = Fixture::new();
    let candidate = fixture.candidate(CandidateStatus::DocumentsPending);
    let document = fixture.document(candidate, DocumentTypeCode::TaxId, DocumentStatus::Received);
    let classifier = Arc::new(ScriptedClassifier::default()).reply(&document, "other|selfie?");
    let scheduler = fixture.scheduler(classifier, Arc::new(RecordingNotifier::failing()));

    let report = scheduler.run_cycle(CycleTarget::All).unwrap();

    assert_eq!(report.notifications_sent, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(
        fixture.candidate_record(candidate).status,
        CandidateStatus::DocumentsInvalid
    );
}

fn looping_scheduler(fixture: &Fixture) -> Arc<CycleScheduler<InMemoryStore, ManualClock>> {
    Arc::new(fixture.scheduler(
        Arc::new(ScriptedClassifier::default()),
        Arc::new(RecordingNotifier::default()),
    ))
}

#[tokio::test]
async fn loop_exits_without_a_cycle_when_the_lease_is_taken() {
    let fixture = Fixture::new();
    let registry = LeaseRegistry::new();
    let holder = ProcessLease::new(MemoryLease::new(registry.clone(), "revalidation"));
    assert!(holder.try_start().unwrap());
    let contender = Arc::new(ProcessLease::new(MemoryLease::new(
        registry.clone(),
        "revalidation",
    )));
    let scheduler = looping_scheduler(&fixture);

    scheduler
        .clone()
        .run(contender.clone(), CancellationToken::new())
        .await
        .expect("contention is not an error");

    assert!(!contender.is_started());
    assert!(scheduler.last_cycle().get().is_none());
}

#[tokio::test]
async fn cancelled_loop_releases_the_lease() {
    let fixture = Fixture::new();
    let registry = LeaseRegistry::new();
    let lease = Arc::new(ProcessLease::new(MemoryLease::new(
        registry.clone(),
        "revalidation",
    )));
    let candidate = fixture.candidate(CandidateStatus::DocumentsPending);
    let document = fixture.document(candidate, DocumentTypeCode::TaxId, DocumentStatus::Received);
    let scheduler = looping_scheduler(&fixture);
    let cancel = CancellationToken::new();
    cancel.cancel();

    scheduler
        .clone()
        .run(lease.clone(), cancel)
        .await
        .expect("loop stops cleanly");

    assert!(!lease.is_started());
    assert!(registry.holder_of("revalidation").is_none());
    let report = scheduler.last_cycle().get().expect("one cycle ran");
    assert!(report.cancelled);
    assert_eq!(fixture.get(document.id).unwrap().status, DocumentStatus::Received);
}

/// A lease whose backing file cannot be opened.
struct UnreadableLease;

impl Lease for UnreadableLease {
    fn acquire(&self) -> Result<bool, LeaseError> {
        Err(LeaseError::Io {
            path: PathBuf::from("/run/revalidation.lock"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied"),
        })
    }

    fn release(&self) -> Result<(), LeaseError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "unreadable lease".to_string()
    }
}

#[tokio::test]
async fn loop_fails_when_the_lease_cannot_be_checked() {
    let fixture = Fixture::new();
    let candidate = fixture.candidate(CandidateStatus::DocumentsPending);
    fixture.document(candidate, DocumentTypeCode::TaxId, DocumentStatus::Received);
    let lease = Arc::new(ProcessLease::new(UnreadableLease));
    let scheduler = looping_scheduler(&fixture);

    let result = scheduler
        .clone()
        .run(lease.clone(), CancellationToken::new())
        .await;

    match result {
        Err(EngineError::Lease(LeaseError::Io { source, .. })) => {
            assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied)
        }
        other => panic!("expected a lease error, got {other:?}"),
    }
    assert!(!lease.is_started());
    assert!(scheduler.last_cycle().get().is_none());
}

#[test]
fn manual_run_shares_the_lease_with_the_loop() {
    let fixture = Fixture::new();
    let candidate = fixture.candidate(CandidateStatus::DocumentsPending);
    let document = fixture.document(candidate, DocumentTypeCode::TaxId, DocumentStatus::Received);
    let classifier = Arc::new(ScriptedClassifier::default()).reply(&document, "cpf");
    let scheduler = fixture.scheduler(classifier.clone(), Arc::new(RecordingNotifier::default()));
    let registry = LeaseRegistry::new();
    let worker = ProcessLease::new(MemoryLease::new(registry.clone(), "revalidation"));
    let other = ProcessLease::new(MemoryLease::new(registry.clone(), "revalidation"));
    assert!(other.try_start().unwrap());

    let refused = scheduler.run_manual(&worker, CycleTarget::Candidate(candidate));
    assert!(matches!(refused, Err(EngineError::LeaseHeld)));
    assert!(classifier.calls().is_empty());
    assert!(scheduler.last_cycle().get().is_none());

    other.shutdown().unwrap();
    let report = scheduler
        .run_manual(&worker, CycleTarget::Candidate(candidate))
        .expect("lease is free");
    assert_eq!(report.validated, 1);
    assert!(worker.is_started());
    assert_eq!(fixture.get(document.id).unwrap().status, DocumentStatus::Validated);
}
