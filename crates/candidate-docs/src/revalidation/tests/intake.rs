use super::common::*;
use crate::revalidation::domain::{
    CandidateStatus, ContractType, DocumentStatus, DocumentTypeCode, FileRef, TimelineEventType,
    TrackedStatus,
};
use crate::revalidation::intake::{DocumentIntake, IntakeError};
use std::time::Duration;

#[test]
fn start_process_requests_every_mandatory_type_once() {
    let fixture = Fixture::new();
    let candidate = fixture.candidate(CandidateStatus::AwaitingStart);
    let intake = DocumentIntake::new(fixture.store.clone(), fixture.clock.clone());

    let requested = intake.start_process(candidate).expect("process starts");

    let codes: Vec<_> = requested.iter().map(|document| document.type_code).collect();
    assert_eq!(
        codes,
        vec![
            DocumentTypeCode::IdentityCard,
            DocumentTypeCode::TaxId,
            DocumentTypeCode::WorkRecord,
            DocumentTypeCode::VoterRegistration,
            DocumentTypeCode::ProofOfAddress,
            DocumentTypeCode::BankAccount,
            DocumentTypeCode::SocialSecurity,
            DocumentTypeCode::FacePhoto,
        ]
    );
    assert!(requested
        .iter()
        .all(|document| document.status == DocumentStatus::Pending));
    assert_eq!(
        fixture.candidate_record(candidate).status,
        CandidateStatus::DocumentsPending
    );

    let again = intake.start_process(candidate).expect("second start is harmless");
    assert!(again.is_empty());

    let events = fixture.events(candidate);
    let requested_events = events
        .iter()
        .filter(|event| event.event_type == TimelineEventType::Requested)
        .count();
    assert_eq!(requested_events, 8);
    assert_eq!(
        events.last().map(|event| event.event_type),
        Some(TimelineEventType::CandidateStatusChanged)
    );
}

#[test]
fn contractors_get_a_shorter_checklist() {
    let fixture = Fixture::new();
    let candidate =
        fixture.candidate_with(CandidateStatus::AwaitingStart, ContractType::Contractor, None);
    let intake = DocumentIntake::new(fixture.store.clone(), fixture.clock.clone());

    let requested = intake.start_process(candidate).unwrap();

    assert_eq!(requested.len(), 5);
    assert!(requested
        .iter()
        .all(|document| document.type_code != DocumentTypeCode::WorkRecord));
}

#[test]
fn received_file_fills_the_pending_slot() {
    let fixture = Fixture::new();
    let candidate = fixture.candidate(CandidateStatus::AwaitingStart);
    let intake = DocumentIntake::new(fixture.store.clone(), fixture.clock.clone());
    let requested = intake.start_process(candidate).unwrap();
    let slot = requested
        .iter()
        .find(|document| document.type_code == DocumentTypeCode::TaxId)
        .unwrap()
        .clone();
    fixture.clock.advance(Duration::from_secs(90));

    let received = intake
        .receive_file(candidate, DocumentTypeCode::TaxId, FileRef("uploads/cpf.jpg".into()))
        .expect("file received");

    assert_eq!(received.id, slot.id);
    assert_eq!(received.status, DocumentStatus::Received);
    assert_eq!(received.file, Some(FileRef("uploads/cpf.jpg".into())));

    let event = fixture
        .events(candidate)
        .into_iter()
        .find(|event| event.event_type == TimelineEventType::Received)
        .expect("received event");
    assert_eq!(event.document_id, Some(slot.id));
    assert_eq!(
        event.prev_status,
        Some(TrackedStatus::Document(DocumentStatus::Pending))
    );
    assert_eq!(event.duration_since_previous, Some(Duration::from_secs(90)));
}

#[test]
fn unsolicited_upload_creates_a_received_document() {
    let fixture = Fixture::new();
    let candidate = fixture.candidate(CandidateStatus::InProgress);
    let intake = DocumentIntake::new(fixture.store.clone(), fixture.clock.clone());

    let received = intake
        .receive_file(candidate, DocumentTypeCode::Others, FileRef("uploads/scan.pdf".into()))
        .unwrap();

    assert_eq!(received.status, DocumentStatus::Received);
    assert_eq!(fixture.documents(candidate).len(), 1);
}

#[test]
fn not_possessed_is_only_allowed_for_outstanding_documents() {
    let fixture = Fixture::new();
    let candidate = fixture.candidate(CandidateStatus::DocumentsPending);
    let pending = fixture.document(candidate, DocumentTypeCode::Reservist, DocumentStatus::Pending);
    let validated = fixture.document(candidate, DocumentTypeCode::TaxId, DocumentStatus::Validated);
    let intake = DocumentIntake::new(fixture.store.clone(), fixture.clock.clone());

    let marked = intake
        .mark_not_possessed(pending.id, "exempt from military service")
        .expect("pending can be marked");
    assert_eq!(marked.status, DocumentStatus::NotPossessed);
    assert_eq!(marked.notes, "exempt from military service");

    match intake.mark_not_possessed(validated.id, "lost it") {
        Err(IntakeError::NotMarkable { document, status }) => {
            assert_eq!(document, validated.id);
            assert_eq!(status, "validated");
        }
        other => panic!("expected not markable, got {other:?}"),
    }
}

#[test]
fn rejected_candidates_cannot_submit() {
    let fixture = Fixture::new();
    let candidate = fixture.candidate(CandidateStatus::Rejected);
    let intake = DocumentIntake::new(fixture.store.clone(), fixture.clock.clone());

    let result = intake.receive_file(candidate, DocumentTypeCode::TaxId, FileRef("x.pdf".into()));

    assert!(matches!(result, Err(IntakeError::CandidateRejected(id)) if id == candidate));
    assert!(fixture.documents(candidate).is_empty());
}
