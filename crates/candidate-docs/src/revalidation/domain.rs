use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for onboarding candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateId(pub u64);

/// Identifier wrapper for submitted documents. Ordering is the processing order within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cand-{:06}", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc-{:06}", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt-{:06}", self.0)
    }
}

/// Aggregate onboarding status tracked per candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Active,
    AwaitingStart,
    InProgress,
    DocumentsPending,
    DocumentsInvalid,
    Completed,
    Rejected,
}

impl CandidateStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::AwaitingStart => "awaiting_start",
            Self::InProgress => "in_progress",
            Self::DocumentsPending => "documents_pending",
            Self::DocumentsInvalid => "documents_invalid",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }
}

/// The two hiring arrangements; document requirements differ between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractType {
    Employee,
    Contractor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Received,
    Invalid,
    Validated,
    NotPossessed,
}

impl DocumentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Received => "received",
            Self::Invalid => "invalid",
            Self::Validated => "validated",
            Self::NotPossessed => "not_possessed",
        }
    }
}

/// Closed set of canonical document type codes. Raw classifier codes are mapped onto these
/// by [`crate::revalidation::resolver::TypeResolver`]; anything unmapped becomes `Others`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentTypeCode {
    IdentityCard,
    TaxId,
    WorkRecord,
    Reservist,
    VoterRegistration,
    ProofOfAddress,
    BirthCertificate,
    MarriageCertificate,
    EducationCertificate,
    BankAccount,
    SocialSecurity,
    DriverLicense,
    VaccinationCard,
    FacePhoto,
    Others,
}

impl DocumentTypeCode {
    pub const ALL: [Self; 15] = [
        Self::IdentityCard,
        Self::TaxId,
        Self::WorkRecord,
        Self::Reservist,
        Self::VoterRegistration,
        Self::ProofOfAddress,
        Self::BirthCertificate,
        Self::MarriageCertificate,
        Self::EducationCertificate,
        Self::BankAccount,
        Self::SocialSecurity,
        Self::DriverLicense,
        Self::VaccinationCard,
        Self::FacePhoto,
        Self::Others,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IdentityCard => "IDENTITY_CARD",
            Self::TaxId => "TAX_ID",
            Self::WorkRecord => "WORK_RECORD",
            Self::Reservist => "RESERVIST",
            Self::VoterRegistration => "VOTER_REGISTRATION",
            Self::ProofOfAddress => "PROOF_OF_ADDRESS",
            Self::BirthCertificate => "BIRTH_CERTIFICATE",
            Self::MarriageCertificate => "MARRIAGE_CERTIFICATE",
            Self::EducationCertificate => "EDUCATION_CERTIFICATE",
            Self::BankAccount => "BANK_ACCOUNT",
            Self::SocialSecurity => "SOCIAL_SECURITY",
            Self::DriverLicense => "DRIVER_LICENSE",
            Self::VaccinationCard => "VACCINATION_CARD",
            Self::FacePhoto => "FACE_PHOTO",
            Self::Others => "OTHERS",
        }
    }

    /// Parses a canonical code exactly as rendered by [`Self::as_str`], ignoring ASCII case.
    pub fn from_canonical(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|code| code.as_str().eq_ignore_ascii_case(raw))
    }
}

impl fmt::Display for DocumentTypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which contract types a document type is required for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Applicability {
    Employee,
    Contractor,
    Both,
}

impl Applicability {
    pub const fn applies_to(self, contract: ContractType) -> bool {
        matches!(
            (self, contract),
            (Self::Both, _)
                | (Self::Employee, ContractType::Employee)
                | (Self::Contractor, ContractType::Contractor)
        )
    }
}

/// Reference data describing a kind of required document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentType {
    pub code: DocumentTypeCode,
    pub name: String,
    pub mandatory: bool,
    pub applicability: Applicability,
    pub active: bool,
}

impl DocumentType {
    /// Whether a document of this type counts toward the candidate's aggregate status.
    pub fn is_mandatory_for(&self, contract: ContractType) -> bool {
        self.active && self.mandatory && self.applicability.applies_to(contract)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub full_name: String,
    pub phone: Option<String>,
    pub status: CandidateStatus,
    pub contract_type: ContractType,
}

/// Opaque handle to a stored file (path or blob key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef(pub String);

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub candidate_id: CandidateId,
    pub type_code: DocumentTypeCode,
    pub status: DocumentStatus,
    pub retry_count: u8,
    pub notes: String,
    pub file: Option<FileRef>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub validated_at: Option<DateTime<Utc>>,
    /// Set by reviewers to take the document out of automatic processing.
    pub locked: bool,
}

/// Insert payload; the store assigns the identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub candidate_id: CandidateId,
    pub type_code: DocumentTypeCode,
    pub status: DocumentStatus,
    pub file: Option<FileRef>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCandidate {
    pub full_name: String,
    pub phone: Option<String>,
    pub status: CandidateStatus,
    pub contract_type: ContractType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventType {
    Requested,
    Received,
    Validated,
    Invalidated,
    NotPossessed,
    RemovedDuplicate,
    RemovedReplaced,
    CandidateStatusChanged,
    Deferred,
}

impl TimelineEventType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Invalidated => "invalidated",
            Self::NotPossessed => "not_possessed",
            Self::RemovedDuplicate => "removed_duplicate",
            Self::RemovedReplaced => "removed_replaced",
            Self::CandidateStatusChanged => "candidate_status_changed",
            Self::Deferred => "deferred",
        }
    }
}

/// Status captured on either side of a timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "status", rename_all = "snake_case")]
pub enum TrackedStatus {
    Document(DocumentStatus),
    Candidate(CandidateStatus),
}

impl TrackedStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Document(status) => status.label(),
            Self::Candidate(status) => status.label(),
        }
    }
}

impl From<DocumentStatus> for TrackedStatus {
    fn from(value: DocumentStatus) -> Self {
        Self::Document(value)
    }
}

impl From<CandidateStatus> for TrackedStatus {
    fn from(value: CandidateStatus) -> Self {
        Self::Candidate(value)
    }
}

/// Immutable audit record. Only the document references may later be nulled by orphan cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: EventId,
    pub candidate_id: CandidateId,
    pub document_id: Option<DocumentId>,
    pub related_document_id: Option<DocumentId>,
    pub event_type: TimelineEventType,
    pub prev_status: Option<TrackedStatus>,
    pub new_status: Option<TrackedStatus>,
    pub occurred_at: DateTime<Utc>,
    pub duration_since_previous: Option<Duration>,
    pub notes: Option<String>,
}

/// Event payload handed to the store once the recorder has stamped time and duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTimelineEvent {
    pub candidate_id: CandidateId,
    pub document_id: Option<DocumentId>,
    pub related_document_id: Option<DocumentId>,
    pub event_type: TimelineEventType,
    pub prev_status: Option<TrackedStatus>,
    pub new_status: Option<TrackedStatus>,
    pub occurred_at: DateTime<Utc>,
    pub duration_since_previous: Option<Duration>,
    pub notes: Option<String>,
}
