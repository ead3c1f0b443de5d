//! Periodic revalidation of candidate documents against an external classifier.
//!
//! Components, leaf first: [`rate_limit`] gates outbound calls, [`classifier`] performs them,
//! [`resolver`] maps raw codes onto the closed type set, [`state_machine`] applies outcomes
//! (delegating to [`dedup`]), [`aggregator`] derives candidate status, [`timeline`] records
//! every transition, and [`scheduler`] runs it all under a [`lease`].

pub mod aggregator;
pub mod catalog;
pub mod classifier;
pub mod clock;
pub mod dedup;
pub mod domain;
pub mod intake;
pub mod lease;
pub mod memory;
pub mod notify;
pub mod rate_limit;
pub mod repository;
pub mod resolver;
pub mod router;
pub mod scheduler;
pub mod state_machine;
pub mod timeline;

#[cfg(test)]
mod tests;

pub use aggregator::{CandidateStatusAggregator, StatusChange};
pub use catalog::{CatalogError, DocumentCatalog};
pub use classifier::{
    ClassificationOutcome, ClassifierClient, ClassifierError, ClassifierResponse, FnClassifier,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dedup::{DedupResolver, MergeOutcome};
pub use domain::{
    Applicability, Candidate, CandidateId, CandidateStatus, ContractType, Document, DocumentId,
    DocumentStatus, DocumentType, DocumentTypeCode, EventId, FileRef, NewCandidate, NewDocument,
    TimelineEvent, TimelineEventType, TrackedStatus,
};
pub use intake::{DocumentIntake, IntakeError};
pub use lease::{FileLease, Lease, LeaseError, LeaseRegistry, MemoryLease, ProcessLease};
pub use memory::InMemoryStore;
pub use notify::StatusNotifier;
pub use rate_limit::{estimate_cost_units, RateLimitConfig, RateLimiter};
pub use repository::{
    CandidateStatusView, DocumentContent, DocumentSource, DocumentStatusView, DocumentStore,
    FsDocumentSource, Notifier, NotifyError, RepositoryError, SourceError, StoreTransaction,
};
pub use resolver::{ResolvedType, TypeResolver};
pub use router::{candidate_router, TimelineEventView};
pub use scheduler::{
    Collaborators, CycleReport, CycleScheduler, CycleTarget, EngineError, LastCycle,
    RevalidationSettings,
};
pub use state_machine::{DocumentStateMachine, SkipReason, Transition, MAX_RETRY_CEILING};
pub use timeline::{TimelineEntry, TimelineRecorder};
