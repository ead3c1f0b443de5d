//! Drives revalidation cycles.
//!
//! A cycle walks the selected candidates, classifies each eligible document in ascending id
//! order, applies the outcome, sweeps duplicates, recomputes the candidate status, and finally
//! repairs timeline references to deleted documents. A failure on one document is logged and
//! counted; the cycle moves on.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::aggregator::{CandidateStatusAggregator, StatusChange};
use super::classifier::{ClassificationOutcome, ClassifierClient};
use super::clock::Clock;
use super::domain::{CandidateId, CandidateStatus, Document, DocumentStatus};
use super::lease::{LeaseError, ProcessLease};
use super::notify::StatusNotifier;
use super::rate_limit::{estimate_cost_units, RateLimitConfig, RateLimiter};
use super::repository::{DocumentSource, DocumentStore, Notifier, RepositoryError, StoreTransaction};
use super::state_machine::{DocumentStateMachine, Transition, MAX_RETRY_CEILING};
use super::timeline::TimelineRecorder;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevalidationSettings {
    pub max_retries: u8,
    pub rate_limit: RateLimitConfig,
    pub interval: Duration,
}

impl Default for RevalidationSettings {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRY_CEILING,
            rate_limit: RateLimitConfig::default(),
            interval: DEFAULT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTarget {
    All,
    Candidate(CandidateId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub candidates: usize,
    pub classified: usize,
    pub validated: usize,
    pub invalidated: usize,
    pub deferred: usize,
    pub removed_duplicates: usize,
    pub merged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub status_changes: Vec<StatusChange>,
    pub notifications_sent: usize,
    pub orphaned_events_detached: usize,
    pub cancelled: bool,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            candidates: 0,
            classified: 0,
            validated: 0,
            invalidated: 0,
            deferred: 0,
            removed_duplicates: 0,
            merged: 0,
            skipped: 0,
            failed: 0,
            status_changes: Vec::new(),
            notifications_sent: 0,
            orphaned_events_detached: 0,
            cancelled: false,
        }
    }

    fn count(&mut self, transition: &Transition) {
        match transition {
            Transition::Deferred { .. } => self.deferred += 1,
            Transition::Invalidated { .. } => self.invalidated += 1,
            Transition::Validated { .. } => self.validated += 1,
            Transition::RemovedDuplicate { .. } => self.removed_duplicates += 1,
            Transition::MergedIntoPending { swept, .. } => {
                self.merged += 1;
                self.removed_duplicates += swept.len();
            }
            Transition::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Shared handle to the most recent cycle report, read by the status API.
#[derive(Debug, Clone, Default)]
pub struct LastCycle(Arc<RwLock<Option<CycleReport>>>);

impl LastCycle {
    pub fn get(&self) -> Option<CycleReport> {
        self.0
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set(&self, report: CycleReport) {
        *self
            .0
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(report);
    }
}

/// External boundaries the scheduler calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn ClassifierClient>,
    pub source: Arc<dyn DocumentSource>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Lease(#[from] LeaseError),
    #[error("revalidation lease is held by another process")]
    LeaseHeld,
    #[error("revalidation cycle task failed: {0}")]
    Task(String),
}

pub struct CycleScheduler<S, K> {
    store: Arc<S>,
    classifier: Arc<dyn ClassifierClient>,
    source: Arc<dyn DocumentSource>,
    status_notifier: StatusNotifier,
    limiter: RateLimiter<K>,
    machine: DocumentStateMachine<K>,
    aggregator: CandidateStatusAggregator<K>,
    clock: Arc<K>,
    settings: RevalidationSettings,
    last_cycle: LastCycle,
    running: Mutex<()>,
}

impl<S, K> CycleScheduler<S, K>
where
    S: DocumentStore + 'static,
    K: Clock + 'static,
{
    pub fn new(
        store: Arc<S>,
        collaborators: Collaborators,
        clock: Arc<K>,
        settings: RevalidationSettings,
    ) -> Self {
        let recorder = TimelineRecorder::new(Arc::clone(&clock));
        Self {
            store,
            classifier: collaborators.classifier,
            source: collaborators.source,
            status_notifier: StatusNotifier::new(collaborators.notifier),
            limiter: RateLimiter::new(settings.rate_limit, Arc::clone(&clock)),
            machine: DocumentStateMachine::new(Arc::clone(&clock), settings.max_retries),
            aggregator: CandidateStatusAggregator::new(recorder),
            clock,
            settings,
            last_cycle: LastCycle::default(),
            running: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> RevalidationSettings {
        self.settings
    }

    pub fn last_cycle(&self) -> LastCycle {
        self.last_cycle.clone()
    }

    pub fn limiter(&self) -> &RateLimiter<K> {
        &self.limiter
    }

    /// Runs one full cycle synchronously.
    pub fn run_cycle(&self, target: CycleTarget) -> Result<CycleReport, EngineError> {
        self.execute(target, &CancellationToken::new())
    }

    /// Manual cycle on behalf of a process that shares `lease` with its loop. Fails with
    /// `LeaseHeld` when another process owns the lease.
    pub fn run_manual(
        &self,
        lease: &ProcessLease,
        target: CycleTarget,
    ) -> Result<CycleReport, EngineError> {
        if !lease.try_start()? {
            return Err(EngineError::LeaseHeld);
        }
        self.run_cycle(target)
    }

    /// Holds the lease and runs cycles every interval until `cancel` fires. Returns
    /// immediately when another process owns the lease, and with an error when the lease
    /// cannot be checked at all.
    pub async fn run(
        self: Arc<Self>,
        lease: Arc<ProcessLease>,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        match lease.try_start() {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(err) => {
                error!(error = %err, "could not acquire revalidation lease");
                return Err(EngineError::Lease(err));
            }
        }

        loop {
            let scheduler = Arc::clone(&self);
            let token = cancel.clone();
            let cycle = tokio::task::spawn_blocking(move || scheduler.execute(CycleTarget::All, &token));
            match cycle.await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => error!(error = %err, "revalidation cycle failed"),
                Err(err) => error!(error = %EngineError::Task(err.to_string()), "revalidation cycle aborted"),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("revalidation loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }

        lease.shutdown()?;
        Ok(())
    }

    fn execute(
        &self,
        target: CycleTarget,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, EngineError> {
        // Loop and manual cycles never interleave.
        let _running = self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut report = CycleReport::new(self.clock.now());
        let candidates = self
            .store
            .transaction(|tx| select_candidates(tx, target))?;
        report.candidates = candidates.len();
        info!(
            candidates = candidates.len(),
            max_retries = self.machine.max_retries(),
            "revalidation cycle started"
        );

        for candidate in candidates {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.process_candidate(candidate, &mut report);
        }

        match self.store.transaction(|tx| tx.detach_orphaned_events()) {
            Ok(detached) => report.orphaned_events_detached = detached,
            Err(err) => warn!(error = %err, "orphaned timeline cleanup failed"),
        }

        report.finished_at = Some(self.clock.now());
        info!(
            candidates = report.candidates,
            classified = report.classified,
            validated = report.validated,
            invalidated = report.invalidated,
            deferred = report.deferred,
            failed = report.failed,
            "revalidation cycle finished"
        );
        self.last_cycle.set(report.clone());
        Ok(report)
    }

    fn process_candidate(&self, candidate: CandidateId, report: &mut CycleReport) {
        let documents = match self.store.transaction(|tx| tx.documents_for(candidate)) {
            Ok(documents) => documents,
            Err(err) => {
                warn!(candidate = %candidate, error = %err, "could not load documents");
                report.failed += 1;
                return;
            }
        };

        for document in documents
            .into_iter()
            .filter(|document| self.machine.is_eligible(document))
        {
            if let Err(err) = self.process_document(&document, report) {
                warn!(
                    candidate = %candidate,
                    document = %document.id,
                    error = %err,
                    "document revalidation failed"
                );
                report.failed += 1;
            }
        }

        let settled = self.store.transaction(|tx| {
            let removed = self.machine.dedup().remove_duplicates_general(tx, candidate)?;
            // Candidates with nothing requested yet are left to the onboarding flow.
            let change = if tx.documents_for(candidate)?.is_empty() {
                None
            } else {
                self.aggregator.recompute(tx, candidate)?
            };
            Ok::<_, RepositoryError>((removed, change))
        });
        match settled {
            Ok((removed, change)) => {
                report.removed_duplicates += removed.len();
                if let Some(change) = change {
                    info!(
                        candidate = %candidate,
                        from = change.from.label(),
                        to = change.to.label(),
                        "candidate status changed"
                    );
                    report.status_changes.push(change);
                    if change.to == CandidateStatus::DocumentsInvalid && self.notify(candidate) {
                        report.notifications_sent += 1;
                    }
                }
            }
            Err(err) => {
                warn!(candidate = %candidate, error = %err, "candidate status update failed");
                report.failed += 1;
            }
        }
    }

    fn process_document(
        &self,
        document: &Document,
        report: &mut CycleReport,
    ) -> Result<(), RepositoryError> {
        // An earlier merge in this cycle may have removed or settled the document.
        let current = self.store.transaction(|tx| tx.document(document.id))?;
        let Some(current) = current.filter(|current| self.machine.is_eligible(current)) else {
            report.skipped += 1;
            return Ok(());
        };

        let outcome = self.classify(&current, report);
        if outcome.is_transient() {
            debug!(document = %current.id, "classifier unavailable; deferring");
        }
        let transition = self
            .store
            .transaction(|tx| self.machine.apply(tx, current.id, &outcome))?;
        debug!(document = %current.id, ?transition, "document revalidated");
        report.count(&transition);
        Ok(())
    }

    fn classify(&self, document: &Document, report: &mut CycleReport) -> ClassificationOutcome {
        let Some(file) = document.file.as_ref() else {
            return ClassificationOutcome::processing_error("no file attached");
        };
        let content = match self.source.load(file) {
            Ok(content) => content,
            Err(err) => return ClassificationOutcome::processing_error(err.to_string()),
        };

        self.limiter.throttle();
        let response = self.classifier.classify(&content);
        report.classified += 1;
        self.limiter
            .record_cost(estimate_cost_units(response.response_bytes));
        response.outcome
    }

    fn notify(&self, candidate: CandidateId) -> bool {
        let loaded = self.store.transaction(|tx| {
            let record = tx.candidate(candidate)?;
            let documents = tx.documents_for(candidate)?;
            Ok::<_, RepositoryError>(record.map(|record| (record, documents)))
        });
        let (record, documents) = match loaded {
            Ok(Some(loaded)) => loaded,
            Ok(None) => return false,
            Err(err) => {
                warn!(candidate = %candidate, error = %err, "could not load candidate for notification");
                return false;
            }
        };
        match self.status_notifier.documents_invalid(&record, &documents) {
            Ok(sent) => sent,
            Err(err) => {
                warn!(candidate = %candidate, error = %err, "candidate notification failed");
                false
            }
        }
    }
}

/// Candidates a cycle visits, ascending by id. Terminal candidates (completed or rejected)
/// are revisited only while they still have a document marked as not possessed.
fn select_candidates(
    tx: &mut dyn StoreTransaction,
    target: CycleTarget,
) -> Result<Vec<CandidateId>, RepositoryError> {
    let candidates = match target {
        CycleTarget::All => tx.candidates()?,
        CycleTarget::Candidate(id) => vec![tx
            .candidate(id)?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?],
    };

    let mut selected = Vec::new();
    for candidate in candidates {
        let eligible = !candidate.status.is_terminal()
            || tx
                .documents_for(candidate.id)?
                .iter()
                .any(|document| document.status == DocumentStatus::NotPossessed);
        if eligible {
            selected.push(candidate.id);
        }
    }
    Ok(selected)
}
