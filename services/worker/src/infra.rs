use candidate_docs::config::{AppConfig, StorageConfig};
use candidate_docs::error::AppError;
use candidate_docs::revalidation::{
    ClassificationOutcome, ClassifierClient, ClassifierResponse, Collaborators, CycleScheduler,
    DocumentCatalog, DocumentContent, FsDocumentSource, InMemoryStore, LastCycle, Notifier,
    NotifyError, SystemClock,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) type WorkerScheduler = CycleScheduler<InMemoryStore, SystemClock>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) last_cycle: LastCycle,
}

/// Store plus the scheduler wired to the filesystem source and the configured limits.
pub(crate) struct Engine {
    pub(crate) store: Arc<InMemoryStore>,
    pub(crate) clock: Arc<SystemClock>,
    pub(crate) scheduler: Arc<WorkerScheduler>,
}

impl Engine {
    pub(crate) fn build(config: &AppConfig) -> Result<Self, AppError> {
        let catalog = load_catalog(&config.storage)?;
        let store = Arc::new(InMemoryStore::new(&catalog));
        let clock = Arc::new(SystemClock);
        let collaborators = Collaborators {
            classifier: Arc::new(SidecarClassifier::new(&config.storage.document_root)),
            source: Arc::new(FsDocumentSource::new(&config.storage.document_root)),
            notifier: Arc::new(LogNotifier),
        };
        let scheduler = Arc::new(CycleScheduler::new(
            store.clone(),
            collaborators,
            clock.clone(),
            config.engine.settings(),
        ));
        Ok(Self {
            store,
            clock,
            scheduler,
        })
    }
}

pub(crate) fn load_catalog(storage: &StorageConfig) -> Result<DocumentCatalog, AppError> {
    match &storage.document_types_csv {
        Some(path) => {
            let catalog = DocumentCatalog::from_path(path)?;
            info!(path = %path.display(), types = catalog.types().count(), "document catalog loaded");
            Ok(catalog)
        }
        None => Ok(DocumentCatalog::standard()),
    }
}

/// Replays classifier answers recorded next to each document as `<file>.label`.
///
/// A document without a label is treated as the classifier being unavailable, so it is
/// deferred rather than charged a retry.
pub(crate) struct SidecarClassifier {
    root: PathBuf,
}

impl SidecarClassifier {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn label_path(&self, content: &DocumentContent) -> PathBuf {
        self.root.join(format!("{}.label", content.file.0))
    }
}

impl ClassifierClient for SidecarClassifier {
    fn classify(&self, content: &DocumentContent) -> ClassifierResponse {
        match std::fs::read_to_string(self.label_path(content)) {
            Ok(raw) => ClassifierResponse {
                response_bytes: raw.len(),
                outcome: ClassificationOutcome::from_raw(&raw),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => ClassifierResponse {
                outcome: ClassificationOutcome::Overloaded,
                response_bytes: 0,
            },
            Err(err) => ClassifierResponse {
                outcome: ClassificationOutcome::processing_error(format!(
                    "failed to read classifier label: {err}"
                )),
                response_bytes: 0,
            },
        }
    }
}

/// Writes outgoing candidate messages to the log instead of a messaging gateway.
pub(crate) struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, phone: &str, text: &str) -> Result<(), NotifyError> {
        if phone.trim().is_empty() {
            warn!("dropping candidate message without a phone number");
            return Err(NotifyError::Recipient(phone.to_string()));
        }
        info!(phone = %mask_phone(phone), message = %text, "candidate notified");
        Ok(())
    }
}

fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    let visible = digits.len().saturating_sub(4);
    digits
        .iter()
        .enumerate()
        .map(|(index, digit)| if index < visible { '*' } else { *digit })
        .collect()
}
