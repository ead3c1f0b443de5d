use candidate_docs::error::AppError;
use candidate_docs::revalidation::{
    CandidateId, CandidateStatus, Collaborators, ContractType, CycleReport, CycleScheduler,
    CycleTarget, DocumentCatalog, DocumentContent, DocumentIntake, DocumentSource, DocumentStatus,
    DocumentStore, DocumentTypeCode, FileRef, FnClassifier, InMemoryStore, NewCandidate, Notifier,
    NotifyError, RateLimitConfig, RepositoryError, RevalidationSettings, SourceError, SystemClock,
    TimelineEvent, MAX_RETRY_CEILING,
};
use clap::Args;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Retry budget for the demo run (1-5). Defaults to 5.
    #[arg(long)]
    pub(crate) max_retries: Option<u8>,
    /// Print every candidate's timeline after the cycle.
    #[arg(long)]
    pub(crate) show_timeline: bool,
}

/// Files the demo candidates upload, paired with the classifier's scripted reply.
const UPLOADS: &[(&str, DocumentTypeCode, &str, &str)] = &[
    ("helena", DocumentTypeCode::IdentityCard, "helena/rg.jpg", "rg"),
    ("helena", DocumentTypeCode::TaxId, "helena/cpf.jpg", "cpf"),
    ("helena", DocumentTypeCode::ProofOfAddress, "helena/bill.pdf", "utility_bill"),
    ("helena", DocumentTypeCode::BankAccount, "helena/bank.pdf", "dados_bancarios"),
    ("helena", DocumentTypeCode::FacePhoto, "helena/selfie.jpg", "selfie"),
    ("helena", DocumentTypeCode::Others, "helena/extra.pdf", "identidade"),
    ("otavio", DocumentTypeCode::IdentityCard, "otavio/rg.jpg", "rg"),
    ("otavio", DocumentTypeCode::Others, "otavio/scan.pdf", "other|<b>CTPS</b>"),
    ("otavio", DocumentTypeCode::ProofOfAddress, "otavio/bill.pdf", "other|crumpled receipt"),
    ("otavio", DocumentTypeCode::TaxId, "otavio/cpf.jpg", "overloaded"),
];

struct InlineSource;

impl DocumentSource for InlineSource {
    fn load(&self, file: &FileRef) -> Result<DocumentContent, SourceError> {
        Ok(DocumentContent {
            file: file.clone(),
            bytes: format!("demo scan of {}", file.0).into_bytes(),
        })
    }
}

struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, phone: &str, text: &str) -> Result<(), NotifyError> {
        println!("\nMessage to {phone}:\n{text}");
        Ok(())
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        max_retries,
        show_timeline,
    } = args;

    let store = Arc::new(InMemoryStore::new(&DocumentCatalog::standard()));
    let clock = Arc::new(SystemClock);
    let candidates = seed(&store, &clock)?;

    let replies: HashMap<String, String> = UPLOADS
        .iter()
        .map(|(_, _, file, raw)| (file.to_string(), raw.to_string()))
        .collect();
    let classifier = FnClassifier::new(move |content: &DocumentContent| {
        Ok(replies
            .get(&content.file.0)
            .cloned()
            .unwrap_or_else(|| "other|unknown upload".to_string()))
    });
    let scheduler = CycleScheduler::new(
        store.clone(),
        Collaborators {
            classifier: Arc::new(classifier),
            source: Arc::new(InlineSource),
            notifier: Arc::new(ConsoleNotifier),
        },
        clock,
        RevalidationSettings {
            max_retries: max_retries.unwrap_or(MAX_RETRY_CEILING),
            rate_limit: RateLimitConfig::default(),
            ..RevalidationSettings::default()
        },
    );

    println!("Candidate document revalidation demo");
    let report = scheduler.run_cycle(CycleTarget::All)?;
    render_report(&report);

    for (name, id) in &candidates {
        let (status, documents, events) = store.transaction(|tx| {
            let candidate = tx
                .candidate(*id)?
                .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
            Ok::<_, RepositoryError>((
                candidate.status,
                tx.documents_for(*id)?,
                tx.events_for_candidate(*id)?,
            ))
        })?;
        println!("\n{name} ({id}) is now {}", status.label());
        for document in &documents {
            let notes = if document.notes.is_empty() {
                String::new()
            } else {
                format!(" - {}", document.notes)
            };
            println!(
                "- {:<22} {:<10} retries {}{}",
                document.type_code.as_str(),
                document.status.label(),
                document.retry_count,
                notes
            );
        }
        if show_timeline {
            render_timeline(&events);
        }
    }

    Ok(())
}

fn seed(
    store: &Arc<InMemoryStore>,
    clock: &Arc<SystemClock>,
) -> Result<Vec<(&'static str, CandidateId)>, AppError> {
    let intake = DocumentIntake::new(store.clone(), clock.clone());
    let people = [
        ("helena", "Helena Prado", ContractType::Contractor, "+55 11 91234-5678"),
        ("otavio", "Otavio Reis", ContractType::Employee, "+55 41 99876-5432"),
    ];

    let mut seeded = Vec::new();
    for (key, full_name, contract_type, phone) in people {
        let candidate = store.transaction(|tx| {
            tx.insert_candidate(NewCandidate {
                full_name: full_name.to_string(),
                phone: Some(phone.to_string()),
                status: CandidateStatus::AwaitingStart,
                contract_type,
            })
        })?;
        intake.start_process(candidate.id)?;
        for (_, type_code, file, _) in UPLOADS.iter().filter(|upload| upload.0 == key) {
            intake.receive_file(candidate.id, *type_code, FileRef(file.to_string()))?;
        }
        seeded.push((key, candidate.id));
    }

    // Otavio declares he has no voter registration.
    let otavio = seeded[1].1;
    let voter = store.transaction(|tx| {
        tx.documents_matching(otavio, DocumentTypeCode::VoterRegistration, DocumentStatus::Pending)
    })?;
    if let Some(document) = voter.into_iter().next() {
        intake.mark_not_possessed(document.id, "never issued")?;
    }

    Ok(seeded)
}

fn render_report(report: &CycleReport) {
    println!("\nCycle summary");
    println!(
        "- {} candidates | {} classifier calls",
        report.candidates, report.classified
    );
    println!(
        "- {} validated | {} invalidated | {} deferred",
        report.validated, report.invalidated, report.deferred
    );
    println!(
        "- {} merged into pending slots | {} duplicates removed | {} failed",
        report.merged, report.removed_duplicates, report.failed
    );
    for change in &report.status_changes {
        println!(
            "- {} moved from {} to {}",
            change.candidate_id,
            change.from.label(),
            change.to.label()
        );
    }
}

fn render_timeline(events: &[TimelineEvent]) {
    println!("  Timeline");
    for event in events {
        let subject = event
            .document_id
            .map(|id| format!("doc {}", id.0))
            .unwrap_or_else(|| "candidate".to_string());
        let waited = event
            .duration_since_previous
            .map(|duration| format!(" (+{}s)", duration.as_secs()))
            .unwrap_or_default();
        println!(
            "  {} {:<24} {}{}",
            event.occurred_at.format("%H:%M:%S"),
            event.event_type.label(),
            subject,
            waited
        );
    }
}
