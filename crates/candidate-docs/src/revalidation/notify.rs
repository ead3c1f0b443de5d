use std::sync::Arc;

use super::domain::{Candidate, Document, DocumentStatus};
use super::repository::{NotifyError, Notifier};

/// Tells a candidate which documents need to be sent again.
#[derive(Clone)]
pub struct StatusNotifier {
    notifier: Arc<dyn Notifier>,
}

impl StatusNotifier {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Returns `Ok(false)` when there is nobody to message: no phone on file, or no
    /// invalid documents left to mention.
    pub fn documents_invalid(
        &self,
        candidate: &Candidate,
        documents: &[Document],
    ) -> Result<bool, NotifyError> {
        let Some(phone) = candidate.phone.as_deref().filter(|phone| !phone.trim().is_empty())
        else {
            return Ok(false);
        };
        let invalid: Vec<&Document> = documents
            .iter()
            .filter(|document| document.status == DocumentStatus::Invalid)
            .collect();
        if invalid.is_empty() {
            return Ok(false);
        }

        self.notifier.notify(phone, &compose(candidate, &invalid))?;
        Ok(true)
    }
}

fn compose(candidate: &Candidate, invalid: &[&Document]) -> String {
    let first_name = candidate
        .full_name
        .split_whitespace()
        .next()
        .unwrap_or("there");
    let mut text = format!(
        "Hi {first_name}, some of your documents could not be validated. Please send them again:"
    );
    for document in invalid {
        text.push_str("\n- ");
        text.push_str(document.type_code.as_str());
        if !document.notes.is_empty() {
            text.push_str(" (");
            text.push_str(&document.notes);
            text.push(')');
        }
    }
    text
}
