use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::repository::DocumentContent;

const OVERLOADED_SENTINEL: &str = "overloaded";
const RATE_LIMITED_SENTINEL: &str = "rate_limited";

/// Normalized result of a single classifier call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassificationOutcome {
    Success {
        type_code: String,
        detail: Option<String>,
    },
    Overloaded,
    RateLimited,
    ProcessingError { message: String },
}

impl ClassificationOutcome {
    /// Parses the classifier's raw reply: a type code, `other|<free text>`, or one of the
    /// transient sentinels.
    pub fn from_raw(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::processing_error("empty classifier response");
        }
        if raw.eq_ignore_ascii_case(OVERLOADED_SENTINEL) {
            return Self::Overloaded;
        }
        if raw.eq_ignore_ascii_case(RATE_LIMITED_SENTINEL) {
            return Self::RateLimited;
        }

        match raw.split_once('|') {
            Some((code, detail)) => {
                let detail = detail.trim();
                Self::Success {
                    type_code: code.trim().to_string(),
                    detail: (!detail.is_empty()).then(|| detail.to_string()),
                }
            }
            None => Self::Success {
                type_code: raw.to_string(),
                detail: None,
            },
        }
    }

    pub fn processing_error(message: impl Into<String>) -> Self {
        Self::ProcessingError {
            message: message.into(),
        }
    }

    /// Transient outcomes leave the document eligible at the same retry count.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Overloaded | Self::RateLimited)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierResponse {
    pub outcome: ClassificationOutcome,
    /// Size of the raw reply, used for the limiter's cost estimate.
    pub response_bytes: usize,
}

/// One external classification call per invocation. Retry policy lives in the state machine.
pub trait ClassifierClient: Send + Sync {
    fn classify(&self, content: &DocumentContent) -> ClassifierResponse;
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),
    #[error("classifier transport failed: {0}")]
    Transport(String),
    #[error("classifier rejected the document: {0}")]
    Rejected(String),
}

/// Adapts a raw call returning the classifier's textual reply.
pub struct FnClassifier<F> {
    call: F,
}

impl<F> FnClassifier<F>
where
    F: Fn(&DocumentContent) -> Result<String, ClassifierError> + Send + Sync,
{
    pub fn new(call: F) -> Self {
        Self { call }
    }
}

impl<F> ClassifierClient for FnClassifier<F>
where
    F: Fn(&DocumentContent) -> Result<String, ClassifierError> + Send + Sync,
{
    fn classify(&self, content: &DocumentContent) -> ClassifierResponse {
        match (self.call)(content) {
            Ok(raw) => ClassifierResponse {
                response_bytes: raw.len(),
                outcome: ClassificationOutcome::from_raw(&raw),
            },
            Err(err) => ClassifierResponse {
                outcome: ClassificationOutcome::processing_error(err.to_string()),
                response_bytes: 0,
            },
        }
    }
}
