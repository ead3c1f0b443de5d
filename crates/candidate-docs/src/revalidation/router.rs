use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use super::domain::{CandidateId, DocumentId, TimelineEvent};
use super::repository::{CandidateStatusView, DocumentStore, RepositoryError};

/// Read-only views over candidate documents and their audit timeline.
pub fn candidate_router<S>(store: Arc<S>) -> Router
where
    S: DocumentStore + 'static,
{
    Router::new()
        .route("/api/v1/candidates/:candidate_id", get(status_handler::<S>))
        .route(
            "/api/v1/candidates/:candidate_id/timeline",
            get(timeline_handler::<S>),
        )
        .with_state(store)
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEventView {
    pub event_id: u64,
    pub event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_document_id: Option<DocumentId>,
    pub prev_status: Option<&'static str>,
    pub new_status: Option<&'static str>,
    pub occurred_at: DateTime<Utc>,
    pub duration_since_previous_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl From<&TimelineEvent> for TimelineEventView {
    fn from(event: &TimelineEvent) -> Self {
        Self {
            event_id: event.id.0,
            event_type: event.event_type.label(),
            document_id: event.document_id,
            related_document_id: event.related_document_id,
            prev_status: event.prev_status.map(|status| status.label()),
            new_status: event.new_status.map(|status| status.label()),
            occurred_at: event.occurred_at,
            duration_since_previous_secs: event
                .duration_since_previous
                .map(|duration| duration.as_secs()),
            notes: event.notes.clone(),
        }
    }
}

pub(crate) async fn status_handler<S>(
    State(store): State<Arc<S>>,
    Path(candidate_id): Path<u64>,
) -> Response
where
    S: DocumentStore + 'static,
{
    let id = CandidateId(candidate_id);
    let loaded = store.transaction(|tx| {
        let candidate = tx
            .candidate(id)?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        let documents = tx.documents_for(id)?;
        Ok::<_, RepositoryError>(CandidateStatusView::build(&candidate, &documents))
    });

    match loaded {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn timeline_handler<S>(
    State(store): State<Arc<S>>,
    Path(candidate_id): Path<u64>,
) -> Response
where
    S: DocumentStore + 'static,
{
    let id = CandidateId(candidate_id);
    let loaded = store.transaction(|tx| {
        if tx.candidate(id)?.is_none() {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        tx.events_for_candidate(id)
    });

    match loaded {
        Ok(events) => {
            let events: Vec<TimelineEventView> = events.iter().map(TimelineEventView::from).collect();
            let payload = json!({
                "candidate_id": id,
                "events": events,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

fn error_response(err: RepositoryError) -> Response {
    let status = match &err {
        RepositoryError::NotFound(_) => StatusCode::NOT_FOUND,
        RepositoryError::Conflict => StatusCode::CONFLICT,
        RepositoryError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    let payload = json!({
        "error": err.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}
