use crate::infra::AppState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use candidate_docs::error::AppError;
use candidate_docs::revalidation::{
    candidate_router, Candidate, CandidateId, CandidateStatus, Clock, ContractType, CycleReport,
    CycleScheduler, CycleTarget, Document, DocumentId, DocumentIntake, DocumentStore,
    DocumentTypeCode, EngineError, FileRef, NewCandidate, ProcessLease,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub(crate) struct NewCandidateRequest {
    pub(crate) full_name: String,
    #[serde(default)]
    pub(crate) phone: Option<String>,
    pub(crate) contract_type: ContractType,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReceiveFileRequest {
    pub(crate) type_code: DocumentTypeCode,
    pub(crate) file: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NotPossessedRequest {
    #[serde(default)]
    pub(crate) reason: String,
}

struct IntakeState<S, K> {
    store: Arc<S>,
    intake: Arc<DocumentIntake<S, K>>,
}

impl<S, K> Clone for IntakeState<S, K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            intake: Arc::clone(&self.intake),
        }
    }
}

struct CycleState<S, K> {
    scheduler: Arc<CycleScheduler<S, K>>,
    lease: Arc<ProcessLease>,
}

impl<S, K> Clone for CycleState<S, K> {
    fn clone(&self) -> Self {
        Self {
            scheduler: Arc::clone(&self.scheduler),
            lease: Arc::clone(&self.lease),
        }
    }
}

/// Candidate views, intake endpoints, manual cycles and the operational routes.
///
/// `lease` must be the same handle the scheduler loop holds, so manual cycles run against the
/// store this process serves and never alongside another process.
pub(crate) fn with_worker_routes<S, K>(
    store: Arc<S>,
    clock: Arc<K>,
    scheduler: Arc<CycleScheduler<S, K>>,
    lease: Arc<ProcessLease>,
) -> Router
where
    S: DocumentStore + 'static,
    K: Clock + 'static,
{
    let intake = IntakeState {
        intake: Arc::new(DocumentIntake::new(Arc::clone(&store), clock)),
        store: Arc::clone(&store),
    };

    candidate_router(store)
        .merge(intake_router(intake))
        .merge(cycle_router(CycleState { scheduler, lease }))
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/v1/revalidation/last-cycle", get(last_cycle_endpoint))
}

fn intake_router<S, K>(state: IntakeState<S, K>) -> Router
where
    S: DocumentStore + 'static,
    K: Clock + 'static,
{
    Router::new()
        .route("/api/v1/candidates", post(create_candidate_endpoint::<S, K>))
        .route(
            "/api/v1/candidates/:candidate_id/start",
            post(start_process_endpoint::<S, K>),
        )
        .route(
            "/api/v1/candidates/:candidate_id/documents",
            post(receive_file_endpoint::<S, K>),
        )
        .route(
            "/api/v1/documents/:document_id/not-possessed",
            post(not_possessed_endpoint::<S, K>),
        )
        .with_state(state)
}

fn cycle_router<S, K>(state: CycleState<S, K>) -> Router
where
    S: DocumentStore + 'static,
    K: Clock + 'static,
{
    Router::new()
        .route("/api/v1/revalidation/run", post(run_all_endpoint::<S, K>))
        .route(
            "/api/v1/revalidation/run/:candidate_id",
            post(run_candidate_endpoint::<S, K>),
        )
        .with_state(state)
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn last_cycle_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    match state.last_cycle.get() {
        Some(report) => (StatusCode::OK, Json(json!({ "last_cycle": report }))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no revalidation cycle has completed yet" })),
        ),
    }
}

async fn create_candidate_endpoint<S, K>(
    State(state): State<IntakeState<S, K>>,
    Json(payload): Json<NewCandidateRequest>,
) -> Result<(StatusCode, Json<Candidate>), AppError>
where
    S: DocumentStore + 'static,
    K: Clock + 'static,
{
    let candidate = state.store.transaction(|tx| {
        tx.insert_candidate(NewCandidate {
            full_name: payload.full_name.trim().to_string(),
            phone: payload.phone.filter(|phone| !phone.trim().is_empty()),
            status: CandidateStatus::AwaitingStart,
            contract_type: payload.contract_type,
        })
    })?;
    Ok((StatusCode::CREATED, Json(candidate)))
}

async fn start_process_endpoint<S, K>(
    State(state): State<IntakeState<S, K>>,
    Path(candidate_id): Path<u64>,
) -> Result<Json<serde_json::Value>, AppError>
where
    S: DocumentStore + 'static,
    K: Clock + 'static,
{
    let requested = state.intake.start_process(CandidateId(candidate_id))?;
    Ok(Json(json!({
        "candidate_id": candidate_id,
        "requested": requested,
    })))
}

async fn receive_file_endpoint<S, K>(
    State(state): State<IntakeState<S, K>>,
    Path(candidate_id): Path<u64>,
    Json(payload): Json<ReceiveFileRequest>,
) -> Result<(StatusCode, Json<Document>), AppError>
where
    S: DocumentStore + 'static,
    K: Clock + 'static,
{
    let document = state.intake.receive_file(
        CandidateId(candidate_id),
        payload.type_code,
        FileRef(payload.file),
    )?;
    Ok((StatusCode::CREATED, Json(document)))
}

async fn not_possessed_endpoint<S, K>(
    State(state): State<IntakeState<S, K>>,
    Path(document_id): Path<u64>,
    Json(payload): Json<NotPossessedRequest>,
) -> Result<Json<Document>, AppError>
where
    S: DocumentStore + 'static,
    K: Clock + 'static,
{
    let document = state
        .intake
        .mark_not_possessed(DocumentId(document_id), &payload.reason)?;
    Ok(Json(document))
}

async fn run_all_endpoint<S, K>(
    State(state): State<CycleState<S, K>>,
) -> Result<Json<CycleReport>, AppError>
where
    S: DocumentStore + 'static,
    K: Clock + 'static,
{
    run_manual_cycle(state, CycleTarget::All).await
}

async fn run_candidate_endpoint<S, K>(
    State(state): State<CycleState<S, K>>,
    Path(candidate_id): Path<u64>,
) -> Result<Json<CycleReport>, AppError>
where
    S: DocumentStore + 'static,
    K: Clock + 'static,
{
    run_manual_cycle(state, CycleTarget::Candidate(CandidateId(candidate_id))).await
}

async fn run_manual_cycle<S, K>(
    state: CycleState<S, K>,
    target: CycleTarget,
) -> Result<Json<CycleReport>, AppError>
where
    S: DocumentStore + 'static,
    K: Clock + 'static,
{
    let CycleState { scheduler, lease } = state;
    let report = tokio::task::spawn_blocking(move || scheduler.run_manual(&lease, target))
        .await
        .map_err(|err| EngineError::Task(err.to_string()))??;
    Ok(Json(report))
}
