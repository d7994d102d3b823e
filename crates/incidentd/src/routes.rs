//! API routes for incidentd
//!
//! Errors render as `{"detail": <message>}` with the status from
//! `IncidentError::status_code`.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use incident_shared::{
    IncidentError, IncidentRun, LatestLogs, Message, ServiceStatus, Summary, VERSION,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::faults::FaultOutcome;
use crate::server::AppState;

type AppStateArc = Arc<AppState>;

const DEFAULT_ANALYZE_LINES: usize = 200;

/// Handler error carrying the core's error taxonomy
#[derive(Debug)]
pub struct ApiError(IncidentError);

impl From<IncidentError> for ApiError {
    fn from(err: IncidentError) -> Self {
        ApiError(err)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let body = ErrorBody {
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Unparseable ids are unknown runs
fn parse_run_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|_| ApiError(IncidentError::not_found(format!("Run '{}'", raw))))
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RootStatus {
    pub message: String,
    pub version: String,
    pub uptime_secs: u64,
}

pub fn root_routes() -> Router<AppStateArc> {
    Router::new().route("/", get(root))
}

async fn root(State(state): State<AppStateArc>) -> Json<RootStatus> {
    Json(RootStatus {
        message: "Incident orchestration daemon is running".to_string(),
        version: VERSION.to_string(),
        uptime_secs: state.uptime().as_secs(),
    })
}

// ============================================================================
// Service Routes
// ============================================================================

pub fn service_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/services", get(list_services))
        .route("/api/services/:name/stop", post(stop_service))
        .route("/api/services/:name/start", post(start_service))
}

async fn list_services(State(state): State<AppStateArc>) -> ApiResult<Vec<ServiceStatus>> {
    let statuses = state.registry.statuses(state.runtime.as_ref()).await?;
    Ok(Json(statuses))
}

async fn stop_service(
    State(state): State<AppStateArc>,
    Path(name): Path<String>,
) -> ApiResult<Message> {
    let message = match state.faults.stop(&name).await? {
        FaultOutcome::Applied => format!("Service {} stopped", name),
        FaultOutcome::AlreadyInState => format!("Service {} already stopped", name),
    };
    Ok(Json(Message::new(message)))
}

async fn start_service(
    State(state): State<AppStateArc>,
    Path(name): Path<String>,
) -> ApiResult<Message> {
    let message = match state.faults.start(&name).await? {
        FaultOutcome::Applied => format!("Service {} started", name),
        FaultOutcome::AlreadyInState => format!("Service {} already running", name),
    };
    Ok(Json(Message::new(message)))
}

// ============================================================================
// Incident Routes
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct TargetQuery {
    /// Defaults to the first service with a deployment profile
    pub service: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LinesQuery {
    pub lines: Option<usize>,
}

pub fn incident_routes() -> Router<AppStateArc> {
    Router::new()
        .route(
            "/api/incidents/simulate/bad_deployment",
            post(simulate_bad_deployment),
        )
        .route(
            "/api/incidents/remediate/bad_deployment",
            post(remediate_bad_deployment),
        )
        .route("/api/incidents/latest/logs", get(latest_logs))
        .route("/api/incidents/latest/analyze", post(analyze_latest))
}

fn deployment_target(state: &AppState, query: TargetQuery) -> Result<String, ApiError> {
    match query.service {
        Some(service) => Ok(service),
        None => state
            .registry
            .deployable()
            .map(|s| s.logical_name.clone())
            .ok_or_else(|| {
                ApiError(IncidentError::Misconfiguration(
                    "no service has a deployment profile".to_string(),
                ))
            }),
    }
}

async fn simulate_bad_deployment(
    State(state): State<AppStateArc>,
    Query(query): Query<TargetQuery>,
) -> ApiResult<Message> {
    let service = deployment_target(&state, query)?;
    let container = state.faults.deploy_bad(&service).await?;
    Ok(Json(Message::new(format!(
        "Simulating bad deployment for {}. Container {} is now crash-looping.",
        service, container.name
    ))))
}

async fn remediate_bad_deployment(
    State(state): State<AppStateArc>,
    Query(query): Query<TargetQuery>,
) -> ApiResult<Message> {
    let service = deployment_target(&state, query)?;
    let container = state.faults.remediate(&service).await?;
    Ok(Json(Message::new(format!(
        "Remediated {}: container {} redeployed from {}",
        service, container.name, container.image
    ))))
}

async fn latest_logs(
    State(state): State<AppStateArc>,
    Query(query): Query<LinesQuery>,
) -> Json<LatestLogs> {
    let lines = query.lines.unwrap_or(state.default_log_lines);
    Json(state.lifecycle.latest_logs(lines).await)
}

async fn analyze_latest(
    State(state): State<AppStateArc>,
    Query(query): Query<LinesQuery>,
) -> ApiResult<Summary> {
    let lines = query.lines.unwrap_or(DEFAULT_ANALYZE_LINES);
    Ok(Json(state.lifecycle.summarize(lines).await?))
}

// ============================================================================
// Run Routes
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRunRequest {
    pub scenario_name: String,
    #[serde(default)]
    pub auto_complete: Option<bool>,
}

pub fn run_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/runs", post(create_run).get(list_runs))
        .route("/api/runs/:id", get(get_run).delete(delete_run))
        .route("/api/runs/:id/complete", post(complete_run))
        .route("/api/runs/:id/report", get(download_report))
}

async fn create_run(
    State(state): State<AppStateArc>,
    Json(req): Json<CreateRunRequest>,
) -> ApiResult<IncidentRun> {
    let run = state
        .lifecycle
        .trigger(&req.scenario_name, req.auto_complete)
        .await?;
    Ok(Json(run))
}

async fn list_runs(State(state): State<AppStateArc>) -> ApiResult<Vec<IncidentRun>> {
    Ok(Json(state.lifecycle.list().await?))
}

async fn get_run(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> ApiResult<IncidentRun> {
    let id = parse_run_id(&id)?;
    Ok(Json(state.lifecycle.get(id).await?))
}

async fn complete_run(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> ApiResult<IncidentRun> {
    let id = parse_run_id(&id)?;
    Ok(Json(state.lifecycle.complete(id).await?))
}

async fn delete_run(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> ApiResult<Message> {
    let id = parse_run_id(&id)?;
    state.lifecycle.remove(id).await?;
    Ok(Json(Message::new(format!("Run {} deleted", id))))
}

async fn download_report(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_run_id(&id)?;
    let report = state.lifecycle.report(id).await?;
    let disposition = format!("attachment; filename=\"{}\"", report.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        report.bytes,
    )
        .into_response())
}
