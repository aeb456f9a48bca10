//! HTTP route handlers for the control API.
//!
//! Every mutating request counts as activity and resets the scheduler's idle
//! clock. Engine runs are moved to the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use sandbox::approval::approve;
use sandbox::core::artifact::ListedRequest;
use sandbox::core::types::{ExecutionResult, LogRecord, PendingRequest};
use sandbox::error::{SandboxError, classify};
use sandbox::io::project_store::ProjectInfo;
use sandbox::io::run_log::{self, LogEntry};
use sandbox::scheduler::SchedulerStatus;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::sse;
use crate::state::AppState;

const DEFAULT_LOG_LIMIT: usize = 50;

/// Error response carrying the typed sandbox error status.
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match classify(&self.0) {
            Some(SandboxError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Some(SandboxError::BadRequest { .. }) => StatusCode::BAD_REQUEST,
            None => {
                warn!(err = %format!("{:#}", self.0), "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": format!("{:#}", self.0) }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Full application: `/api`, `/events`, permissive CORS.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api_router())
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state)
}

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/activity", post(signal_activity))
        .route("/autorun", get(autorun_status))
        .route("/autorun/stop", post(autorun_stop))
        .route("/run", post(run_snippet))
        .route("/projects", get(list_projects).post(save_project))
        .route("/projects/{name}/run", post(run_project))
        .route("/pending", get(list_pending).post(submit_request))
        .route("/pending/approve", post(approve_request))
        .route("/logs", get(list_logs))
        .route("/logs/{file}", get(get_log))
}

async fn health() -> &'static str {
    "ok"
}

/// POST /api/activity - reset the idle clock.
async fn signal_activity(State(state): State<AppState>) -> StatusCode {
    state.scheduler.signal_activity();
    StatusCode::NO_CONTENT
}

async fn autorun_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

/// POST /api/autorun/stop - the loop exits at its next boundary.
async fn autorun_stop(State(state): State<AppState>) -> Json<SchedulerStatus> {
    state.scheduler.request_stop();
    Json(state.scheduler.status())
}

#[derive(Deserialize)]
struct RunBody {
    code: String,
    timeout_secs: Option<u64>,
}

/// POST /api/run - run a snippet.
async fn run_snippet(
    State(state): State<AppState>,
    Json(body): Json<RunBody>,
) -> ApiResult<ExecutionResult> {
    state.scheduler.signal_activity();
    let engine = Arc::clone(&state.engine);
    let timeout = body
        .timeout_secs
        .map_or(engine.exec_config().snippet_timeout(), Duration::from_secs);
    let result = tokio::task::spawn_blocking(move || engine.run(&body.code, timeout))
        .await
        .context("run worker")?;
    Ok(Json(result))
}

async fn list_projects(State(state): State<AppState>) -> ApiResult<Vec<ProjectInfo>> {
    Ok(Json(state.engine.store().list()?))
}

#[derive(Deserialize)]
struct SaveBody {
    name: String,
    code: String,
}

async fn save_project(
    State(state): State<AppState>,
    Json(body): Json<SaveBody>,
) -> ApiResult<Value> {
    state.scheduler.signal_activity();
    let path = state.engine.store().save(&body.name, &body.code)?;
    Ok(Json(json!({ "path": path })))
}

#[derive(Deserialize)]
struct RunQuery {
    timeout_secs: Option<u64>,
}

/// POST /api/projects/{name}/run - run a stored project.
async fn run_project(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RunQuery>,
) -> ApiResult<ExecutionResult> {
    state.scheduler.signal_activity();
    let engine = Arc::clone(&state.engine);
    let timeout = query
        .timeout_secs
        .map_or(engine.exec_config().project_timeout(), Duration::from_secs);
    let result = tokio::task::spawn_blocking(move || engine.run_named(&name, timeout))
        .await
        .context("run worker")??;
    Ok(Json(result))
}

#[derive(Serialize)]
struct PendingEntry {
    descriptor: String,
    request: PendingRequest,
}

impl From<ListedRequest> for PendingEntry {
    fn from(listed: ListedRequest) -> Self {
        Self {
            descriptor: listed
                .descriptor_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            request: listed.request,
        }
    }
}

#[derive(Serialize)]
struct PendingResponse {
    requests: Vec<PendingEntry>,
    tasks: Vec<String>,
}

async fn list_pending(State(state): State<AppState>) -> ApiResult<PendingResponse> {
    let requests = state
        .queue
        .list_requests()?
        .into_iter()
        .map(PendingEntry::from)
        .collect();
    let tasks = state
        .queue
        .list_tasks()?
        .into_iter()
        .map(|task| task.file_name)
        .collect();
    Ok(Json(PendingResponse { requests, tasks }))
}

#[derive(Deserialize)]
struct SubmitBody {
    name: String,
    code: String,
    #[serde(default)]
    reason: String,
}

async fn submit_request(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> ApiResult<PendingEntry> {
    state.scheduler.signal_activity();
    let listed = state.queue.submit(&body.name, &body.code, &body.reason)?;
    Ok(Json(PendingEntry::from(listed)))
}

#[derive(Deserialize)]
struct ApproveBody {
    descriptor: String,
}

async fn approve_request(
    State(state): State<AppState>,
    Json(body): Json<ApproveBody>,
) -> ApiResult<Value> {
    state.scheduler.signal_activity();
    let path = approve(&state.queue, state.engine.store(), &body.descriptor)?;
    Ok(Json(json!({ "path": path })))
}

#[derive(Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Vec<LogEntry>> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Ok(Json(run_log::list_logs(&state.logs_dir(), limit)?))
}

async fn get_log(State(state): State<AppState>, Path(file): Path<String>) -> ApiResult<LogRecord> {
    Ok(Json(run_log::read_log(&state.logs_dir(), &file)?))
}
