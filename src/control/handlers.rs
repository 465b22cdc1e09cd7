//! Request handlers and error mapping for the control plane.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{ControlState, SERVER_NAME};
use crate::logstore::{is_plain_name, RunSelector};
use crate::models::service::SessionInfo;
use crate::orchestrator::BulkReport;
use crate::AppError;

/// Default and maximum `/logs` line counts.
pub const DEFAULT_LOG_LINES: usize = 50;
/// Upper bound on `/logs` line counts.
pub const MAX_LOG_LINES: usize = 1000;
/// Default `/logfile` line count.
pub const DEFAULT_LOGFILE_LINES: usize = 100;

/// Delay between answering `POST /stop` and starting the teardown.
const SHUTDOWN_DELAY: Duration = Duration::from_millis(100);

// ── Errors ───────────────────────────────────────────────────────────────────

pub(super) struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Config(_) | AppError::Unsupported(_) => StatusCode::BAD_REQUEST,
            AppError::AlreadyExists(_) | AppError::NotRunning(_) => StatusCode::CONFLICT,
            AppError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(err = %self.0, "control request failed");
        }
        (status, self.0.to_string()).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ── Payloads ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(super) struct LinesQuery {
    lines: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct LogfileQuery {
    run: Option<String>,
    lines: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SendBody {
    text: String,
}

#[derive(Debug, Serialize)]
struct TabRow {
    index: usize,
    #[serde(flatten)]
    session: SessionInfo,
}

#[derive(Debug, Serialize)]
struct ServiceStatus {
    index: usize,
    name: String,
    handle_id: Option<String>,
    alive: bool,
    log_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pipe_path: Option<String>,
}

fn ok(service: &SessionInfo, message: impl Into<String>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "service": service.name,
        "pane_id": service.handle_id,
        "message": message.into(),
    }))
}

fn bulk(report: &BulkReport, verb: &str) -> Json<Value> {
    let message = if report.failed.is_empty() {
        format!("{verb} sent to all services")
    } else {
        let errors: Vec<String> = report
            .failed
            .iter()
            .map(|(name, err)| format!("{name}: {err}"))
            .collect();
        format!("some errors: {}", errors.join("; "))
    };
    Json(json!({
        "ok": report.failed.is_empty(),
        "message": message,
        "services": report.succeeded,
        "failed": report.failed.iter().map(|(name, _)| name).collect::<Vec<_>>(),
    }))
}

/// Parse a line count from a query string; bad values fall back to `default`.
fn parse_lines(raw: Option<&str>, default: usize, max: usize) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
        .min(max)
}

// ── Handlers ─────────────────────────────────────────────────────────────────

pub(super) async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub(super) async fn status(State(state): State<ControlState>) -> ApiResult<Json<Value>> {
    let orchestrator = state.orchestrator().await?;
    let live = orchestrator.live_sessions().await.unwrap_or_else(|err| {
        warn!(%err, "status listing failed");
        Vec::new()
    });

    let services: Vec<ServiceStatus> = orchestrator
        .config()
        .services
        .iter()
        .enumerate()
        .map(|(i, svc)| {
            let session = live.iter().find(|s| s.name == svc.name);
            ServiceStatus {
                index: i + 1,
                name: svc.name.clone(),
                handle_id: session.map(|s| s.handle_id.clone()),
                alive: session.is_some(),
                log_path: state
                    .log_store()
                    .latest_path(&svc.name)
                    .to_string_lossy()
                    .into_owned(),
                pipe_path: svc.pipe.as_ref().map(|p| p.to_string_lossy().into_owned()),
            }
        })
        .collect();

    Ok(Json(json!({
        "name": SERVER_NAME,
        "uptime_seconds": state.uptime_seconds(),
        "backend": orchestrator.backend().kind().as_str(),
        "services": services,
    })))
}

pub(super) async fn tabs(State(state): State<ControlState>) -> ApiResult<Json<Value>> {
    let orchestrator = state.orchestrator().await?;
    let rows: Vec<TabRow> = orchestrator
        .live_sessions()
        .await?
        .into_iter()
        .enumerate()
        .map(|(i, session)| TabRow {
            index: i + 1,
            session,
        })
        .collect();
    Ok(Json(json!({ "tabs": rows })))
}

pub(super) async fn logs(
    State(state): State<ControlState>,
    Path(service): Path<String>,
    Query(query): Query<LinesQuery>,
) -> ApiResult<String> {
    let lines = parse_lines(query.lines.as_deref(), DEFAULT_LOG_LINES, MAX_LOG_LINES);
    let orchestrator = state.orchestrator().await?;
    let (_, text) = orchestrator.logs(&service, lines).await?;
    Ok(text)
}

pub(super) async fn logfile(
    State(state): State<ControlState>,
    Path(service): Path<String>,
    Query(query): Query<LogfileQuery>,
) -> ApiResult<String> {
    let store = state.log_store();
    if service == "list" {
        return Ok(store.list_services());
    }

    let name = resolve_log_service(&state, &service).await?;
    let selector = RunSelector::parse(query.run.as_deref().unwrap_or_default());
    let lines = parse_lines(query.lines.as_deref(), DEFAULT_LOGFILE_LINES, usize::MAX);
    Ok(store.read_run(&name, &selector, lines)?)
}

/// Map a caller-supplied name to a log directory: exact directory first,
/// then the first configured service containing it case-insensitively.
/// Names that are not a single path component never resolve.
async fn resolve_log_service(state: &ControlState, service: &str) -> crate::Result<String> {
    if !is_plain_name(service) {
        return Err(AppError::NotFound(format!("no logs for {service:?}")));
    }
    if state.log_store().service_dir(service).is_dir() {
        return Ok(service.to_owned());
    }
    let needle = service.to_lowercase();
    if let Ok(orchestrator) = state.orchestrator().await {
        if let Some(name) = orchestrator
            .config()
            .service_names()
            .into_iter()
            .find(|name| name.to_lowercase().contains(&needle))
        {
            return Ok(name);
        }
    }
    Err(AppError::NotFound(format!("no logs for {service:?}")))
}

pub(super) async fn send(
    State(state): State<ControlState>,
    Path(service): Path<String>,
    Json(body): Json<SendBody>,
) -> ApiResult<Json<Value>> {
    let orchestrator = state.orchestrator().await?;
    let session = orchestrator.send(&service, &body.text).await?;
    Ok(ok(&session, format!("sent {:?}", body.text)))
}

pub(super) async fn focus(
    State(state): State<ControlState>,
    Path(service): Path<String>,
) -> ApiResult<Json<Value>> {
    let orchestrator = state.orchestrator().await?;
    let session = orchestrator.focus(&service).await?;
    Ok(ok(&session, "focused"))
}

pub(super) async fn start(
    State(state): State<ControlState>,
    Path(service): Path<String>,
) -> ApiResult<Json<Value>> {
    let orchestrator = state.orchestrator().await?;
    let handle = orchestrator.start_one(&service).await?;
    Ok(Json(json!({
        "ok": true,
        "service": handle.name,
        "pane_id": handle.handle_id,
        "message": "started",
    })))
}

pub(super) async fn restart(
    State(state): State<ControlState>,
    Path(service): Path<String>,
) -> ApiResult<Json<Value>> {
    let orchestrator = state.orchestrator().await?;
    let message = orchestrator.restart(&service).await?;
    Ok(Json(json!({ "ok": true, "message": message })))
}

pub(super) async fn reload(
    State(state): State<ControlState>,
    Path(service): Path<String>,
) -> ApiResult<Json<Value>> {
    let orchestrator = state.orchestrator().await?;
    let session = orchestrator.reload(&service).await?;
    Ok(ok(&session, "reload sent"))
}

pub(super) async fn restart_all(State(state): State<ControlState>) -> ApiResult<Json<Value>> {
    let orchestrator = state.orchestrator().await?;
    let report = orchestrator.restart_all().await?;
    Ok(bulk(&report, "restart"))
}

pub(super) async fn reload_all(State(state): State<ControlState>) -> ApiResult<Json<Value>> {
    let orchestrator = state.orchestrator().await?;
    let report = orchestrator.reload_all().await?;
    Ok(bulk(&report, "reload"))
}

pub(super) async fn stop_one(
    State(state): State<ControlState>,
    Path(service): Path<String>,
) -> ApiResult<Json<Value>> {
    let orchestrator = state.orchestrator().await?;
    let session = orchestrator.stop(&service).await?;
    Ok(ok(&session, "stopped"))
}

pub(super) async fn stop_all(State(state): State<ControlState>) -> Json<Value> {
    info!("shutdown requested over control plane");
    let token = state.shutdown_token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_DELAY).await;
        token.cancel();
    });
    Json(json!({ "ok": true, "message": "shutting down" }))
}
