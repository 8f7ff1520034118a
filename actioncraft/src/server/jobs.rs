//! `/jobs/*` control-plane endpoints (spec §4.5, SPEC_FULL §6): ask the
//! worker pool a question by sending a request/oneshot pair over
//! `state.job_control` rather than reaching into worker state directly.
//!
//! Mounted like `health`: plain axum handlers outside the action-dispatch
//! fallback, since these answer on process-wide state rather than a single
//! connection's session.

use crate::error::{ActionError, ErrorKind};
use crate::jobs::agent::messages::{
    CancelJobRequest, ClearDeadLetterQueueRequest, GetJobStatusRequest, GetMetricsRequest, RetryAllFailedRequest,
    RetryJobRequest,
};
use crate::jobs::JobId;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{http::StatusCode, Json};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

const REPLY_TIMEOUT: Duration = Duration::from_millis(500);

fn parse_job_id(raw: &str) -> Result<JobId, ActionError> {
    Uuid::parse_str(raw)
        .map(JobId)
        .map_err(|_| ActionError::new(ErrorKind::ActionParamValidation, "invalid job id").with_param("id", json!(raw)))
}

/// Waits for `rx` to resolve within [`REPLY_TIMEOUT`], collapsing a dropped
/// sender or a timeout to the same `ACTION_RUN` error: either way the
/// control-plane task didn't answer.
async fn await_reply<T>(rx: tokio::sync::oneshot::Receiver<T>) -> Result<T, ActionError> {
    match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) | Err(_) => Err(ActionError::new(ErrorKind::ActionRun, "job control plane did not respond")),
    }
}

/// `GET /jobs/metrics` — process-wide job runtime counters.
pub async fn metrics(State(state): State<AppState>) -> Response {
    let (request, rx) = GetMetricsRequest::new();
    if state.job_control.send(request.into()).await.is_err() {
        return ActionError::new(ErrorKind::ActionRun, "job control plane is not running").into_response();
    }
    match await_reply(rx).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => err.into_response(),
    }
}

/// `GET /jobs/:id/status` — `{status: "running"}` or 404 if unknown.
pub async fn job_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let (request, rx) = GetJobStatusRequest::new(id);
    if state.job_control.send(request.into()).await.is_err() {
        return ActionError::new(ErrorKind::ActionRun, "job control plane is not running").into_response();
    }
    match await_reply(rx).await {
        Ok(Some(status)) => Json(json!({ "status": status })).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => err.into_response(),
    }
}

/// `POST /jobs/:id/retry` — re-queue one dead-lettered job.
pub async fn retry_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let (request, rx) = RetryJobRequest::new(id);
    if state.job_control.send(request.into()).await.is_err() {
        return ActionError::new(ErrorKind::ActionRun, "job control plane is not running").into_response();
    }
    match await_reply(rx).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => err.into_response(),
    }
}

/// `DELETE /jobs/:id` — cancel a still-queued job.
pub async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let (request, rx) = CancelJobRequest::new(id);
    if state.job_control.send(request.into()).await.is_err() {
        return ActionError::new(ErrorKind::ActionRun, "job control plane is not running").into_response();
    }
    match await_reply(rx).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => err.into_response(),
    }
}

/// `POST /jobs/retry-all` — re-queue every dead-lettered job.
pub async fn retry_all_failed(State(state): State<AppState>) -> Response {
    let (request, rx) = RetryAllFailedRequest::new();
    if state.job_control.send(request.into()).await.is_err() {
        return ActionError::new(ErrorKind::ActionRun, "job control plane is not running").into_response();
    }
    match await_reply(rx).await {
        Ok(count) => Json(json!({ "retried": count })).into_response(),
        Err(err) => err.into_response(),
    }
}

/// `DELETE /jobs/failed` — permanently clear the dead letter queue.
pub async fn clear_dead_letter_queue(State(state): State<AppState>) -> Response {
    let (request, rx) = ClearDeadLetterQueueRequest::new();
    if state.job_control.send(request.into()).await.is_err() {
        return ActionError::new(ErrorKind::ActionRun, "job control plane is not running").into_response();
    }
    match await_reply(rx).await {
        Ok(count) => Json(json!({ "cleared": count })).into_response(),
        Err(err) => err.into_response(),
    }
}
