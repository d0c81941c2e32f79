//! Pipeline ingress endpoints.
//!
//! - `POST /pipeline`                      — run a request through the pipeline
//! - `POST /pipeline/resume`               — resume an awaiting-approval request
//! - `POST /pipeline/cancel/:request_id`   — cooperatively cancel a request

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use oc_domain::artifact::PipelineRequest;
use oc_domain::error::Error;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request bodies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct PipelineBody {
    pub request: String,
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ResumeBody {
    pub request_id: String,
    pub approval_token: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map the typed error surface onto HTTP statuses and the standard error
/// envelope `{error: {kind, message, stage?, retriable}, request_id}`.
pub fn error_response(err: &Error, request_id: &str) -> Response {
    let status = match err {
        Error::Validation(_) | Error::ContextOverflow { .. } => StatusCode::BAD_REQUEST,
        Error::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
        Error::ApprovalRequired { .. } => StatusCode::CONFLICT,
        Error::Overloaded => StatusCode::TOO_MANY_REQUESTS,
        Error::LlmUnavailable(_) | Error::UpstreamUnavailable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Error::LlmProtocol(_) | Error::PlanInvalid { .. } => StatusCode::BAD_GATEWAY,
        // Client closed request (nginx convention).
        Error::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut body = serde_json::json!({
        "request_id": request_id,
        "error": {
            "kind": err.kind(),
            "message": err.to_string(),
            "retriable": err.retriable(),
        }
    });
    if let Some(stage) = err.stage() {
        body["error"]["stage"] = serde_json::json!(stage);
    }
    if let Error::ApprovalRequired {
        resume_token: Some(token),
        ..
    } = err
    {
        body["resume_token"] = serde_json::json!(token);
    }

    (status, Json(body)).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn run_pipeline(
    State(state): State<AppState>,
    Json(body): Json<PipelineBody>,
) -> Response {
    let deadline_ms = body
        .deadline_ms
        .unwrap_or(state.config.stages.request_default_deadline_ms);
    let request = PipelineRequest::new(body.user_id, body.session_id, body.request, deadline_ms);
    let request_id = request.request_id.to_string();

    tracing::info!(%request_id, deadline_ms, "pipeline request accepted");

    match state.orchestrator.execute(request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(&err, &request_id),
    }
}

pub async fn resume_pipeline(
    State(state): State<AppState>,
    Json(body): Json<ResumeBody>,
) -> Response {
    tracing::info!(request_id = %body.request_id, "pipeline resume requested");
    match state
        .orchestrator
        .resume(&body.request_id, &body.approval_token)
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(&err, &body.request_id),
    }
}

pub async fn cancel_pipeline(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Response {
    let cancelled = state.orchestrator.cancel(&request_id);
    Json(serde_json::json!({
        "request_id": request_id,
        "cancelled": cancelled,
    }))
    .into_response()
}
