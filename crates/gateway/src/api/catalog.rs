//! Tool catalog endpoints (authenticated).
//!
//! - `GET  /api/v1/catalog`         — list declared tools
//! - `POST /api/v1/catalog/reload`  — re-read the catalog file and swap it
//!   atomically; in-flight requests keep their snapshot

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> Response {
    let snapshot = state.catalog.snapshot();
    Json(serde_json::json!({
        "tools": snapshot.tools,
        "count": snapshot.tools.len(),
    }))
    .into_response()
}

pub async fn reload(State(state): State<AppState>) -> Response {
    match state.catalog.reload(&state.config.catalog.path) {
        Ok(count) => Json(serde_json::json!({
            "reloaded": true,
            "tools": count,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
