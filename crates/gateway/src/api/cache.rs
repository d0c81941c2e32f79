//! Cache management API (authenticated).
//!
//! - `GET  /api/v1/cache/stats`                         — hit/miss counters per namespace
//! - `GET  /api/v1/cache/health`                        — Redis connectivity probe
//! - `POST /api/v1/cache/invalidate?pattern=<glob>`     — pattern invalidation
//! - `POST /api/v1/cache/invalidate/all`
//! - `POST /api/v1/cache/invalidate/stage/{stage}`
//!
//! Invalidation is eventually consistent: an in-flight stage may finish
//! with a value it already read; the next request sees the invalidation.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use oc_cache::keys::{Namespace, KEY_PREFIX};

use crate::state::AppState;

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

pub async fn stats(State(state): State<AppState>) -> Response {
    Json(state.cache.stats()).into_response()
}

pub async fn health(State(state): State<AppState>) -> Response {
    Json(state.cache.health().await).into_response()
}

#[derive(Debug, Deserialize)]
pub struct InvalidateQuery {
    pub pattern: String,
}

pub async fn invalidate(
    State(state): State<AppState>,
    Query(query): Query<InvalidateQuery>,
) -> Response {
    // Only our own key space may be touched; a bare "*" would walk every
    // key in Redis.
    if !query.pattern.starts_with(KEY_PREFIX) {
        return api_error(
            StatusCode::BAD_REQUEST,
            format!("pattern must start with \"{KEY_PREFIX}\""),
        );
    }
    let invalidated_count = state.cache.invalidate(&query.pattern).await;
    Json(serde_json::json!({ "invalidated_count": invalidated_count })).into_response()
}

pub async fn invalidate_all(State(state): State<AppState>) -> Response {
    let invalidated_count = state.cache.invalidate_all().await;
    Json(serde_json::json!({ "invalidated_count": invalidated_count })).into_response()
}

pub async fn invalidate_stage(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> Response {
    let namespace = match Namespace::parse(&stage) {
        Some(ns @ (Namespace::StageA | Namespace::StageB | Namespace::StageC)) => ns,
        _ => {
            return api_error(
                StatusCode::BAD_REQUEST,
                "stage must be one of stage_a, stage_b, stage_c",
            )
        }
    };
    let invalidated_count = state.cache.invalidate_stage(namespace).await;
    Json(serde_json::json!({
        "stage": stage,
        "invalidated_count": invalidated_count,
    }))
    .into_response()
}
