pub mod auth;
pub mod cache;
pub mod catalog;
pub mod pipeline;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (pipeline ingress, liveness) and
/// **protected** (the cache API, gated behind the bearer-token middleware).
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        // Pipeline ingress
        .route("/pipeline", post(pipeline::run_pipeline))
        .route("/pipeline/resume", post(pipeline::resume_pipeline))
        .route(
            "/pipeline/cancel/:request_id",
            post(pipeline::cancel_pipeline),
        )
        // Liveness probe (public, no auth)
        .route("/api/v1/health", get(liveness));

    let protected = Router::new()
        .route("/api/v1/cache/stats", get(cache::stats))
        .route("/api/v1/cache/health", get(cache::health))
        .route("/api/v1/cache/invalidate", post(cache::invalidate))
        .route("/api/v1/cache/invalidate/all", post(cache::invalidate_all))
        .route(
            "/api/v1/cache/invalidate/stage/:stage",
            post(cache::invalidate_stage),
        )
        .route("/api/v1/catalog", get(catalog::list))
        .route("/api/v1/catalog/reload", post(catalog::reload))
        .layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}

async fn liveness() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "ok": true,
        "service": "opsconductor",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
