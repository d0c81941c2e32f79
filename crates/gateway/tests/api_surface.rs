//! Router-level tests driven through `tower::ServiceExt::oneshot`, with no
//! live Redis, LLM, or upstream services behind the state.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use oc_domain::config::Config;
use oc_gateway::bootstrap::build_state;
use oc_gateway::{api, state::AppState};

async fn test_state() -> AppState {
    let mut config = Config::default();
    config.llm.context_window = 4096;
    config.redis.enabled = false;
    // Point the catalog somewhere that does not exist: an empty catalog is
    // fine for surface tests.
    config.catalog.path = "/nonexistent/tools.toml".into();
    build_state(Arc::new(config)).await.unwrap()
}

fn app(state: AppState) -> axum::Router {
    api::router(state.clone()).with_state(state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn liveness_probe_answers() {
    let app = app(test_state().await);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn cache_stats_shape() {
    let app = app(test_state().await);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/cache/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["enabled"], true);
    assert_eq!(body["connected"], false);
    assert!(body["by_namespace"]["stage_a"].is_object());
    assert!(body["hit_rate_percent"].is_number());
}

#[tokio::test]
async fn cache_health_reports_degraded_redis() {
    let app = app(test_state().await);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/cache/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["redis_ok"], false);
}

#[tokio::test]
async fn invalidate_requires_namespaced_pattern() {
    let state = test_state().await;

    let response = app(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/cache/invalidate?pattern=*")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/cache/invalidate?pattern=opsconductor:stage_a:*")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["invalidated_count"], 0);
}

#[tokio::test]
async fn invalidate_stage_rejects_unknown_stage() {
    let state = test_state().await;

    let response = app(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/cache/invalidate/stage/asset")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/cache/invalidate/stage/stage_b")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn pipeline_rejects_malformed_resume() {
    let app = app(test_state().await);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/pipeline/resume")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "request_id": "no-such-request",
                        "approval_token": "token"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    // Unknown request id is a validation error.
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "validation_error");
}

#[tokio::test]
async fn cancel_unknown_request_is_a_no_op() {
    let app = app(test_state().await);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/pipeline/cancel/ghost-request")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["cancelled"], false);
}
