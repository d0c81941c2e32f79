//! Cache-API authentication middleware.
//!
//! Reads the env var named by `config.server.api_token_env` (default
//! `OC_API_TOKEN`) **once at startup** and caches the SHA-256 digest in
//! `AppState`.
//! - If the env var is set and non-empty, every protected request must carry
//!   `Authorization: Bearer <token>`.
//! - If the env var is unset or empty, the server logs a warning once and
//!   allows unauthenticated access (dev mode).

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Axum middleware that enforces bearer-token authentication on protected
/// routes. Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // `api_token_hash` is `None` in dev mode (no token configured).
    let expected_hash = match &state.api_token_hash {
        Some(h) => h,
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Hash the provided token to a fixed-length digest, then compare
    // in constant time. This avoids leaking the token length.
    let provided_hash = Sha256::digest(provided.as_bytes());

    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "invalid or missing API token" })),
        )
            .into_response();
    }

    next.run(req).await
}

/// Compute the startup token hash from the configured env var.
pub fn token_hash_from_env(var: &str) -> Option<Vec<u8>> {
    match std::env::var(var) {
        Ok(token) if !token.is_empty() => Some(Sha256::digest(token.as_bytes()).to_vec()),
        _ => {
            tracing::warn!(
                env_var = %var,
                "no API token configured — cache API runs unauthenticated (dev mode)"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_not_the_token() {
        std::env::set_var("OC_TEST_TOKEN_A", "secret");
        let hash = token_hash_from_env("OC_TEST_TOKEN_A").unwrap();
        assert_eq!(hash.len(), 32);
        assert_eq!(hash, Sha256::digest(b"secret").to_vec());
        std::env::remove_var("OC_TEST_TOKEN_A");
    }

    #[test]
    fn empty_or_missing_token_means_dev_mode() {
        std::env::remove_var("OC_TEST_TOKEN_B");
        assert!(token_hash_from_env("OC_TEST_TOKEN_B").is_none());
        std::env::set_var("OC_TEST_TOKEN_B", "");
        assert!(token_hash_from_env("OC_TEST_TOKEN_B").is_none());
        std::env::remove_var("OC_TEST_TOKEN_B");
    }
}
