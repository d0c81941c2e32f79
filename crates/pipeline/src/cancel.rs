//! Per-request cancellation tokens.
//!
//! Each in-flight request registers a [`CancelToken`]. `cancel(request_id)`
//! signals every suspension point holding a clone of that token; the request
//! unwinds cooperatively at its next check.

use std::collections::HashMap;

use oc_domain::cancel::CancelToken;
use parking_lot::Mutex;

/// Tracks active cancellation tokens per request id.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new cancel token for a request.
    pub fn register(&self, request_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(request_id.to_owned(), token.clone());
        token
    }

    /// Cancel an in-flight request. Returns true if a token was found.
    /// Cancelling an unknown or already-finished request is a no-op.
    pub fn cancel(&self, request_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(request_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Remove the token for a request (called when the request completes).
    pub fn remove(&self, request_id: &str) {
        self.tokens.lock().remove(request_id);
    }

    /// Check if a request is currently in flight.
    pub fn is_running(&self, request_id: &str) -> bool {
        self.tokens.lock().contains_key(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_cancel() {
        let map = CancelMap::new();
        let token = map.register("req-1");
        assert!(!token.is_cancelled());
        assert!(map.is_running("req-1"));

        assert!(map.cancel("req-1"));
        assert!(token.is_cancelled());

        map.remove("req-1");
        assert!(!map.is_running("req-1"));
        assert!(!map.cancel("req-1"));
    }

    #[test]
    fn cancel_unknown_request_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("ghost"));
    }

    #[test]
    fn remove_is_idempotent() {
        let map = CancelMap::new();
        map.register("req-1");
        map.remove("req-1");
        map.remove("req-1");
        assert!(!map.is_running("req-1"));
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let old_token = map.register("req-1");
        let new_token = map.register("req-1");

        map.cancel("req-1");
        assert!(new_token.is_cancelled());
        // The orphaned token is no longer reachable via the map.
        assert!(!old_token.is_cancelled());
    }
}
