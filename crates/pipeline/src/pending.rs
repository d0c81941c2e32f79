//! Awaiting-approval persistence.
//!
//! When a plan carries approval gates, the orchestrator parks the request:
//! its artifacts are written under `opsconductor:pending:{request_id}` with
//! a TTL equal to the approval window, and the caller receives a one-time
//! resume token. Only the token's SHA-256 digest is stored; verification is
//! constant-time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use oc_cache::keys::pending_key;
use oc_cache::CacheManager;
use oc_domain::artifact::{Decision, PipelineRequest, Plan, ToolSelection};
use oc_domain::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// The parked artifacts for one awaiting-approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRecord {
    pub request: PipelineRequest,
    pub decision: Decision,
    pub selection: ToolSelection,
    pub plan: Plan,
    /// Hex SHA-256 of the resume token handed to the caller.
    token_sha256: String,
    pub created_at: DateTime<Utc>,
}

pub struct PendingStore {
    cache: Arc<CacheManager>,
    window_s: u64,
}

impl PendingStore {
    pub fn new(cache: Arc<CacheManager>, window_s: u64) -> Self {
        Self { cache, window_s }
    }

    /// Park a request. Returns the plaintext resume token — the only time
    /// it exists outside the caller's hands.
    pub async fn park(
        &self,
        request: &PipelineRequest,
        decision: &Decision,
        selection: &ToolSelection,
        plan: &Plan,
    ) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        let record = PendingRecord {
            request: request.clone(),
            decision: decision.clone(),
            selection: selection.clone(),
            plan: plan.clone(),
            token_sha256: hex::encode(Sha256::digest(token.as_bytes())),
            created_at: Utc::now(),
        };
        let key = pending_key(&request.request_id.to_string());
        let value = serde_json::to_value(&record)?;
        self.cache.set_raw(&key, &value, self.window_s).await;
        Ok(token)
    }

    /// Load and verify a parked request. An unknown/expired id is a
    /// validation error; a wrong token re-raises `ApprovalRequired` with no
    /// fresh token attached.
    pub async fn take(&self, request_id: &str, token: &str) -> Result<PendingRecord> {
        let key = pending_key(request_id);
        let value = self.cache.get_raw(&key).await.ok_or_else(|| {
            Error::Validation(format!(
                "no awaiting-approval request {request_id} (unknown id or approval window expired)"
            ))
        })?;
        let record: PendingRecord = serde_json::from_value(value)?;

        let provided = Sha256::digest(token.as_bytes());
        let stored = hex::decode(&record.token_sha256).unwrap_or_default();
        if !bool::from(provided.as_slice().ct_eq(stored.as_slice())) {
            return Err(Error::ApprovalRequired {
                request_id: request_id.to_string(),
                resume_token: None,
            });
        }

        self.cache.del_raw(&key).await;
        Ok(record)
    }

    pub fn window_s(&self) -> u64 {
        self.window_s
    }
}
