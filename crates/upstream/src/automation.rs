//! Client for the Automation service: dispatch a validated plan, poll
//! per-step observations until terminal, and signal cancellation.
//!
//! The pipeline never executes commands itself — this client is the only
//! path by which a plan leaves the process.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use oc_domain::artifact::Plan;
use oc_domain::cancel::CancelToken;
use oc_domain::config::UpstreamConfig;
use oc_domain::error::{Error, Result};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Body of `POST /executions`.
///
/// `step_instances` maps each step id to a client-generated instance id;
/// replaying the same plan with the same ids must not re-execute completed
/// steps on the Automation side.
#[derive(Debug, Serialize)]
pub struct ExecutionRequest<'a> {
    pub request_id: String,
    pub plan: &'a Plan,
    pub step_instances: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ExecutionCreated {
    execution_id: String,
}

/// Terminal and non-terminal execution states reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }
}

/// One step's observed progress.
#[derive(Debug, Clone, Deserialize)]
pub struct StepObservation {
    pub step_id: String,
    pub status: ExecutionState,
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Response of `GET /executions/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStatusReport {
    pub status: ExecutionState,
    #[serde(default)]
    pub steps: Vec<StepObservation>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct AutomationClient {
    http: reqwest::Client,
    base_url: String,
}

impl AutomationClient {
    pub fn new(cfg: &UpstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.automation_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Dispatch a plan. Returns the service-assigned execution id.
    pub async fn dispatch(
        &self,
        request: &ExecutionRequest<'_>,
        cancel: &CancelToken,
    ) -> Result<String> {
        cancel.ensure_active()?;
        let url = format!("{}/executions", self.base_url);
        let resp = tokio::select! {
            r = self.http.post(&url).json(request).send() => r,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }
        .map_err(unavailable)?;
        cancel.ensure_active()?;

        let created: ExecutionCreated = decode(resp).await?;
        Ok(created.execution_id)
    }

    /// Poll the current status and per-step observations.
    pub async fn status(
        &self,
        execution_id: &str,
        cancel: &CancelToken,
    ) -> Result<ExecutionStatusReport> {
        cancel.ensure_active()?;
        let url = format!("{}/executions/{execution_id}", self.base_url);
        let resp = tokio::select! {
            r = self.http.get(&url).send() => r,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }
        .map_err(unavailable)?;
        cancel.ensure_active()?;
        decode(resp).await
    }

    /// Signal cancellation for an execution. Best-effort — a transport
    /// failure here is logged, not surfaced, since the caller is already
    /// tearing the request down.
    pub async fn cancel_execution(&self, execution_id: &str, request_id: &str) {
        let url = format!("{}/executions/{execution_id}/cancel", self.base_url);
        let body = serde_json::json!({ "request_id": request_id });
        if let Err(e) = self.http.post(&url).json(&body).send().await {
            tracing::warn!(%execution_id, error = %e, "failed to signal execution cancel");
        }
    }
}

fn unavailable(e: reqwest::Error) -> Error {
    Error::UpstreamUnavailable {
        service: "automation".into(),
        message: e.to_string(),
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let body = resp.text().await.map_err(unavailable)?;
    if !status.is_success() {
        return Err(Error::UpstreamUnavailable {
            service: "automation".into(),
            message: format!("HTTP {} - {}", status.as_u16(), body),
        });
    }
    serde_json::from_str(&body).map_err(|e| Error::UpstreamUnavailable {
        service: "automation".into(),
        message: format!("undecodable response: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_report_parses() {
        let raw = r#"{
            "status": "running",
            "steps": [
                {"step_id": "s1", "status": "succeeded", "output": {"rows": 3}, "duration_ms": 120},
                {"step_id": "s2", "status": "running"}
            ]
        }"#;
        let report: ExecutionStatusReport = serde_json::from_str(raw).unwrap();
        assert_eq!(report.status, ExecutionState::Running);
        assert!(!report.status.is_terminal());
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].output["rows"], 3);
        assert!(report.steps[1].error.is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(ExecutionState::Succeeded.is_terminal());
        assert!(ExecutionState::Failed.is_terminal());
        assert!(ExecutionState::Cancelled.is_terminal());
        assert!(!ExecutionState::Pending.is_terminal());
    }

    #[test]
    fn execution_request_serializes_instance_ids() {
        let plan = Plan::default();
        let mut step_instances = HashMap::new();
        step_instances.insert("s1".to_string(), "inst-1".to_string());
        let req = ExecutionRequest {
            request_id: "req-1".into(),
            plan: &plan,
            step_instances,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["step_instances"]["s1"], "inst-1");
        assert_eq!(v["request_id"], "req-1");
    }

    #[tokio::test]
    async fn cancelled_token_rejects_dispatch() {
        let client = AutomationClient::new(&UpstreamConfig::default()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let plan = Plan::default();
        let req = ExecutionRequest {
            request_id: "r".into(),
            plan: &plan,
            step_instances: HashMap::new(),
        };
        assert!(matches!(
            client.dispatch(&req, &cancel).await,
            Err(Error::Cancelled)
        ));
    }
}
