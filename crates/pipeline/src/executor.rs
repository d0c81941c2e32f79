//! Stage E: the executor bridge.
//!
//! Gates execution on approval state, dispatches the validated plan to the
//! Automation service, and folds per-step observations back into
//! [`ToolResult`]s for Stage D. The pipeline itself never touches a remote
//! host.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use oc_domain::artifact::{ExecutionOutcome, FailureHandling, Plan, ToolResult};
use oc_domain::cancel::CancelToken;
use oc_domain::error::{Error, Result};
use oc_domain::trace::PipelineEvent;
use oc_upstream::automation::{ExecutionRequest, ExecutionState};
use oc_upstream::{AutomationClient, StepObservation};
use uuid::Uuid;

pub struct ExecutorBridge {
    automation: AutomationClient,
    heartbeat: Duration,
}

impl ExecutorBridge {
    pub fn new(automation: AutomationClient, heartbeat_ms: u64) -> Self {
        Self {
            automation,
            heartbeat: Duration::from_millis(heartbeat_ms.max(100)),
        }
    }

    /// Dispatch a plan and poll it to a terminal state.
    ///
    /// `approved` reflects a verified approval token (or a plan without
    /// gates). On cancellation mid-flight the Automation service is
    /// signalled and the observations received so far are returned with
    /// `completed = false`; nothing observed after the signal is folded in.
    pub async fn execute_plan(
        &self,
        request_id: &str,
        plan: &Plan,
        approved: bool,
        cancel: &CancelToken,
    ) -> Result<ExecutionOutcome> {
        if !plan.approval_gates.is_empty() && !approved {
            return Err(Error::ApprovalRequired {
                request_id: request_id.to_string(),
                resume_token: None,
            });
        }

        // Client-generated instance ids make replays idempotent: the
        // Automation service skips instances it has already completed.
        let step_instances: HashMap<String, String> = plan
            .steps
            .iter()
            .map(|s| (s.id.clone(), format!("{request_id}:{}", Uuid::new_v4())))
            .collect();

        let request = ExecutionRequest {
            request_id: request_id.to_string(),
            plan,
            step_instances,
        };

        let execution_id = self.automation.dispatch(&request, cancel).await?;
        PipelineEvent::ExecutionDispatched {
            request_id: request_id.to_string(),
            execution_id: execution_id.clone(),
            step_count: plan.steps.len(),
        }
        .emit();

        let mut observed: HashMap<String, ToolResult> = HashMap::new();
        loop {
            if cancel.is_cancelled() {
                self.automation
                    .cancel_execution(&execution_id, request_id)
                    .await;
                return Ok(outcome(execution_id, plan, observed, false));
            }

            let report = match self.automation.status(&execution_id, cancel).await {
                Ok(report) => report,
                Err(Error::Cancelled) => {
                    self.automation
                        .cancel_execution(&execution_id, request_id)
                        .await;
                    return Ok(outcome(execution_id, plan, observed, false));
                }
                Err(other) => return Err(other),
            };

            for step in &report.steps {
                if step.status.is_terminal() {
                    observed.insert(step.step_id.clone(), to_tool_result(plan, step));
                }
            }

            if report.status.is_terminal() {
                let completed = report.status == ExecutionState::Succeeded;
                return Ok(outcome(execution_id, plan, observed, completed));
            }

            tokio::select! {
                _ = tokio::time::sleep(self.heartbeat) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }
}

fn to_tool_result(plan: &Plan, observation: &StepObservation) -> ToolResult {
    let (tool, inputs_hash) = plan
        .step(&observation.step_id)
        .map(|s| (s.tool.clone(), hash_inputs(&s.inputs)))
        .unwrap_or_else(|| (String::from("unknown"), String::new()));
    ToolResult {
        tool,
        step_id: observation.step_id.clone(),
        inputs_hash,
        output: observation.output.clone(),
        started_at: observation.started_at.unwrap_or_else(Utc::now),
        duration_ms: observation.duration_ms,
        success: observation.status == ExecutionState::Succeeded,
        error: observation.error.clone(),
    }
}

/// Stable fingerprint of a step's inputs; keys the read-only tool-result
/// cache.
pub(crate) fn hash_inputs(inputs: &serde_json::Value) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(inputs.to_string().as_bytes());
    hex::encode(&digest[..16])
}

fn outcome(
    execution_id: String,
    plan: &Plan,
    observed: HashMap<String, ToolResult>,
    completed: bool,
) -> ExecutionOutcome {
    // First failed step whose plan declared anything but continue is the
    // abort point.
    let aborted_step = plan
        .steps
        .iter()
        .find(|s| {
            s.failure_handling != FailureHandling::Continue
                && observed.get(&s.id).is_some_and(|r| !r.success)
        })
        .map(|s| s.id.clone());

    // Results in plan order for deterministic responses.
    let mut results: Vec<ToolResult> = Vec::new();
    let mut observed = observed;
    for step in &plan.steps {
        if let Some(result) = observed.remove(&step.id) {
            results.push(result);
        }
    }

    ExecutionOutcome {
        execution_id,
        results,
        completed: completed && aborted_step.is_none(),
        aborted_step,
    }
}
