use serde::Serialize;

/// Structured pipeline events emitted across all OpsConductor crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum PipelineEvent {
    StageCompleted {
        request_id: String,
        stage: &'static str,
        duration_ms: u64,
        cache_hit: bool,
    },
    LlmCall {
        stage: &'static str,
        model: String,
        duration_ms: u64,
        prompt_tokens: u32,
        completion_tokens: u32,
        attempts: u32,
    },
    CacheInvalidated {
        namespace: String,
        invalidated_count: u64,
    },
    ExecutionDispatched {
        request_id: String,
        execution_id: String,
        step_count: usize,
    },
    AwaitingApproval {
        request_id: String,
        gate_count: usize,
        window_s: u64,
    },
    RequestCompleted {
        request_id: String,
        total_ms: u64,
        outcome: &'static str,
    },
}

impl PipelineEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(pipeline_event = %json, "oc_event");
    }
}
