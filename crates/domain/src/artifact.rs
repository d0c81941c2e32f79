//! Stage artifacts: the typed, immutable values that flow through the
//! pipeline. Later stages consume earlier artifacts by reference and never
//! mutate them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maximum accepted request text length in characters.
pub const MAX_REQUEST_CHARS: usize = 8192;

/// The immutable request envelope shared by all stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub request_id: Uuid,
    pub user_id: String,
    pub session_id: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
    /// Total wall-clock budget for this request.
    pub deadline_ms: u64,
}

impl PipelineRequest {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        text: impl Into<String>,
        deadline_ms: u64,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            text: text.into(),
            received_at: Utc::now(),
            deadline_ms,
        }
    }

    /// Validate input shape: non-empty text within the size cap, and a
    /// positive deadline.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.text.is_empty() {
            return Err(crate::error::Error::Validation(
                "request text must not be empty".into(),
            ));
        }
        if self.text.chars().count() > MAX_REQUEST_CHARS {
            return Err(crate::error::Error::Validation(format!(
                "request text exceeds {MAX_REQUEST_CHARS} characters"
            )));
        }
        if self.deadline_ms == 0 {
            return Err(crate::error::Error::Validation(
                "deadline_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage A — Decision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Operation risk, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            "critical" => Some(RiskLevel::Critical),
            _ => None,
        }
    }
}

/// Where a Decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Cache,
    Rule,
    Llm,
    Hybrid,
}

/// The classified intent of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub category: String,
    pub action: String,
}

/// An entity extracted from the request text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub value: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_value: Option<String>,
}

/// Stage A output: intent, entities, confidence, and risk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub intent: Intent,
    pub entities: Vec<Entity>,
    /// Overall classification confidence in `[0, 1]`.
    pub overall_confidence: f64,
    pub risk: RiskLevel,
    pub requires_approval: bool,
    pub source: DecisionSource,
    /// Notes about degraded inputs, e.g. "asset data unavailable".
    #[serde(default)]
    pub annotations: Vec<String>,
}

impl Decision {
    /// Build a decision, enforcing the critical-risk-requires-approval
    /// invariant and clamping confidence into `[0, 1]`.
    pub fn new(
        intent: Intent,
        entities: Vec<Entity>,
        overall_confidence: f64,
        risk: RiskLevel,
        source: DecisionSource,
    ) -> Self {
        Self {
            intent,
            entities,
            overall_confidence: overall_confidence.clamp(0.0, 1.0),
            requires_approval: risk >= RiskLevel::Critical,
            risk,
            source,
            annotations: Vec::new(),
        }
    }

    /// Values of all entities of the given type.
    pub fn entities_of_type<'a>(&'a self, entity_type: &str) -> Vec<&'a str> {
        self.entities
            .iter()
            .filter(|e| e.entity_type == entity_type)
            .map(|e| e.value.as_str())
            .collect()
    }

    /// Whether any extracted entity points at a production environment.
    pub fn targets_production(&self) -> bool {
        self.entities.iter().any(|e| {
            let v = e
                .normalized_value
                .as_deref()
                .unwrap_or(&e.value)
                .to_ascii_lowercase();
            e.entity_type == "environment" && (v == "production" || v == "prod")
                || v.contains("prod")
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage B — ToolSelection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One tool picked by the selector, with its rationale and ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedTool {
    pub name: String,
    pub justification: String,
    /// Entity types / inputs this tool still needs. Entries absent from the
    /// Decision must be marked `to_be_elicited:<type>`.
    #[serde(default)]
    pub inputs_needed: Vec<String>,
    pub execution_order: u32,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Stage B output.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolSelection {
    pub selected: Vec<SelectedTool>,
    /// Capabilities the intent needs that no catalog tool provides.
    #[serde(default)]
    pub unmet_capabilities: Vec<String>,
    /// Near-miss candidates (score in `[0.4, 0.6)`) offered for
    /// clarification when nothing crossed the selection threshold.
    #[serde(default)]
    pub clarification_candidates: Vec<String>,
    pub approval_required: bool,
}

impl ToolSelection {
    pub fn tool_names(&self) -> Vec<&str> {
        self.selected.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.selected.iter().any(|t| t.name == name)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage C — Plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailureHandling {
    #[default]
    Abort,
    Warn,
    Continue,
}

/// When a safety check or approval gate applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatePhase {
    Before,
    During,
    After,
}

/// A single plan step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    pub tool: String,
    #[serde(default)]
    pub inputs: serde_json::Value,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub failure_handling: FailureHandling,
    #[serde(default)]
    pub estimated_duration_s: u64,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub check: String,
    pub stage: GatePhase,
    pub failure_action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub step_id: String,
    pub rollback_action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalGate {
    pub gate_id: String,
    pub stage: GatePhase,
    /// Step ids this gate covers.
    #[serde(default)]
    pub covers_steps: Vec<String>,
    pub reason: String,
}

/// Stage C output: the validated execution plan.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Plan {
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub safety_checks: Vec<SafetyCheck>,
    #[serde(default)]
    pub rollback_plan: Vec<RollbackEntry>,
    #[serde(default)]
    pub approval_gates: Vec<ApprovalGate>,
}

impl Plan {
    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn rollback_for(&self, step_id: &str) -> Option<&RollbackEntry> {
        self.rollback_plan.iter().find(|r| r.step_id == step_id)
    }

    /// Whether a `before` gate covers the given step (an empty
    /// `covers_steps` list covers the whole plan).
    pub fn has_before_gate_for(&self, step_id: &str) -> bool {
        self.approval_gates.iter().any(|g| {
            g.stage == GatePhase::Before
                && (g.covers_steps.is_empty() || g.covers_steps.iter().any(|s| s == step_id))
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool results & execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A concrete observation from executing or pre-checking one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub step_id: String,
    /// Hash of the step inputs, used for read-only result caching.
    pub inputs_hash: String,
    pub output: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Stage E outcome: observations gathered from the Automation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub execution_id: String,
    pub results: Vec<ToolResult>,
    /// True when every step reached a terminal success state.
    pub completed: bool,
    /// The step that aborted the run, when one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_step: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage D — Response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A grounding reference attached to the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Citation {
    Step { step_id: String },
    Asset { asset_id: String },
    ToolCall { tool_call_id: String },
}

/// Per-stage cache hit flags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct CacheHits {
    pub stage_a: bool,
    pub stage_b: bool,
    pub stage_c: bool,
}

/// Wall-clock timings per stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct StageTimings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_a_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_b_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_c_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_d_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_e_ms: Option<u64>,
    pub total_ms: u64,
}

/// LLM token accounting accumulated across a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Stage D output: the final, grounded response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub request_id: Uuid,
    pub text: String,
    pub citations: Vec<Citation>,
    pub confidence: f64,
    pub cache_hits: CacheHits,
    pub timings: StageTimings,
    pub token_usage: TokenUsage,
    /// Zero-based indexes of paragraphs that carried no citation while
    /// strict grounding was on.
    #[serde(default)]
    pub unverified_paragraphs: Vec<usize>,
    /// Declared gaps, e.g. upstream reads that failed during enrichment.
    #[serde(default)]
    pub data_gaps: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Asset context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cached read-only view of an external asset.
///
/// Consumers receive value copies; the cache never hands out references to
/// its internal storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetContext {
    pub asset_id: String,
    pub asset_type: String,
    pub environment: String,
    pub attributes: BTreeMap<String, String>,
    /// Opaque version token from the Asset service; part of the cache key.
    pub version: String,
    pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> Plan {
        Plan {
            steps: vec![
                PlanStep {
                    id: "s1".into(),
                    description: "query disk usage".into(),
                    tool: "asset_query".into(),
                    inputs: serde_json::json!({"host": "web-01"}),
                    preconditions: vec!["host reachable".into()],
                    success_criteria: vec!["usage figure returned".into()],
                    failure_handling: FailureHandling::Abort,
                    estimated_duration_s: 5,
                    depends_on: vec![],
                },
                PlanStep {
                    id: "s2".into(),
                    description: "restart service".into(),
                    tool: "service_restart".into(),
                    inputs: serde_json::json!({"service": "nginx"}),
                    preconditions: vec![],
                    success_criteria: vec!["service active".into()],
                    failure_handling: FailureHandling::Abort,
                    estimated_duration_s: 30,
                    depends_on: vec!["s1".into()],
                },
            ],
            safety_checks: vec![SafetyCheck {
                check: "confirm maintenance window".into(),
                stage: GatePhase::Before,
                failure_action: "abort".into(),
            }],
            rollback_plan: vec![RollbackEntry {
                step_id: "s2".into(),
                rollback_action: "start previous release".into(),
            }],
            approval_gates: vec![ApprovalGate {
                gate_id: "g1".into(),
                stage: GatePhase::Before,
                covers_steps: vec!["s2".into()],
                reason: "production restart".into(),
            }],
        }
    }

    #[test]
    fn plan_serde_round_trip_is_identity() {
        let plan = sample_plan();
        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_value(&plan).unwrap(), serde_json::to_value(&back).unwrap());
    }

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn critical_risk_forces_approval() {
        let decision = Decision::new(
            Intent {
                category: "database".into(),
                action: "delete".into(),
            },
            vec![],
            0.95,
            RiskLevel::Critical,
            DecisionSource::Hybrid,
        );
        assert!(decision.requires_approval);

        let low = Decision::new(
            Intent {
                category: "asset_management".into(),
                action: "asset_query".into(),
            },
            vec![],
            0.95,
            RiskLevel::Low,
            DecisionSource::Rule,
        );
        assert!(!low.requires_approval);
    }

    #[test]
    fn confidence_is_clamped() {
        let d = Decision::new(
            Intent {
                category: "c".into(),
                action: "a".into(),
            },
            vec![],
            1.7,
            RiskLevel::Low,
            DecisionSource::Rule,
        );
        assert_eq!(d.overall_confidence, 1.0);
    }

    #[test]
    fn targets_production_matches_environment_entities() {
        let mut d = Decision::new(
            Intent {
                category: "service".into(),
                action: "restart".into(),
            },
            vec![Entity {
                entity_type: "environment".into(),
                value: "Production".into(),
                confidence: 0.9,
                normalized_value: Some("production".into()),
            }],
            0.9,
            RiskLevel::Medium,
            DecisionSource::Rule,
        );
        assert!(d.targets_production());

        d.entities = vec![Entity {
            entity_type: "hostname".into(),
            value: "web-prod-01".into(),
            confidence: 0.9,
            normalized_value: None,
        }];
        assert!(d.targets_production());

        d.entities = vec![Entity {
            entity_type: "hostname".into(),
            value: "web-staging-01".into(),
            confidence: 0.9,
            normalized_value: None,
        }];
        assert!(!d.targets_production());
    }

    #[test]
    fn request_validation_bounds() {
        let mut req = PipelineRequest::new("u1", "sess1", "list servers", 30_000);
        assert!(req.validate().is_ok());

        req.text = String::new();
        assert!(req.validate().is_err());

        req.text = "x".repeat(MAX_REQUEST_CHARS + 1);
        assert!(req.validate().is_err());

        req.text = "list servers".into();
        req.deadline_ms = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn before_gate_coverage() {
        let plan = sample_plan();
        assert!(plan.has_before_gate_for("s2"));
        assert!(!plan.has_before_gate_for("s1"));
        assert!(plan.rollback_for("s2").is_some());
        assert!(plan.rollback_for("s1").is_none());
    }

    #[test]
    fn citation_serde_shapes() {
        let c = Citation::Step { step_id: "s1".into() };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v, serde_json::json!({"step_id": "s1"}));
        let back: Citation = serde_json::from_value(v).unwrap();
        assert_eq!(back, c);
    }
}
