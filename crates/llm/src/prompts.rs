//! Versioned prompt templates, one per LLM-driven stage.
//!
//! Templates are compact and parameterized by JSON schema strings rather
//! than prose; stage code fills them with the request's artifacts. Bump
//! [`PROMPT_VERSION`] when any template changes — it is part of every
//! stage cache key, so stale cached outputs never outlive their prompt.

use oc_domain::artifact::{Decision, Plan, ToolResult, ToolSelection};
use oc_domain::error::Stage;

use crate::backend::ChatMessage;

/// Version tag folded into stage cache keys.
pub const PROMPT_VERSION: &str = "v2";

/// Per-stage completion budgets.
pub const MAX_TOKENS_INTENT: u32 = 100;
pub const MAX_TOKENS_ENTITIES: u32 = 150;
pub const MAX_TOKENS_RISK: u32 = 150;
pub const MAX_TOKENS_PLAN: u32 = 2000;
pub const MAX_TOKENS_ANSWER: u32 = 2000;

/// Tokens held back from the context window when clamping Stage D output.
pub const ANSWER_SAFETY_MARGIN: u32 = 128;

const INTENT_SYSTEM: &str = "You classify IT-operations requests. Respond with ONLY a JSON object: \
{\"category\": string, \"action\": string, \"confidence\": number 0..1}. \
Categories: asset_management, service_management, database, network, security, \
configuration, monitoring, other. Action is a short snake_case verb phrase, \
e.g. asset_query, service_restart, db_delete.";

const ENTITY_SYSTEM: &str = "You extract entities from IT-operations requests. Respond with ONLY a JSON \
object: {\"entities\": [{\"type\": string, \"value\": string, \"confidence\": \
number 0..1, \"normalized_value\": string|null}]}. Types: hostname, service, \
database, environment, platform, ip_address, path, other. Normalize \
environments to production|staging|development.";

const RISK_SYSTEM: &str = "You assess the risk of an IT-operations request. Respond with ONLY a JSON \
object: {\"confidence\": number 0..1, \"risk\": \"low\"|\"medium\"|\"high\"|\"critical\", \
\"rationale\": string}. Judge blast radius, reversibility, and whether \
production is involved.";

const PLAN_SYSTEM: &str = "You write execution plans for IT-operations requests. Rubric: Discovery \
first | Idempotent | Fail-safe | Explicit deps | Info -> validate -> modify. \
Use ONLY the provided tools. Respond with ONLY a JSON object: \
{\"steps\": [{\"id\": string, \"description\": string, \"tool\": string, \
\"inputs\": object, \"preconditions\": [string], \"success_criteria\": [string], \
\"failure_handling\": \"abort\"|\"warn\"|\"continue\", \"estimated_duration_s\": \
number, \"depends_on\": [string]}], \
\"safety_checks\": [{\"check\": string, \"stage\": \"before\"|\"during\"|\"after\", \
\"failure_action\": string}], \
\"rollback_plan\": [{\"step_id\": string, \"rollback_action\": string}], \
\"approval_gates\": [{\"gate_id\": string, \"stage\": \"before\", \
\"covers_steps\": [string], \"reason\": string}]}. \
Every destructive step MUST have a rollback_plan entry. Steps touching \
production at high risk MUST be covered by a before gate.";

const ANSWER_SYSTEM: &str = "You answer IT operators based on an execution plan and its observed \
results. Cite every factual claim inline with [step:<id>], [asset:<id>] or \
[tool:<id>] tokens. Steps WITHOUT an observed result have not run: describe \
them in future tense and never claim their outcome. Be concise and concrete.";

/// Holds the stage templates and renders per-request messages.
pub struct PromptManager;

impl PromptManager {
    /// Stage A intent classification.
    pub fn intent(text: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(INTENT_SYSTEM),
            ChatMessage::user(text.to_string()),
        ]
    }

    /// Stage A entity extraction.
    pub fn entities(text: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(ENTITY_SYSTEM),
            ChatMessage::user(text.to_string()),
        ]
    }

    /// Stage A conditional risk/confidence assessment.
    pub fn risk(text: &str, decision: &Decision) -> Vec<ChatMessage> {
        let entity_digest: Vec<String> = decision
            .entities
            .iter()
            .map(|e| format!("{}={}", e.entity_type, e.value))
            .collect();
        vec![
            ChatMessage::system(RISK_SYSTEM),
            ChatMessage::user(format!(
                "request: {text}\nintent: {}/{}\nentities: {}",
                decision.intent.category,
                decision.intent.action,
                entity_digest.join(", ")
            )),
        ]
    }

    /// Stage C planning.
    ///
    /// `asset_digest` is a compact rendering of any pre-fetched asset
    /// context, or a "data unavailable" note when enrichment failed.
    pub fn plan(
        text: &str,
        decision: &Decision,
        selection: &ToolSelection,
        asset_digest: &str,
    ) -> Vec<ChatMessage> {
        let tools: Vec<String> = selection
            .selected
            .iter()
            .map(|t| format!("{} ({})", t.name, t.justification))
            .collect();
        vec![
            ChatMessage::system(PLAN_SYSTEM),
            ChatMessage::user(format!(
                "request: {text}\nintent: {}/{} risk: {}\ntools: {}\nassets: {asset_digest}",
                decision.intent.category,
                decision.intent.action,
                decision.risk.as_str(),
                tools.join("; "),
            )),
        ]
    }

    /// Stage D answer synthesis. `asset_digest` carries the hydrated asset
    /// context so the model can ground claims in `[asset:..]` citations.
    pub fn answer(
        text: &str,
        decision: &Decision,
        plan: &Plan,
        results: &[ToolResult],
        asset_digest: &str,
    ) -> Vec<ChatMessage> {
        let plan_json = serde_json::to_string(plan).unwrap_or_default();
        let results_json = serde_json::to_string(results).unwrap_or_default();
        vec![
            ChatMessage::system(ANSWER_SYSTEM),
            ChatMessage::user(format!(
                "request: {text}\nrisk: {}\nassets: {asset_digest}\nplan: {plan_json}\n\
                 observed_results: {results_json}",
                decision.risk.as_str(),
            )),
        ]
    }

    /// Default completion budget for a stage's primary call.
    pub fn max_tokens_for(stage: Stage) -> u32 {
        match stage {
            Stage::Classify => MAX_TOKENS_INTENT,
            Stage::Select => 0,
            Stage::Plan => MAX_TOKENS_PLAN,
            Stage::Answer => MAX_TOKENS_ANSWER,
            Stage::Execute => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_domain::artifact::{DecisionSource, Intent, RiskLevel};

    fn decision() -> Decision {
        Decision::new(
            Intent {
                category: "service_management".into(),
                action: "service_restart".into(),
            },
            vec![],
            0.8,
            RiskLevel::Medium,
            DecisionSource::Rule,
        )
    }

    #[test]
    fn intent_prompt_shape() {
        let msgs = PromptManager::intent("restart nginx");
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].content.contains("JSON"));
        assert_eq!(msgs[1].content, "restart nginx");
    }

    #[test]
    fn risk_prompt_includes_intent_and_entities() {
        let mut d = decision();
        d.entities.push(oc_domain::artifact::Entity {
            entity_type: "service".into(),
            value: "nginx".into(),
            confidence: 0.9,
            normalized_value: None,
        });
        let msgs = PromptManager::risk("restart nginx", &d);
        assert!(msgs[1].content.contains("service_management/service_restart"));
        assert!(msgs[1].content.contains("service=nginx"));
    }

    #[test]
    fn plan_prompt_lists_selected_tools() {
        let selection = ToolSelection {
            selected: vec![oc_domain::artifact::SelectedTool {
                name: "service_restart".into(),
                justification: "matches intent".into(),
                inputs_needed: vec![],
                execution_order: 1,
                depends_on: vec![],
            }],
            ..ToolSelection::default()
        };
        let msgs = PromptManager::plan("restart nginx", &decision(), &selection, "none");
        assert!(msgs[1].content.contains("service_restart (matches intent)"));
        assert!(msgs[0].content.contains("Discovery"));
    }

    #[test]
    fn answer_prompt_demands_future_tense_for_unexecuted() {
        let msgs =
            PromptManager::answer("restart nginx", &decision(), &Plan::default(), &[], "none");
        assert!(msgs[0].content.contains("future tense"));
        assert!(msgs[1].content.contains("assets: none"));
    }
}
