//! Stage C: LLM-driven planning with mandatory deterministic validation.
//!
//! One JSON-mode call produces a [`Plan`] candidate; a corrective retry is
//! granted for parse failures, then the validation rules run in a fixed
//! order and the first failure surfaces as `PlanInvalid`. The orchestrator
//! never asks the model to "fix" an invalid plan beyond that protocol
//! retry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use oc_cache::keys::{cache_key, canonicalize_entities, Namespace};
use oc_cache::CacheManager;
use oc_domain::artifact::{
    Decision, FailureHandling, Plan, RiskLevel, TokenUsage, ToolSelection,
};
use oc_domain::cancel::CancelToken;
use oc_domain::error::{Error, Result, Stage};
use oc_domain::tool::ToolCatalog;
use oc_llm::prompts::{PromptManager, PROMPT_VERSION, MAX_TOKENS_PLAN};
use oc_llm::{ChatCall, ChatMessage, LlmService};

#[derive(Debug)]
pub struct PlanOutcome {
    pub plan: Plan,
    pub cache_hit: bool,
    pub usage: TokenUsage,
}

pub struct Planner {
    llm: Arc<LlmService>,
    cache: Arc<CacheManager>,
}

impl Planner {
    pub fn new(llm: Arc<LlmService>, cache: Arc<CacheManager>) -> Self {
        Self { llm, cache }
    }

    /// Fingerprint of everything the plan depends on: the action, the
    /// canonical entities, tool versions, asset versions, and the prompt
    /// revision.
    fn plan_key(
        decision: &Decision,
        selection: &ToolSelection,
        catalog: &ToolCatalog,
        asset_versions: &[String],
    ) -> String {
        let selected: Vec<String> = selection
            .selected
            .iter()
            .filter_map(|t| catalog.get(&t.name).map(|spec| format!("{}@{}", spec.name, spec.version)))
            .collect();
        let canonical = format!(
            "{}|{}|{}|{}|{}",
            decision.intent.action,
            canonicalize_entities(&decision.entities),
            selected.join(","),
            asset_versions.join(","),
            PROMPT_VERSION,
        );
        cache_key(Namespace::StageC, &canonical)
    }

    pub async fn plan(
        &self,
        text: &str,
        decision: &Decision,
        selection: &ToolSelection,
        catalog: &ToolCatalog,
        asset_digest: &str,
        asset_versions: &[String],
        deadline: Duration,
        cancel: &CancelToken,
    ) -> Result<PlanOutcome> {
        let key = Self::plan_key(decision, selection, catalog, asset_versions);

        if let Some(value) = self.cache.get(Namespace::StageC, &key).await {
            if let Ok(plan) = serde_json::from_value::<Plan>(value) {
                return Ok(PlanOutcome {
                    plan,
                    cache_hit: true,
                    usage: TokenUsage::default(),
                });
            }
        }
        cancel.ensure_active()?;

        let messages = PromptManager::plan(text, decision, selection, asset_digest);
        let call = ChatCall::new(Stage::Plan, messages, MAX_TOKENS_PLAN).json();

        let started = Instant::now();
        let first = self.llm.chat(&call, deadline, cancel).await?;
        let mut usage = first.usage;

        let plan = match parse_plan(&first.text) {
            Ok(plan) => plan,
            Err(reason) => {
                tracing::warn!(%reason, "plan failed to parse, issuing corrective retry");
                let mut retry = call.clone();
                retry.messages.push(ChatMessage::assistant(first.text));
                retry.messages.push(ChatMessage::user(format!(
                    "Your previous response was not a valid plan JSON object ({reason}). \
                     Respond again with ONLY the corrected JSON object."
                )));
                let remaining = deadline
                    .checked_sub(started.elapsed())
                    .ok_or_else(|| Stage::Plan.timeout())?;
                let second = self.llm.chat(&retry, remaining, cancel).await?;
                usage.add(second.usage);
                parse_plan(&second.text).map_err(|reason| {
                    Error::LlmProtocol(format!(
                        "plan failed schema validation after corrective retry: {reason}"
                    ))
                })?
            }
        };

        validate_plan(&plan, selection, catalog, decision)?;

        cancel.ensure_active()?;
        if let Ok(value) = serde_json::to_value(&plan) {
            self.cache.set(Namespace::StageC, &key, &value).await;
        }

        Ok(PlanOutcome {
            plan,
            cache_hit: false,
            usage,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_plan(text: &str) -> std::result::Result<Plan, String> {
    let trimmed = strip_fences(text.trim());
    let plan: Plan = serde_json::from_str(trimmed).map_err(|e| e.to_string())?;
    if plan.steps.is_empty() {
        return Err("plan has no steps".into());
    }
    Ok(plan)
}

fn strip_fences(text: &str) -> &str {
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run the mandatory validation rules in order; the first failing rule is
/// reported. Rules:
///
/// 1. step ids unique
/// 2. depends_on references resolve
/// 3. depends_on forms a DAG (cycles report the participating step ids)
/// 4. every step tool resolves to a selected tool or built-in
/// 5. destructive steps carry a rollback entry
/// 6. production steps at high risk are covered by a `before` gate
pub fn validate_plan(
    plan: &Plan,
    selection: &ToolSelection,
    catalog: &ToolCatalog,
    decision: &Decision,
) -> Result<()> {
    let invalid = |rule: String| Error::PlanInvalid { rule };

    // 1. Unique step ids.
    let mut seen = std::collections::HashSet::new();
    for step in &plan.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(invalid(format!("duplicate step id \"{}\"", step.id)));
        }
    }

    // 2. Dependency references resolve.
    for step in &plan.steps {
        for dep in &step.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(invalid(format!(
                    "step \"{}\" depends on unknown step \"{dep}\"",
                    step.id
                )));
            }
        }
    }

    // 3. Acyclicity (Kahn's algorithm); leftovers are the cycle.
    if let Some(cycle) = find_cycle(plan) {
        return Err(invalid(format!(
            "dependency cycle involving steps [{}]",
            cycle.join(", ")
        )));
    }

    // 4. Tool resolution: selected tools and built-ins only.
    for step in &plan.steps {
        if !ToolCatalog::is_builtin(&step.tool) && !selection.contains(&step.tool) {
            return Err(invalid(format!(
                "step \"{}\" references tool \"{}\" outside the selection",
                step.id, step.tool
            )));
        }
    }

    // 5. Rollback coverage for destructive steps.
    for step in &plan.steps {
        let destructive = catalog.get(&step.tool).is_some_and(|t| t.destructive);
        if destructive
            && step.failure_handling != FailureHandling::Continue
            && plan.rollback_for(&step.id).is_none()
        {
            return Err(invalid(format!(
                "destructive step \"{}\" has no rollback_plan entry",
                step.id
            )));
        }
    }

    // 6. Approval-gate coverage for production mutation at high risk.
    if decision.risk >= RiskLevel::High && decision.targets_production() {
        for step in &plan.steps {
            let read_only = ToolCatalog::is_builtin(&step.tool)
                || catalog.get(&step.tool).is_some_and(|t| t.read_only);
            if !read_only && !plan.has_before_gate_for(&step.id) {
                return Err(invalid(format!(
                    "production step \"{}\" at {} risk lacks a before approval gate",
                    step.id,
                    decision.risk.as_str()
                )));
            }
        }
    }

    Ok(())
}

/// Kahn's algorithm over `depends_on`; returns the step ids stuck in a
/// cycle, or `None` when the graph is a DAG.
fn find_cycle(plan: &Plan) -> Option<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in &plan.steps {
        in_degree.entry(step.id.as_str()).or_insert(0);
        for dep in &step.depends_on {
            *in_degree.entry(step.id.as_str()).or_insert(0) += 1;
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(step.id.as_str());
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0;

    while let Some(id) = ready.pop() {
        visited += 1;
        if let Some(children) = dependents.get(id) {
            for child in children {
                let degree = in_degree.get_mut(child).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ready.push(child);
                }
            }
        }
    }

    if visited == plan.steps.len() {
        None
    } else {
        let mut stuck: Vec<String> = in_degree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        stuck.sort();
        Some(stuck)
    }
}
