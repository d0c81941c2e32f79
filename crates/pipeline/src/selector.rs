//! Stage B: deterministic tool selection.
//!
//! Scores every catalog tool against the Decision on three weighted
//! signals, applies the least-privilege and production-safety principles,
//! and emits an ordered [`ToolSelection`]. No LLM cost; the stage runs in
//! microseconds and is recomputed per request.

use oc_domain::artifact::{Decision, RiskLevel, SelectedTool, ToolSelection};
use oc_domain::tool::{ToolCatalog, ToolSpec};

/// Minimum score for outright selection.
const SELECT_THRESHOLD: f64 = 0.6;
/// Scores in `[CLARIFY_THRESHOLD, SELECT_THRESHOLD)` become clarification
/// candidates.
const CLARIFY_THRESHOLD: f64 = 0.4;
/// At most this many clarification candidates are surfaced.
const MAX_CLARIFICATION_CANDIDATES: usize = 3;

/// Relevance score for one tool against a decision. Weights: category
/// match 0.5, required-entity coverage 0.3, platform/environment
/// compatibility 0.2.
pub fn score_tool(tool: &ToolSpec, decision: &Decision) -> f64 {
    let category = if tool.category == decision.intent.category {
        1.0
    } else {
        0.0
    };

    let coverage = if tool.required_entity_types.is_empty() {
        1.0
    } else {
        let present = tool
            .required_entity_types
            .iter()
            .filter(|t| !decision.entities_of_type(t).is_empty())
            .count();
        present as f64 / tool.required_entity_types.len() as f64
    };

    let mut compat = 1.0;
    for entity in &decision.entities {
        let value = entity
            .normalized_value
            .as_deref()
            .unwrap_or(&entity.value);
        let ok = match entity.entity_type.as_str() {
            "platform" => tool.supports_platform(value),
            "environment" => tool.supports_environment(value),
            _ => continue,
        };
        if !ok {
            compat = 0.0;
        }
    }

    0.5 * category + 0.3 * coverage + 0.2 * compat
}

/// Ordering rank for tie-breaking: lower risk first.
fn risk_rank(tool: &ToolSpec) -> u8 {
    if tool.high_risk {
        3
    } else if tool.destructive {
        2
    } else if tool.read_only {
        0
    } else {
        1
    }
}

/// Run the selection over a catalog snapshot.
pub fn select(catalog: &ToolCatalog, decision: &Decision) -> ToolSelection {
    let production = decision.targets_production();
    let mutating_intent = decision.risk > RiskLevel::Low;

    let mut scored: Vec<(&ToolSpec, f64)> = Vec::new();
    let mut near_miss: Vec<(&ToolSpec, f64)> = Vec::new();

    for tool in &catalog.tools {
        // Production targets demand a declared production-safe tool; a
        // read-only tool is inherently safe to point at production.
        if production && !tool.production_safe && !tool.read_only {
            continue;
        }
        let score = score_tool(tool, decision);
        if score >= SELECT_THRESHOLD {
            scored.push((tool, score));
        } else if score >= CLARIFY_THRESHOLD {
            near_miss.push((tool, score));
        }
    }

    // Least privilege: when the intent itself is read-only and at least one
    // read-only tool qualifies, mutating tools are not offered at all.
    if !mutating_intent && scored.iter().any(|(t, _)| t.read_only) {
        scored.retain(|(t, _)| t.read_only);
    }

    // Deterministic order: risk asc, expected duration asc, name asc.
    scored.sort_by(|&(a, sa), &(b, sb)| {
        risk_rank(a)
            .cmp(&risk_rank(b))
            .then(a.expected_duration_s.cmp(&b.expected_duration_s))
            .then(a.name.cmp(&b.name))
            .then(sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal))
    });

    if scored.is_empty() {
        if near_miss.is_empty() {
            return ToolSelection {
                unmet_capabilities: vec![format!(
                    "{}/{}",
                    decision.intent.category, decision.intent.action
                )],
                ..ToolSelection::default()
            };
        }
        near_miss.sort_by(|&(a, sa), &(b, sb)| {
            sb.partial_cmp(&sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.name.cmp(&b.name))
        });
        return ToolSelection {
            clarification_candidates: near_miss
                .iter()
                .take(MAX_CLARIFICATION_CANDIDATES)
                .map(|(t, _)| t.name.clone())
                .collect(),
            ..ToolSelection::default()
        };
    }

    // Discovery first: mutating tools depend on every selected read-only
    // tool, so any topological order reads before it writes.
    let read_only_names: Vec<String> = scored
        .iter()
        .filter(|(t, _)| t.read_only)
        .map(|(t, _)| t.name.clone())
        .collect();

    let approval_required = scored.iter().any(|(t, _)| t.high_risk)
        || (production && scored.iter().any(|(t, _)| !t.read_only));

    let selected = scored
        .iter()
        .enumerate()
        .map(|(i, (tool, score))| SelectedTool {
            name: tool.name.clone(),
            justification: format!(
                "category {} matches intent (score {score:.2})",
                tool.category
            ),
            inputs_needed: tool
                .required_entity_types
                .iter()
                .map(|t| {
                    if decision.entities_of_type(t).is_empty() {
                        format!("to_be_elicited:{t}")
                    } else {
                        t.clone()
                    }
                })
                .collect(),
            execution_order: (i + 1) as u32,
            depends_on: if tool.read_only {
                Vec::new()
            } else {
                read_only_names.clone()
            },
        })
        .collect();

    ToolSelection {
        selected,
        unmet_capabilities: Vec::new(),
        clarification_candidates: Vec::new(),
        approval_required,
    }
}
