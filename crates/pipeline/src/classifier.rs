//! Stage A: turn free text into a [`Decision`].
//!
//! Intent classification and entity extraction fan out as two concurrent
//! LLM calls; a deterministic rubric then scores confidence and risk, and a
//! conditional LLM assessment refines both when the rubric is unsure. The
//! whole stage is cached by canonicalized request text.

use std::sync::Arc;
use std::time::Duration;

use oc_cache::keys::{cache_key, canonicalize_text, Namespace};
use oc_cache::CacheManager;
use oc_domain::artifact::{Decision, DecisionSource, Entity, Intent, RiskLevel, TokenUsage};
use oc_domain::cancel::CancelToken;
use oc_domain::config::RiskConfig;
use oc_domain::error::{Error, Result, Stage};
use oc_llm::prompts::{PromptManager, MAX_TOKENS_ENTITIES, MAX_TOKENS_INTENT, MAX_TOKENS_RISK};
use oc_llm::{ChatCall, LlmService};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rule rubric
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const DESTRUCTIVE_VERBS: &[&str] = &[
    "delete", "drop", "destroy", "purge", "wipe", "erase", "truncate",
];

const MUTATING_VERBS: &[&str] = &["modify", "change", "update", "alter", "grant", "revoke"];

const SENSITIVE_NOUNS: &[&str] = &[
    "production",
    "prod",
    "security",
    "database",
    "databases",
    "db",
    "credential",
    "credentials",
    "certificate",
    "firewall",
];

const MEDIUM_VERBS: &[&str] = &[
    "restart", "reload", "configure", "config", "install", "upgrade", "deploy", "patch",
];

const READ_VERBS: &[&str] = &[
    "show", "list", "get", "status", "check", "view", "display", "info", "describe",
];

/// Entity types that count as specific identifiers for the confidence
/// rubric.
const IDENTIFIER_TYPES: &[&str] = &["hostname", "service", "database", "ip_address"];

/// Deterministic risk assessment over the raw text.
///
/// Destructive verbs dominate; mutating verbs against production, security,
/// or database targets are high; operational verbs (restart/config/install)
/// and anything unrecognized stay medium so the LLM assessment weighs in;
/// purely read-only phrasing is low.
pub fn rule_risk(text: &str) -> RiskLevel {
    let canonical = canonicalize_text(text);
    let tokens: Vec<&str> = canonical.split(' ').collect();
    let has = |list: &[&str]| tokens.iter().any(|t| list.contains(t));
    // Sensitive nouns also show up embedded in identifiers (prod-db-01).
    let has_sensitive_noun = has(SENSITIVE_NOUNS)
        || tokens
            .iter()
            .any(|t| t.contains("prod") || t.split('-').any(|part| part == "db"));

    if has(DESTRUCTIVE_VERBS) {
        RiskLevel::Critical
    } else if has(MUTATING_VERBS) && has_sensitive_noun {
        RiskLevel::High
    } else if has(MUTATING_VERBS) || has(MEDIUM_VERBS) {
        RiskLevel::Medium
    } else if has(READ_VERBS) {
        RiskLevel::Low
    } else {
        RiskLevel::Medium
    }
}

/// Weighted confidence: reported intent confidence (0.5), entity extraction
/// coverage (0.3), presence of specific identifiers (0.2).
pub fn rule_confidence(intent_confidence: f64, entities: &[Entity]) -> f64 {
    let coverage = if entities.is_empty() {
        0.0
    } else {
        entities.iter().map(|e| e.confidence).sum::<f64>() / entities.len() as f64
    };
    let identifiers = if entities
        .iter()
        .any(|e| IDENTIFIER_TYPES.contains(&e.entity_type.as_str()))
    {
        1.0
    } else {
        0.0
    };
    (0.5 * intent_confidence + 0.3 * coverage + 0.2 * identifiers).clamp(0.0, 1.0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classifier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct ClassifyOutcome {
    pub decision: Decision,
    pub cache_hit: bool,
    pub usage: TokenUsage,
}

pub struct Classifier {
    llm: Arc<LlmService>,
    cache: Arc<CacheManager>,
    risk_cfg: RiskConfig,
}

impl Classifier {
    pub fn new(llm: Arc<LlmService>, cache: Arc<CacheManager>, risk_cfg: RiskConfig) -> Self {
        Self {
            llm,
            cache,
            risk_cfg,
        }
    }

    pub async fn classify(
        &self,
        text: &str,
        deadline: Duration,
        cancel: &CancelToken,
    ) -> Result<ClassifyOutcome> {
        let canonical = canonicalize_text(text);
        let key = cache_key(Namespace::StageA, &canonical);

        if let Some(value) = self.cache.get(Namespace::StageA, &key).await {
            if let Ok(mut decision) = serde_json::from_value::<Decision>(value) {
                decision.source = DecisionSource::Cache;
                return Ok(ClassifyOutcome {
                    decision,
                    cache_hit: true,
                    usage: TokenUsage::default(),
                });
            }
        }
        cancel.ensure_active()?;

        // Intent and entity extraction fan out concurrently; both are
        // LLM-mandatory, so either failure fails the stage.
        let intent_call = ChatCall::new(
            Stage::Classify,
            PromptManager::intent(text),
            MAX_TOKENS_INTENT,
        )
        .json();
        let entity_call = ChatCall::new(
            Stage::Classify,
            PromptManager::entities(text),
            MAX_TOKENS_ENTITIES,
        )
        .json();

        let (intent_res, entity_res) = tokio::join!(
            self.llm
                .chat_json(&intent_call, &["category", "action"], deadline, cancel),
            self.llm
                .chat_json(&entity_call, &["entities"], deadline, cancel),
        );
        let (intent_value, intent_usage) = intent_res?;
        let (entity_value, entity_usage) = entity_res?;
        let mut usage = intent_usage;
        usage.add(entity_usage);

        let intent = parse_intent(&intent_value);
        let intent_confidence = intent_value
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        let entities = parse_entities(&entity_value);

        let confidence_rule = rule_confidence(intent_confidence, &entities);
        let risk_rule = rule_risk(text);

        let mut decision = Decision::new(
            intent,
            entities,
            confidence_rule,
            risk_rule,
            DecisionSource::Rule,
        );

        if confidence_rule < 0.6 || risk_rule == RiskLevel::Medium {
            match self.assess_with_llm(text, &decision, deadline, cancel).await {
                Ok((confidence_llm, risk_llm, assess_usage)) => {
                    usage.add(assess_usage);
                    let blended = 0.4 * confidence_rule + 0.6 * confidence_llm;
                    decision = Decision::new(
                        decision.intent,
                        decision.entities,
                        blended,
                        risk_llm,
                        DecisionSource::Hybrid,
                    );
                }
                Err(Error::LlmUnavailable(msg)) => {
                    // Narrow, configuration-gated escape hatch; everything
                    // else propagates the outage.
                    let rule_only_ok = self.risk_cfg.allow_rule_only_on_llm_outage
                        && confidence_rule >= 0.8
                        && risk_rule != RiskLevel::Medium;
                    if !rule_only_ok {
                        return Err(Error::LlmUnavailable(msg));
                    }
                    decision
                        .annotations
                        .push("risk assessed by rule only (LLM unavailable)".into());
                }
                Err(other) => return Err(other),
            }
        }

        cancel.ensure_active()?;
        if let Ok(value) = serde_json::to_value(&decision) {
            self.cache.set(Namespace::StageA, &key, &value).await;
        }

        Ok(ClassifyOutcome {
            decision,
            cache_hit: false,
            usage,
        })
    }

    async fn assess_with_llm(
        &self,
        text: &str,
        decision: &Decision,
        deadline: Duration,
        cancel: &CancelToken,
    ) -> Result<(f64, RiskLevel, TokenUsage)> {
        let call = ChatCall::new(
            Stage::Classify,
            PromptManager::risk(text, decision),
            MAX_TOKENS_RISK,
        )
        .json();
        let (value, usage) = self
            .llm
            .chat_json(&call, &["confidence", "risk"], deadline, cancel)
            .await?;

        let confidence = value
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        let risk = value
            .get("risk")
            .and_then(|v| v.as_str())
            .and_then(RiskLevel::parse)
            .ok_or_else(|| {
                Error::LlmProtocol("risk assessment returned an unknown risk level".into())
            })?;
        Ok((confidence, risk, usage))
    }
}

// ── LLM output parsing ─────────────────────────────────────────────

fn parse_intent(value: &Value) -> Intent {
    Intent {
        category: value
            .get("category")
            .and_then(|v| v.as_str())
            .unwrap_or("other")
            .to_string(),
        action: value
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or("other")
            .to_string(),
    }
}

fn parse_entities(value: &Value) -> Vec<Entity> {
    value
        .get("entities")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|e| {
                    Some(Entity {
                        entity_type: e.get("type")?.as_str()?.to_string(),
                        value: e.get("value")?.as_str()?.to_string(),
                        confidence: e
                            .get("confidence")
                            .and_then(|v| v.as_f64())
                            .unwrap_or(0.5)
                            .clamp(0.0, 1.0),
                        normalized_value: e
                            .get("normalized_value")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
