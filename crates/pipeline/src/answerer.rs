//! Stage D: grounded answer synthesis.
//!
//! One LLM call produces the operator-facing text; post-processing scans
//! citation tokens (`[step:..]`, `[asset:..]`, `[tool:..]`) into
//! [`Citation`]s and cross-checks every cited step against the observed
//! results: a paragraph citing a step with no [`ToolResult`] is flagged
//! unverified, whatever the prompt told the model about tense. Under
//! strict grounding, factual paragraphs without any citation are flagged
//! the same way — never silently dropped.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use oc_domain::artifact::{Citation, Decision, Plan, TokenUsage, ToolResult};
use oc_domain::cancel::CancelToken;
use oc_domain::error::{Error, Result, Stage};
use oc_llm::prompts::{PromptManager, ANSWER_SAFETY_MARGIN, MAX_TOKENS_ANSWER};
use oc_llm::{ChatCall, LlmService};

#[derive(Debug)]
pub struct AnswerOutcome {
    pub text: String,
    pub citations: Vec<Citation>,
    pub unverified_paragraphs: Vec<usize>,
    pub usage: TokenUsage,
}

pub struct Answerer {
    llm: Arc<LlmService>,
    strict_grounding: bool,
}

impl Answerer {
    pub fn new(llm: Arc<LlmService>, strict_grounding: bool) -> Self {
        Self {
            llm,
            strict_grounding,
        }
    }

    pub async fn answer(
        &self,
        text: &str,
        decision: &Decision,
        plan: &Plan,
        results: &[ToolResult],
        asset_digest: &str,
        deadline: Duration,
        cancel: &CancelToken,
    ) -> Result<AnswerOutcome> {
        let messages = PromptManager::answer(text, decision, plan, results, asset_digest);
        let mut call = ChatCall::new(Stage::Answer, messages, MAX_TOKENS_ANSWER);

        // Clamp the completion budget to what actually fits the window.
        let prompt_tokens = LlmService::estimate_prompt_tokens(&call);
        call.max_tokens = self
            .llm
            .clamp_max_tokens(prompt_tokens, MAX_TOKENS_ANSWER, ANSWER_SAFETY_MARGIN)
            .ok_or(Error::ContextOverflow {
                prompt_tokens,
                max_tokens: MAX_TOKENS_ANSWER,
                context_window: self.llm.context_window(),
            })?;

        let out = self.llm.chat(&call, deadline, cancel).await?;

        let citations = extract_citations(&out.text);

        // Deterministic no-fabrication check: a step without an observed
        // result has no outcome to report, so any paragraph citing it is
        // unverified regardless of the grounding mode.
        let executed: HashSet<&str> = results.iter().map(|r| r.step_id.as_str()).collect();
        let mut flagged: BTreeSet<usize> =
            unexecuted_step_paragraphs(&out.text, &executed).into_iter().collect();
        if self.strict_grounding {
            flagged.extend(uncited_paragraphs(&out.text));
        }

        Ok(AnswerOutcome {
            text: out.text,
            citations,
            unverified_paragraphs: flagged.into_iter().collect(),
            usage: out.usage,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Citation post-processing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn citation_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"\[(step|asset|tool):([A-Za-z0-9_.\-]+)\]").expect("static regex")
    })
}

/// Scan citation tokens in document order, deduplicated.
pub fn extract_citations(text: &str) -> Vec<Citation> {
    let mut citations = Vec::new();
    for captures in citation_regex().captures_iter(text) {
        let id = captures[2].to_string();
        let citation = match &captures[1] {
            "step" => Citation::Step { step_id: id },
            "asset" => Citation::Asset { asset_id: id },
            _ => Citation::ToolCall { tool_call_id: id },
        };
        if !citations.contains(&citation) {
            citations.push(citation);
        }
    }
    citations
}

/// Zero-based indexes of non-empty paragraphs that carry no citation token.
pub fn uncited_paragraphs(text: &str) -> Vec<usize> {
    text.split("\n\n")
        .enumerate()
        .filter(|(_, para)| !para.trim().is_empty() && !citation_regex().is_match(para))
        .map(|(i, _)| i)
        .collect()
}

/// Zero-based indexes of paragraphs citing a step id with no observed
/// result.
pub fn unexecuted_step_paragraphs(text: &str, executed: &HashSet<&str>) -> Vec<usize> {
    text.split("\n\n")
        .enumerate()
        .filter(|(_, para)| {
            citation_regex()
                .captures_iter(para)
                .any(|c| &c[1] == "step" && !executed.contains(&c[2]))
        })
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citations_extracted_in_order_and_deduped() {
        let text = "Found 3 servers [asset:srv-001]. Restart planned [step:s2]. \
                    Also [asset:srv-001] again and [tool:tc-9].";
        let citations = extract_citations(text);
        assert_eq!(
            citations,
            vec![
                Citation::Asset {
                    asset_id: "srv-001".into()
                },
                Citation::Step {
                    step_id: "s2".into()
                },
                Citation::ToolCall {
                    tool_call_id: "tc-9".into()
                },
            ]
        );
    }

    #[test]
    fn uncited_paragraphs_are_flagged_by_index() {
        let text = "All production servers are healthy [asset:srv-001].\n\n\
                    The service will be restarted next [step:s1].\n\n\
                    Everything else looks fine too.";
        assert_eq!(uncited_paragraphs(text), vec![2]);
    }

    #[test]
    fn empty_paragraphs_are_not_flagged() {
        let text = "claim [step:s1]\n\n\n\nanother [asset:a1]";
        assert!(uncited_paragraphs(text).is_empty());
    }

    #[test]
    fn malformed_tokens_are_ignored() {
        let citations = extract_citations("[step:] [bogus:x] [step:s1]");
        assert_eq!(
            citations,
            vec![Citation::Step {
                step_id: "s1".into()
            }]
        );
    }

    #[test]
    fn paragraphs_citing_unexecuted_steps_are_flagged() {
        let executed: HashSet<&str> = ["s1"].into_iter().collect();
        let text = "The query returned 3 servers [step:s1].\n\n\
                    The service was restarted successfully [step:s2].\n\n\
                    Inventory context [asset:srv-001].";
        assert_eq!(unexecuted_step_paragraphs(text, &executed), vec![1]);
    }

    #[test]
    fn executed_step_citations_pass_the_fabrication_check() {
        let executed: HashSet<&str> = ["s1", "s2"].into_iter().collect();
        let text = "Done [step:s1] and [step:s2].";
        assert!(unexecuted_step_paragraphs(text, &executed).is_empty());
    }

    #[test]
    fn asset_and_tool_citations_never_need_execution() {
        let executed: HashSet<&str> = HashSet::new();
        let text = "Found it [asset:srv-001] via [tool:tc-9].";
        assert!(unexecuted_step_paragraphs(text, &executed).is_empty());
    }
}
