//! The orchestrator: owns the request lifecycle, drives stages A through E
//! under per-stage deadlines, applies caching at stage boundaries, and maps
//! everything to the typed error surface.
//!
//! Request flow: `classify → select → plan → (awaiting_approval?) →
//! execute → answer`. Stage budgets shrink proportionally when their sum
//! exceeds the request deadline. Upstream read failures during enrichment
//! degrade confidence and annotate the response; they never fail the
//! request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use oc_cache::keys::{cache_key, Namespace};
use oc_cache::CacheManager;
use oc_domain::artifact::{
    AssetContext, CacheHits, Decision, PipelineRequest, PipelineResponse, Plan, StageTimings,
    TokenUsage, ToolResult,
};
use oc_domain::cancel::CancelToken;
use oc_domain::config::Config;
use oc_domain::error::{Error, Result, Stage};
use oc_domain::tool::ToolCatalog;
use oc_domain::trace::PipelineEvent;
use oc_llm::LlmService;
use oc_upstream::AutomationClient;

use crate::answerer::Answerer;
use crate::cancel::CancelMap;
use crate::catalog::CatalogRegistry;
use crate::classifier::Classifier;
use crate::context::AssetContextProvider;
use crate::executor::ExecutorBridge;
use crate::pending::PendingStore;
use crate::planner::Planner;
use crate::selector;

/// Entity types the orchestrator tries to hydrate before planning.
const HYDRATABLE_TYPES: &[&str] = &["hostname", "database"];
/// Cap on pre-plan hydrations per request.
const MAX_HYDRATIONS: usize = 3;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage budgets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StageBudgets {
    pub classify: Duration,
    pub select: Duration,
    pub plan: Duration,
    pub answer: Duration,
}

/// Compute per-stage budgets. When the configured deadlines sum past the
/// request deadline, every stage shrinks proportionally so the sum fits.
pub(crate) fn stage_budgets(cfg: &oc_domain::config::StagesConfig, total_ms: u64) -> StageBudgets {
    let configured = [
        cfg.classify_deadline_ms,
        cfg.select_deadline_ms,
        cfg.plan_deadline_ms,
        cfg.answer_deadline_ms,
    ];
    let sum: u64 = configured.iter().sum();
    let scale = |ms: u64| {
        let scaled = if sum > total_ms && sum > 0 {
            (ms as u128 * total_ms as u128 / sum as u128) as u64
        } else {
            ms
        };
        Duration::from_millis(scaled.max(1))
    };
    StageBudgets {
        classify: scale(configured[0]),
        select: scale(configured[1]),
        plan: scale(configured[2]),
        answer: scale(configured[3]),
    }
}

/// Emit the stage telemetry event and return the elapsed milliseconds.
fn stage_done(request_id: &str, stage: Stage, started: Instant, cache_hit: bool) -> u64 {
    let duration_ms = started.elapsed().as_millis() as u64;
    PipelineEvent::StageCompleted {
        request_id: request_id.to_string(),
        stage: stage.as_str(),
        duration_ms,
        cache_hit,
    }
    .emit();
    duration_ms
}

fn remaining(total: Duration, started: Instant, stage: Stage) -> Result<Duration> {
    match total.checked_sub(started.elapsed()) {
        Some(left) if !left.is_zero() => Ok(left),
        _ => Err(stage.timeout()),
    }
}

/// Whether any plan step reaches a tool that can mutate state. Fully
/// read-only plans skip Stage E entirely.
fn plan_mutates(catalog: &ToolCatalog, plan: &Plan) -> bool {
    plan.steps.iter().any(|s| {
        !ToolCatalog::is_builtin(&s.tool) && catalog.get(&s.tool).map_or(true, |t| !t.read_only)
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    stages_cfg: oc_domain::config::StagesConfig,
    classifier: Classifier,
    planner: Planner,
    answerer: Answerer,
    executor: ExecutorBridge,
    pending: PendingStore,
    assets: Arc<AssetContextProvider>,
    catalog: Arc<CatalogRegistry>,
    cache: Arc<CacheManager>,
    cancels: CancelMap,
}

impl Orchestrator {
    pub fn new(
        cfg: &Config,
        llm: Arc<LlmService>,
        cache: Arc<CacheManager>,
        assets: Arc<AssetContextProvider>,
        automation: AutomationClient,
        catalog: Arc<CatalogRegistry>,
    ) -> Self {
        Self {
            stages_cfg: cfg.stages.clone(),
            classifier: Classifier::new(llm.clone(), cache.clone(), cfg.risk.clone()),
            planner: Planner::new(llm.clone(), cache.clone()),
            answerer: Answerer::new(llm, cfg.grounding.strict),
            executor: ExecutorBridge::new(automation, cfg.stages.execute_heartbeat_ms),
            pending: PendingStore::new(cache.clone(), cfg.approvals.window_s),
            assets,
            catalog,
            cache,
            cancels: CancelMap::new(),
        }
    }

    /// Cooperatively cancel an in-flight request.
    pub fn cancel(&self, request_id: &str) -> bool {
        self.cancels.cancel(request_id)
    }

    /// Drive one request through the pipeline.
    pub async fn execute(&self, request: PipelineRequest) -> Result<PipelineResponse> {
        request.validate()?;
        let request_id = request.request_id.to_string();
        let cancel = self.cancels.register(&request_id);

        let result = self.run(&request, &cancel).await;
        self.cancels.remove(&request_id);

        let outcome = match &result {
            Ok(_) => "done",
            Err(Error::ApprovalRequired { .. }) => "awaiting_approval",
            Err(Error::Cancelled) => "cancelled",
            Err(_) => "failed",
        };
        PipelineEvent::RequestCompleted {
            request_id,
            total_ms: result
                .as_ref()
                .map(|r| r.timings.total_ms)
                .unwrap_or_default(),
            outcome,
        }
        .emit();
        result
    }

    async fn run(
        &self,
        request: &PipelineRequest,
        cancel: &CancelToken,
    ) -> Result<PipelineResponse> {
        let started = Instant::now();
        let total = Duration::from_millis(request.deadline_ms);
        let budgets = stage_budgets(&self.stages_cfg, request.deadline_ms);
        let request_id = request.request_id.to_string();

        let mut timings = StageTimings::default();
        let mut usage = TokenUsage::default();
        let mut cache_hits = CacheHits::default();
        let mut data_gaps: Vec<String> = Vec::new();

        // ── Stage A: classify ─────────────────────────────────────
        let deadline = budgets.classify.min(remaining(total, started, Stage::Classify)?);
        let stage_started = Instant::now();
        let classified = self
            .classifier
            .classify(&request.text, deadline, cancel)
            .await?;
        timings.stage_a_ms = Some(stage_done(
            &request_id,
            Stage::Classify,
            stage_started,
            classified.cache_hit,
        ));
        usage.add(classified.usage);
        cache_hits.stage_a = classified.cache_hit;
        let mut decision = classified.decision;

        // ── Asset enrichment (recoverable) ────────────────────────
        let contexts = self.enrich(&mut decision, &mut data_gaps, cancel).await?;
        let asset_digest = enriched_digest(&contexts, &data_gaps);
        let asset_versions = AssetContextProvider::version_tokens(&contexts);

        // ── Stage B: select ───────────────────────────────────────
        let stage_started = Instant::now();
        let catalog = self.catalog.snapshot();
        let selection = selector::select(&catalog, &decision);
        timings.stage_b_ms = Some(stage_done(&request_id, Stage::Select, stage_started, false));

        // ── Stage C: plan ─────────────────────────────────────────
        let deadline = budgets.plan.min(remaining(total, started, Stage::Plan)?);
        let stage_started = Instant::now();
        let planned = self
            .planner
            .plan(
                &request.text,
                &decision,
                &selection,
                &catalog,
                &asset_digest,
                &asset_versions,
                deadline,
                cancel,
            )
            .await?;
        timings.stage_c_ms = Some(stage_done(
            &request_id,
            Stage::Plan,
            stage_started,
            planned.cache_hit,
        ));
        usage.add(planned.usage);
        cache_hits.stage_c = planned.cache_hit;
        let plan = planned.plan;

        // ── Approval gate: park and surface the resume token ──────
        if !plan.approval_gates.is_empty() {
            let token = self.pending.park(request, &decision, &selection, &plan).await?;
            PipelineEvent::AwaitingApproval {
                request_id: request_id.clone(),
                gate_count: plan.approval_gates.len(),
                window_s: self.pending.window_s(),
            }
            .emit();
            return Err(Error::ApprovalRequired {
                request_id,
                resume_token: Some(token),
            });
        }

        // ── Stage E: execute (mutating plans only) ────────────────
        let results = if plan_mutates(&catalog, &plan) {
            let stage_started = Instant::now();
            let executed = self
                .execute_stage(&request_id, &plan, &catalog, cancel, &mut data_gaps)
                .await?;
            timings.stage_e_ms = Some(stage_done(&request_id, Stage::Execute, stage_started, false));
            executed
        } else {
            Vec::new()
        };

        // ── Stage D: answer ───────────────────────────────────────
        // A cancellation that arrived during execution does not discard the
        // observations already received; the answer is produced on a fresh
        // token so the operator still learns what happened.
        let answer_cancel = if cancel.is_cancelled() && !results.is_empty() {
            CancelToken::new()
        } else {
            cancel.clone()
        };
        let deadline = budgets.answer.min(remaining(total, started, Stage::Answer)?);
        let stage_started = Instant::now();
        let answered = self
            .answerer
            .answer(
                &request.text,
                &decision,
                &plan,
                &results,
                &asset_digest,
                deadline,
                &answer_cancel,
            )
            .await?;
        timings.stage_d_ms = Some(stage_done(&request_id, Stage::Answer, stage_started, false));
        usage.add(answered.usage);

        timings.total_ms = started.elapsed().as_millis() as u64;
        Ok(PipelineResponse {
            request_id: request.request_id,
            text: answered.text,
            citations: answered.citations,
            confidence: decision.overall_confidence,
            cache_hits,
            timings,
            token_usage: usage,
            unverified_paragraphs: answered.unverified_paragraphs,
            data_gaps,
        })
    }

    /// Resume an awaiting-approval request with its token: verify, rebuild
    /// artifacts, and continue from execution.
    pub async fn resume(&self, request_id: &str, token: &str) -> Result<PipelineResponse> {
        let record = self.pending.take(request_id, token).await?;
        let cancel = self.cancels.register(request_id);
        let result = self.run_resumed(record, &cancel).await;
        self.cancels.remove(request_id);
        result
    }

    async fn run_resumed(
        &self,
        record: crate::pending::PendingRecord,
        cancel: &CancelToken,
    ) -> Result<PipelineResponse> {
        let started = Instant::now();
        let budgets = stage_budgets(&self.stages_cfg, record.request.deadline_ms);
        let request_id = record.request.request_id.to_string();
        let mut decision = record.decision;
        let mut timings = StageTimings::default();
        let mut usage = TokenUsage::default();
        let mut data_gaps = Vec::new();

        let contexts = self.enrich(&mut decision, &mut data_gaps, cancel).await?;
        let asset_digest = enriched_digest(&contexts, &data_gaps);
        let catalog = self.catalog.snapshot();

        let stage_started = Instant::now();
        let results = self
            .execute_stage(
                &request_id,
                &record.plan,
                &catalog,
                cancel,
                &mut data_gaps,
            )
            .await?;
        timings.stage_e_ms = Some(stage_done(&request_id, Stage::Execute, stage_started, false));

        let answer_cancel = if cancel.is_cancelled() && !results.is_empty() {
            CancelToken::new()
        } else {
            cancel.clone()
        };
        let stage_started = Instant::now();
        let answered = self
            .answerer
            .answer(
                &record.request.text,
                &decision,
                &record.plan,
                &results,
                &asset_digest,
                budgets.answer,
                &answer_cancel,
            )
            .await?;
        timings.stage_d_ms = Some(stage_done(&request_id, Stage::Answer, stage_started, false));
        usage.add(answered.usage);
        timings.total_ms = started.elapsed().as_millis() as u64;

        Ok(PipelineResponse {
            request_id: record.request.request_id,
            text: answered.text,
            citations: answered.citations,
            confidence: decision.overall_confidence,
            cache_hits: CacheHits::default(),
            timings,
            token_usage: usage,
            unverified_paragraphs: answered.unverified_paragraphs,
            data_gaps,
        })
    }

    async fn execute_stage(
        &self,
        request_id: &str,
        plan: &Plan,
        catalog: &ToolCatalog,
        cancel: &CancelToken,
        data_gaps: &mut Vec<String>,
    ) -> Result<Vec<ToolResult>> {
        match self.executor.execute_plan(request_id, plan, true, cancel).await {
            Ok(outcome) => {
                if let Some(step) = &outcome.aborted_step {
                    data_gaps.push(format!("execution aborted at step \"{step}\""));
                }
                // Read-only observations are the only cacheable results.
                for result in &outcome.results {
                    let read_only = catalog.get(&result.tool).is_some_and(|t| t.read_only);
                    if read_only && result.success && cancel.ensure_active().is_ok() {
                        let key = tool_result_key(&result.tool, &result.inputs_hash);
                        if let Ok(value) = serde_json::to_value(result) {
                            self.cache.set(Namespace::Tool, &key, &value).await;
                        }
                    }
                }
                Ok(outcome.results)
            }
            // Fatal to execution, not to the request: the response states
            // what would have happened, grounded in any prior read-only
            // observations still present in the tool-result cache.
            Err(Error::UpstreamUnavailable { service, message }) => {
                data_gaps.push(format!(
                    "execution not performed: {service} service unavailable ({message})"
                ));
                let cached = self.cached_read_only_results(plan, catalog).await;
                if !cached.is_empty() {
                    data_gaps.push(format!(
                        "{} earlier read-only observation(s) served from cache",
                        cached.len()
                    ));
                }
                Ok(cached)
            }
            Err(other) => Err(other),
        }
    }

    /// Cached results of the plan's read-only steps, keyed by tool and
    /// input fingerprint.
    async fn cached_read_only_results(
        &self,
        plan: &Plan,
        catalog: &ToolCatalog,
    ) -> Vec<ToolResult> {
        let mut results = Vec::new();
        for step in &plan.steps {
            if !catalog.get(&step.tool).is_some_and(|t| t.read_only) {
                continue;
            }
            let key = tool_result_key(&step.tool, &crate::executor::hash_inputs(&step.inputs));
            if let Some(value) = self.cache.get(Namespace::Tool, &key).await {
                if let Ok(result) = serde_json::from_value::<ToolResult>(value) {
                    results.push(result);
                }
            }
        }
        results
    }

    /// Hydrate asset context for the decision's identifier entities, or
    /// search by environment when no identifiers were extracted. Failures
    /// degrade confidence and record a gap; only cancellation propagates.
    async fn enrich(
        &self,
        decision: &mut Decision,
        data_gaps: &mut Vec<String>,
        cancel: &CancelToken,
    ) -> Result<Vec<AssetContext>> {
        let mut contexts = Vec::new();
        let mut failed = false;

        let ids: Vec<String> = decision
            .entities
            .iter()
            .filter(|e| HYDRATABLE_TYPES.contains(&e.entity_type.as_str()))
            .map(|e| e.value.clone())
            .take(MAX_HYDRATIONS)
            .collect();

        for id in &ids {
            match self.assets.hydrate(id, cancel).await {
                Ok(ctx) => contexts.push(ctx),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    tracing::warn!(asset = %id, error = %err, "asset hydration failed");
                    data_gaps.push(format!("asset data unavailable for {id}"));
                    failed = true;
                }
            }
        }

        if ids.is_empty() {
            if let Some(env) = decision
                .entities
                .iter()
                .find(|e| e.entity_type == "environment")
            {
                let filter = format!(
                    "environment={}",
                    env.normalized_value.as_deref().unwrap_or(&env.value)
                );
                match self.assets.find(&filter, cancel).await {
                    Ok(found) => contexts.extend(found.into_iter().take(MAX_HYDRATIONS)),
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(err) => {
                        tracing::warn!(%filter, error = %err, "asset search failed");
                        data_gaps.push(format!("asset data unavailable for {filter}"));
                        failed = true;
                    }
                }
            }
        }

        if failed {
            decision.overall_confidence = (decision.overall_confidence * 0.85).clamp(0.0, 1.0);
            decision
                .annotations
                .push("asset enrichment incomplete".into());
        }
        Ok(contexts)
    }
}

fn tool_result_key(tool: &str, inputs_hash: &str) -> String {
    cache_key(Namespace::Tool, &format!("{tool}:{inputs_hash}"))
}

fn enriched_digest(contexts: &[AssetContext], data_gaps: &[String]) -> String {
    let mut digest = AssetContextProvider::digest(contexts);
    if !data_gaps.is_empty() {
        digest.push_str("; data unavailable: ");
        digest.push_str(&data_gaps.join(", "));
    }
    digest
}
