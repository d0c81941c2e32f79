use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub stages: StagesConfig,
    #[serde(default)]
    pub grounding: GroundingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub approvals: ApprovalsConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Env var holding the bearer token for the cache API.
    /// Unset or empty token = dev mode (no auth enforced).
    #[serde(default = "d_token_env")]
    pub api_token_env: String,
    /// Origins allowed for CORS. Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8099,
            host: "127.0.0.1".into(),
            api_token_env: d_token_env(),
            allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL, e.g. `http://vllm:8000/v1`.
    #[serde(default = "d_llm_url")]
    pub base_url: String,
    #[serde(default = "d_model")]
    pub model: String,
    /// Env var holding the API key. Optional for unauthenticated backends.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "d_60")]
    pub timeout_s: u64,
    #[serde(default = "d_16")]
    pub max_concurrency: usize,
    /// Model context window in tokens. Required — there is no safe default
    /// across backends; `validate()` rejects 0.
    #[serde(default)]
    pub context_window: u32,
    /// How long an admission waits for a semaphore slot before the request
    /// is rejected as overloaded.
    #[serde(default = "d_500")]
    pub queue_wait_ms: u64,
    #[serde(default = "d_3")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_llm_url(),
            model: d_model(),
            api_key_env: None,
            timeout_s: 60,
            max_concurrency: 16,
            context_window: 0,
            queue_wait_ms: 500,
            max_retries: 3,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Redis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "d_redis_url")]
    pub url: String,
    #[serde(default = "d_true")]
    pub enabled: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: d_redis_url(),
            enabled: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache TTLs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_3600")]
    pub ttl_stage_a_s: u64,
    #[serde(default = "d_7200")]
    pub ttl_stage_b_s: u64,
    #[serde(default = "d_1800")]
    pub ttl_stage_c_s: u64,
    #[serde(default = "d_60")]
    pub ttl_asset_l1_s: u64,
    #[serde(default = "d_300")]
    pub ttl_asset_l2_s: u64,
    #[serde(default = "d_600")]
    pub ttl_tool_s: u64,
    /// Soft entry cap per in-process namespace before LRU eviction runs.
    #[serde(default = "d_4096")]
    pub l1_max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_stage_a_s: 3600,
            ttl_stage_b_s: 7200,
            ttl_stage_c_s: 1800,
            ttl_asset_l1_s: 60,
            ttl_asset_l2_s: 300,
            ttl_tool_s: 600,
            l1_max_entries: 4096,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage deadlines
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    #[serde(default = "d_3000")]
    pub classify_deadline_ms: u64,
    #[serde(default = "d_500")]
    pub select_deadline_ms: u64,
    #[serde(default = "d_15000")]
    pub plan_deadline_ms: u64,
    #[serde(default = "d_5000")]
    pub answer_deadline_ms: u64,
    /// Heartbeat interval while polling Stage E execution status.
    #[serde(default = "d_1000")]
    pub execute_heartbeat_ms: u64,
    #[serde(default = "d_30000")]
    pub request_default_deadline_ms: u64,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            classify_deadline_ms: 3000,
            select_deadline_ms: 500,
            plan_deadline_ms: 15_000,
            answer_deadline_ms: 5000,
            execute_heartbeat_ms: 1000,
            request_default_deadline_ms: 30_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Grounding / risk / approvals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingConfig {
    /// When true, uncited factual paragraphs are flagged unverified.
    #[serde(default = "d_true")]
    pub strict: bool,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self { strict: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RiskConfig {
    /// Permit a rule-only risk assessment when the conditional LLM call is
    /// unreachable AND rule confidence >= 0.8 AND rule risk != medium.
    /// Off by default.
    #[serde(default)]
    pub allow_rule_only_on_llm_outage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalsConfig {
    /// How long awaiting-approval artifacts stay resumable.
    #[serde(default = "d_3600")]
    pub window_s: u64,
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self { window_s: 3600 }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream services
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "d_asset_url")]
    pub asset_base_url: String,
    #[serde(default = "d_automation_url")]
    pub automation_base_url: String,
    #[serde(default = "d_8000")]
    pub timeout_ms: u64,
    /// Interval between Stage E status polls.
    #[serde(default = "d_1000")]
    pub poll_interval_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            asset_base_url: d_asset_url(),
            automation_base_url: d_automation_url(),
            timeout_ms: 8000,
            poll_interval_ms: 1000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "d_catalog_path")]
    pub path: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: d_catalog_path(),
        }
    }
}

// ── serde default helpers ──────────────────────────────────────────

fn d_port() -> u16 {
    8099
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_token_env() -> String {
    "OC_API_TOKEN".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".into(), "http://127.0.0.1:3000".into()]
}
fn d_llm_url() -> String {
    "http://127.0.0.1:8000/v1".into()
}
fn d_model() -> String {
    "default".into()
}
fn d_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}
fn d_asset_url() -> String {
    "http://127.0.0.1:8010".into()
}
fn d_automation_url() -> String {
    "http://127.0.0.1:8020".into()
}
fn d_catalog_path() -> String {
    "./config/tools.toml".into()
}
fn d_true() -> bool {
    true
}
fn d_3() -> u32 {
    3
}
fn d_16() -> usize {
    16
}
fn d_60() -> u64 {
    60
}
fn d_300() -> u64 {
    300
}
fn d_500() -> u64 {
    500
}
fn d_600() -> u64 {
    600
}
fn d_1000() -> u64 {
    1000
}
fn d_1800() -> u64 {
    1800
}
fn d_3000() -> u64 {
    3000
}
fn d_3600() -> u64 {
    3600
}
fn d_4096() -> usize {
    4096
}
fn d_5000() -> u64 {
    5000
}
fn d_7200() -> u64 {
    7200
}
fn d_8000() -> u64 {
    8000
}
fn d_15000() -> u64 {
    15_000
}
fn d_30000() -> u64 {
    30_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Env overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Apply `OC_*` environment variable overrides on top of file values.
    ///
    /// Unparseable numeric values are ignored with a warning rather than
    /// failing startup.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OC_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("OC_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("OC_LLM_CONTEXT_WINDOW") {
            match v.parse() {
                Ok(n) => self.llm.context_window = n,
                Err(_) => tracing::warn!(value = %v, "ignoring non-numeric OC_LLM_CONTEXT_WINDOW"),
            }
        }
        if let Ok(v) = std::env::var("OC_LLM_MAX_CONCURRENCY") {
            match v.parse() {
                Ok(n) => self.llm.max_concurrency = n,
                Err(_) => tracing::warn!(value = %v, "ignoring non-numeric OC_LLM_MAX_CONCURRENCY"),
            }
        }
        if let Ok(v) = std::env::var("OC_REDIS_URL") {
            self.redis.url = v;
        }
        if let Ok(v) = std::env::var("OC_CACHE_ENABLED") {
            self.cache.enabled = v != "false" && v != "0";
        }
        if let Ok(v) = std::env::var("OC_ASSET_BASE_URL") {
            self.upstream.asset_base_url = v;
        }
        if let Ok(v) = std::env::var("OC_AUTOMATION_BASE_URL") {
            self.upstream.automation_base_url = v;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let err = |field: &str, message: String| ConfigIssue {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message,
        };

        if self.server.port == 0 {
            issues.push(err("server.port", "port must be greater than 0".into()));
        }
        if self.server.host.is_empty() {
            issues.push(err("server.host", "host must not be empty".into()));
        }

        for (field, url) in [
            ("llm.base_url", &self.llm.base_url),
            ("upstream.asset_base_url", &self.upstream.asset_base_url),
            (
                "upstream.automation_base_url",
                &self.upstream.automation_base_url,
            ),
        ] {
            if url.is_empty() {
                issues.push(err(field, "must not be empty".into()));
            } else if !url.starts_with("http://") && !url.starts_with("https://") {
                issues.push(err(
                    field,
                    format!("must start with http:// or https:// (got \"{url}\")"),
                ));
            }
        }

        // Context window is model-specific and has no safe default.
        if self.llm.context_window == 0 {
            issues.push(err(
                "llm.context_window",
                "context_window is required (set it to the model's published window, e.g. 4096)"
                    .into(),
            ));
        }

        if self.llm.max_concurrency == 0 {
            issues.push(err(
                "llm.max_concurrency",
                "max_concurrency must be greater than 0".into(),
            ));
        }

        if self.redis.enabled && !self.redis.url.starts_with("redis://") {
            issues.push(err(
                "redis.url",
                format!("must start with redis:// (got \"{}\")", self.redis.url),
            ));
        }

        if self.stages.request_default_deadline_ms == 0 {
            issues.push(err(
                "stages.request_default_deadline_ms",
                "default deadline must be greater than 0".into(),
            ));
        }

        // Warn when the per-stage budgets already exceed the default request
        // deadline — the orchestrator will shrink them on every request.
        let stage_sum = self.stages.classify_deadline_ms
            + self.stages.select_deadline_ms
            + self.stages.plan_deadline_ms
            + self.stages.answer_deadline_ms;
        if stage_sum > self.stages.request_default_deadline_ms {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "stages".into(),
                message: format!(
                    "stage deadlines sum to {stage_sum}ms, above the {}ms request default; \
                     later stages will be shrunk proportionally",
                    self.stages.request_default_deadline_ms
                ),
            });
        }

        if !self.cache.enabled {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "cache.enabled".into(),
                message: "caching disabled; every request pays full LLM latency".into(),
            });
        }

        if self.server.allowed_origins.iter().any(|o| o == "*") {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "server.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)"
                    .into(),
            });
        }

        issues
    }
}
