//! Tool catalog declarations.
//!
//! A [`ToolSpec`] declares what a tool does and what it is allowed to touch;
//! the selector scores these declarations against a Decision and the planner
//! resolves step tools against the selected set plus the built-ins.

use serde::{Deserialize, Serialize};

/// Built-in pseudo-tools every plan may reference without selection.
pub const BUILTIN_TOOLS: &[&str] = &["noop", "annotate"];

/// Declaration of a single operational tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default = "d_version")]
    pub version: String,
    pub description: String,
    /// Intent category this tool serves, e.g. `asset_management`.
    pub category: String,
    /// Entity types the tool needs as inputs, e.g. `hostname`, `service`.
    #[serde(default)]
    pub required_entity_types: Vec<String>,
    /// Platforms the tool can operate on, e.g. `linux`, `windows`.
    /// Empty means platform-agnostic.
    #[serde(default)]
    pub platforms: Vec<String>,
    /// Environments the tool may target. Empty means any.
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub read_only: bool,
    /// Mutates state in a way that requires an explicit rollback plan.
    #[serde(default)]
    pub destructive: bool,
    #[serde(default)]
    pub high_risk: bool,
    /// Declared safe to invoke against production.
    #[serde(default)]
    pub production_safe: bool,
    #[serde(default = "d_duration")]
    pub expected_duration_s: u64,
    /// JSON Schema for the tool's inputs.
    #[serde(default)]
    pub inputs: serde_json::Value,
}

fn d_version() -> String {
    "1".into()
}

fn d_duration() -> u64 {
    30
}

impl ToolSpec {
    /// Whether this tool declares support for the given environment.
    pub fn supports_environment(&self, environment: &str) -> bool {
        self.environments.is_empty()
            || self
                .environments
                .iter()
                .any(|e| e.eq_ignore_ascii_case(environment))
    }

    /// Whether this tool declares support for the given platform.
    pub fn supports_platform(&self, platform: &str) -> bool {
        self.platforms.is_empty()
            || self.platforms.iter().any(|p| p.eq_ignore_ascii_case(platform))
    }
}

/// The full tool catalog, read-only after startup. Hot reload replaces the
/// whole catalog atomically, never entries in place.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolCatalog {
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

impl ToolCatalog {
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn is_builtin(name: &str) -> bool {
        BUILTIN_TOOLS.contains(&name)
    }

    /// Resolve a plan step's tool reference: a selected catalog tool or a
    /// declared built-in.
    pub fn resolves(&self, name: &str) -> bool {
        Self::is_builtin(name) || self.get(name).is_some()
    }

    /// Sorted `name@version` pairs, part of stage B/C cache keys.
    pub fn version_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .tools
            .iter()
            .map(|t| format!("{}@{}", t.name, t.version))
            .collect();
        tags.sort();
        tags
    }
}
