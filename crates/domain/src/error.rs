use std::fmt;

/// Shared error type used across all OpsConductor crates.
///
/// Stages return these to the orchestrator; the gateway maps them to HTTP
/// status codes. The cache layer never surfaces errors to callers — it
/// degrades to a miss.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("config: {0}")]
    Config(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("LLM backend unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM protocol violation: {0}")]
    LlmProtocol(String),

    #[error("context overflow: prompt ~{prompt_tokens} tokens + max_tokens {max_tokens} exceeds window {context_window}")]
    ContextOverflow {
        prompt_tokens: u32,
        max_tokens: u32,
        context_window: u32,
    },

    #[error("timeout in {stage}")]
    Timeout { stage: String },

    #[error("cancelled")]
    Cancelled,

    #[error("upstream {service} unavailable: {message}")]
    UpstreamUnavailable { service: String, message: String },

    #[error("plan invalid: {rule}")]
    PlanInvalid { rule: String },

    #[error("approval required for request {request_id}")]
    ApprovalRequired {
        request_id: String,
        /// Present when a fresh awaiting-approval record was persisted;
        /// absent when an invalid token was offered on resume.
        resume_token: Option<String>,
    },

    #[error("overloaded: LLM admission queue full")]
    Overloaded,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Machine-readable error kind, used in the HTTP error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Http(_) => "http",
            Error::Config(_) => "config",
            Error::Validation(_) => "validation_error",
            Error::LlmUnavailable(_) => "llm_unavailable",
            Error::LlmProtocol(_) => "llm_protocol_error",
            Error::ContextOverflow { .. } => "context_overflow",
            Error::Timeout { .. } => "timeout",
            Error::Cancelled => "cancelled",
            Error::UpstreamUnavailable { .. } => "upstream_unavailable",
            Error::PlanInvalid { .. } => "plan_invalid",
            Error::ApprovalRequired { .. } => "approval_required",
            Error::Overloaded => "overloaded",
        }
    }

    /// Whether the caller can reasonably retry the same request.
    pub fn retriable(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::Overloaded | Error::LlmUnavailable(_)
        )
    }

    /// The stage this error is tagged with, when any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Error::Timeout { stage } => Some(stage),
            _ => None,
        }
    }
}

/// Pipeline stage identifier, used for deadlines, cache namespaces, and
/// error tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Classify,
    Select,
    Plan,
    Answer,
    Execute,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classify => "stage_a",
            Stage::Select => "stage_b",
            Stage::Plan => "stage_c",
            Stage::Answer => "stage_d",
            Stage::Execute => "stage_e",
        }
    }

    pub fn timeout(&self) -> Error {
        Error::Timeout {
            stage: self.as_str().into(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        assert!(Error::Overloaded.retriable());
        assert!(Error::LlmUnavailable("connect refused".into()).retriable());
        assert!(Stage::Plan.timeout().retriable());
        assert!(!Error::Validation("empty text".into()).retriable());
        assert!(!Error::PlanInvalid { rule: "cycle".into() }.retriable());
        assert!(!Error::Cancelled.retriable());
    }

    #[test]
    fn timeout_carries_stage_tag() {
        let err = Stage::Classify.timeout();
        assert_eq!(err.stage(), Some("stage_a"));
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn stage_names_are_stable() {
        assert_eq!(Stage::Classify.as_str(), "stage_a");
        assert_eq!(Stage::Select.as_str(), "stage_b");
        assert_eq!(Stage::Plan.as_str(), "stage_c");
        assert_eq!(Stage::Answer.as_str(), "stage_d");
        assert_eq!(Stage::Execute.as_str(), "stage_e");
    }

    #[test]
    fn kind_strings_match_api_contract() {
        assert_eq!(
            Error::ApprovalRequired {
                request_id: "r1".into(),
                resume_token: None
            }
            .kind(),
            "approval_required"
        );
        assert_eq!(Error::Overloaded.kind(), "overloaded");
        assert_eq!(
            Error::UpstreamUnavailable {
                service: "asset".into(),
                message: "503".into()
            }
            .kind(),
            "upstream_unavailable"
        );
    }
}
