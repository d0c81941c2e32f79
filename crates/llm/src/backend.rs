use std::time::Duration;

use oc_domain::artifact::TokenUsage;
use oc_domain::error::{Result, Stage};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// A single chat completion call, tagged with the stage issuing it.
#[derive(Debug, Clone)]
pub struct ChatCall {
    pub stage: Stage,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    /// When `true`, request `response_format = {"type": "json_object"}`.
    pub json_mode: bool,
    pub stop: Option<Vec<String>>,
}

impl ChatCall {
    pub fn new(stage: Stage, messages: Vec<ChatMessage>, max_tokens: u32) -> Self {
        Self {
            stage,
            messages,
            max_tokens,
            temperature: Some(0.0),
            json_mode: false,
            stop: None,
        }
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    /// Total characters across all messages, the basis of the prompt-token
    /// estimate.
    pub fn prompt_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

/// The backend's answer to one call.
#[derive(Debug, Clone)]
pub struct ChatOutput {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A transport that can complete one chat call within a deadline.
///
/// Implementations own retries on transport errors (calls are idempotent —
/// each carries a client-generated idempotency key). Admission control,
/// context-window guarding, and schema validation live above, in
/// [`crate::service::LlmService`].
#[async_trait::async_trait]
pub trait LlmBackend: Send + Sync {
    async fn chat(&self, call: &ChatCall, deadline: Duration) -> Result<ChatOutput>;

    fn model(&self) -> &str;
}
