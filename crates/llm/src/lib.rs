//! LLM access for the pipeline: the backend trait and OpenAI-compatible
//! adapter, the admission/validation service every stage calls through, and
//! the versioned prompt templates.

pub mod backend;
pub mod client;
pub mod prompts;
pub mod service;

pub use backend::{ChatCall, ChatMessage, ChatOutput, LlmBackend, Role};
pub use client::HttpLlmBackend;
pub use service::LlmService;
