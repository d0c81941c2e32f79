//! The single gateway for all LLM calls.
//!
//! Wraps an [`LlmBackend`] with process-wide admission control (semaphore
//! with a bounded queue wait), the context-window guard, cancellation
//! propagation, token accounting, and strict-JSON protocol handling with one
//! corrective retry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use oc_domain::artifact::TokenUsage;
use oc_domain::cancel::CancelToken;
use oc_domain::config::LlmConfig;
use oc_domain::error::{Error, Result};
use oc_domain::trace::PipelineEvent;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::backend::{ChatCall, ChatMessage, ChatOutput, LlmBackend};

/// Approximate chars-per-token multiplier used for prompt estimation.
const CHARS_PER_TOKEN: usize = 4;

pub struct LlmService {
    backend: Arc<dyn LlmBackend>,
    semaphore: Arc<Semaphore>,
    context_window: u32,
    queue_wait: Duration,
}

impl LlmService {
    pub fn new(backend: Arc<dyn LlmBackend>, cfg: &LlmConfig) -> Self {
        Self {
            backend,
            semaphore: Arc::new(Semaphore::new(cfg.max_concurrency)),
            context_window: cfg.context_window,
            queue_wait: Duration::from_millis(cfg.queue_wait_ms),
        }
    }

    /// Estimate prompt tokens for a call.
    pub fn estimate_prompt_tokens(call: &ChatCall) -> u32 {
        (call.prompt_chars() / CHARS_PER_TOKEN) as u32
    }

    /// The configured model context window in tokens.
    pub fn context_window(&self) -> u32 {
        self.context_window
    }

    /// Largest `max_tokens` that still fits the context window after the
    /// given prompt, keeping `margin` tokens spare. `None` when even the
    /// prompt alone does not fit.
    pub fn clamp_max_tokens(&self, prompt_tokens: u32, desired: u32, margin: u32) -> Option<u32> {
        let budget = self.context_window.checked_sub(prompt_tokens + margin)?;
        if budget == 0 {
            return None;
        }
        Some(desired.min(budget))
    }

    /// Complete one chat call.
    ///
    /// Checks cancellation before admission, after acquiring a slot, and
    /// after the backend returns; the in-flight call itself races the
    /// token so a cancel aborts it without delivering partial text.
    pub async fn chat(
        &self,
        call: &ChatCall,
        deadline: Duration,
        cancel: &CancelToken,
    ) -> Result<ChatOutput> {
        cancel.ensure_active()?;

        let prompt_tokens = Self::estimate_prompt_tokens(call);
        if prompt_tokens + call.max_tokens > self.context_window {
            return Err(Error::ContextOverflow {
                prompt_tokens,
                max_tokens: call.max_tokens,
                context_window: self.context_window,
            });
        }

        // Bounded admission: waiting longer than the queue budget means the
        // process is saturated and the caller should shed load.
        let permit = match tokio::time::timeout(self.queue_wait, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::Overloaded),
            Err(_) => return Err(Error::Overloaded),
        };

        cancel.ensure_active()?;

        let started = Instant::now();
        let result = tokio::select! {
            out = self.backend.chat(call, deadline) => out,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };
        drop(permit);

        cancel.ensure_active()?;
        let out = result?;

        PipelineEvent::LlmCall {
            stage: call.stage.as_str(),
            model: out.model.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            prompt_tokens: out.usage.prompt_tokens,
            completion_tokens: out.usage.completion_tokens,
            attempts: 1,
        }
        .emit();

        Ok(out)
    }

    /// Complete a JSON-mode call and validate the response shape.
    ///
    /// `required_keys` is the compact schema contract: every listed key must
    /// be present in the top-level object. A malformed response gets exactly
    /// one corrective retry turn; a second failure is a protocol error.
    pub async fn chat_json(
        &self,
        call: &ChatCall,
        required_keys: &[&str],
        deadline: Duration,
        cancel: &CancelToken,
    ) -> Result<(Value, TokenUsage)> {
        let started = Instant::now();
        let first = self.chat(call, deadline, cancel).await?;
        let mut usage = first.usage;

        match parse_object(&first.text, required_keys) {
            Ok(value) => return Ok((value, usage)),
            Err(reason) => {
                tracing::warn!(stage = %call.stage, %reason, "malformed JSON response, issuing corrective retry");
            }
        }

        let mut retry_call = call.clone();
        retry_call
            .messages
            .push(ChatMessage::assistant(first.text.clone()));
        retry_call.messages.push(ChatMessage::user(format!(
            "Your previous response was not valid JSON for the required schema \
             (keys: {}). Respond again with ONLY the JSON object.",
            required_keys.join(", ")
        )));

        let remaining = deadline
            .checked_sub(started.elapsed())
            .ok_or_else(|| call.stage.timeout())?;
        let second = self.chat(&retry_call, remaining, cancel).await?;
        usage.add(second.usage);

        match parse_object(&second.text, required_keys) {
            Ok(value) => Ok((value, usage)),
            Err(reason) => Err(Error::LlmProtocol(format!(
                "response failed schema validation after corrective retry: {reason}"
            ))),
        }
    }
}

/// Parse `text` as a JSON object containing all `required_keys`.
///
/// Tolerates a fenced ```json block around the object, which smaller models
/// emit even in JSON mode.
fn parse_object(text: &str, required_keys: &[&str]) -> std::result::Result<Value, String> {
    let trimmed = strip_fences(text.trim());
    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| format!("not valid JSON: {e}"))?;
    let obj = value
        .as_object()
        .ok_or_else(|| "top-level value is not an object".to_string())?;
    for key in required_keys {
        if !obj.contains_key(*key) {
            return Err(format!("missing required key \"{key}\""));
        }
    }
    Ok(value)
}

fn strip_fences(text: &str) -> &str {
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}
