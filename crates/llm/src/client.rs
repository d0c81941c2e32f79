//! OpenAI-compatible chat completions adapter.
//!
//! Works with vLLM, Ollama, LM Studio, and any other endpoint that follows
//! the OpenAI `/chat/completions` contract. Owns transport retries (429/5xx
//! and connection errors, exponential backoff, capped attempts) and usage
//! parsing.

use std::time::{Duration, Instant};

use oc_domain::artifact::TokenUsage;
use oc_domain::config::LlmConfig;
use oc_domain::error::{Error, Result};
use serde_json::Value;

use crate::backend::{ChatCall, ChatOutput, LlmBackend, Role};

/// Base delay for the retry backoff schedule.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

pub struct HttpLlmBackend {
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpLlmBackend {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let api_key = match &cfg.api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(v) if !v.is_empty() => Some(v),
                _ => {
                    tracing::warn!(env_var = %var, "LLM api_key_env set but variable is empty");
                    None
                }
            },
            None => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_s))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
            max_retries: cfg.max_retries,
            client,
        })
    }

    fn build_body(&self, call: &ChatCall) -> Value {
        let messages: Vec<Value> = call
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": role_to_str(m.role),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": call.max_tokens,
        });
        if let Some(temp) = call.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(ref stop) = call.stop {
            body["stop"] = serde_json::json!(stop);
        }
        if call.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }

    async fn send_once(&self, body: &Value, deadline: Duration, key: &str) -> Result<ChatOutput> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .timeout(deadline)
            .header("Content-Type", "application/json")
            .header("Idempotency-Key", key);
        if let Some(ref api_key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {api_key}"));
        }

        let resp = req.json(body).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if status.as_u16() == 429 || status.is_server_error() {
            return Err(Error::LlmUnavailable(format!(
                "HTTP {} - {}",
                status.as_u16(),
                truncate(&resp_text, 300)
            )));
        }
        if !status.is_success() {
            return Err(Error::Http(format!(
                "LLM backend returned HTTP {} - {}",
                status.as_u16(),
                truncate(&resp_text, 300)
            )));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_chat_response(&resp_json)
    }
}

#[async_trait::async_trait]
impl LlmBackend for HttpLlmBackend {
    async fn chat(&self, call: &ChatCall, deadline: Duration) -> Result<ChatOutput> {
        let body = self.build_body(call);
        // Client-generated idempotency key: the retry loop may safely
        // replay the call against a backend that deduplicates on it.
        let key = format!("oc-{}", uuid::Uuid::new_v4());
        let started = Instant::now();

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            let remaining = match deadline.checked_sub(started.elapsed()) {
                Some(r) if !r.is_zero() => r,
                _ => break,
            };

            match self.send_once(&body, remaining, &key).await {
                Ok(out) => return Ok(out),
                // Only transport-level failures are retried; protocol and
                // request errors surface immediately.
                Err(err @ (Error::LlmUnavailable(_) | Error::Timeout { .. })) => {
                    tracing::warn!(
                        stage = %call.stage,
                        attempt,
                        error = %err,
                        "LLM transport error"
                    );
                    last_err = Some(err);
                    if attempt < self.max_retries {
                        tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt)).await;
                    }
                }
                Err(other) => return Err(other),
            }
        }

        match last_err {
            Some(Error::Timeout { .. }) | None => Err(call.stage.timeout()),
            Some(err) => Err(err),
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout {
            stage: "llm".into(),
        }
    } else if e.is_connect() {
        Error::LlmUnavailable(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while end < s.len() && !s.is_char_boundary(end) {
        end += 1;
    }
    &s[..end]
}

fn parse_chat_response(body: &Value) -> Result<ChatOutput> {
    let text = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::LlmProtocol("no message content in response".into()))?
        .to_string();

    let usage = body
        .get("usage")
        .map(|u| TokenUsage {
            prompt_tokens: u
                .get("prompt_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            completion_tokens: u
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
        })
        .unwrap_or_default();

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(ChatOutput { text, usage, model })
}
