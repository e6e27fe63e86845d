//! Language-model clients.
//!
//! A client takes one prompt string plus a [`GenerationConfig`] and returns
//! the completion text, or a typed failure: `RateLimited`,
//! `ServiceUnavailable` or `InvalidRequest` (plus `Timeout` for a single
//! attempt that ran out of time). Transient failures are retried with the
//! shared backoff policy before being surfaced.
//!
//! | Provider | Endpoint | Key |
//! |----------|----------|-----|
//! | `gemini` | `POST /v1beta/models/{model}:generateContent` | `GEMINI_API_KEY` or `API_KEY` |
//! | `openai` | `POST /v1/chat/completions` | `OPENAI_API_KEY` |

use anyhow::bail;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{RagError, RagResult};
use crate::retry::{send_error, status_error, with_retries, RetryPolicy};

/// Per-call generation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl From<&LlmConfig> for GenerationConfig {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str, generation: &GenerationConfig) -> RagResult<String>;
}

fn env_key(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| std::env::var(n).ok().filter(|v| !v.trim().is_empty()))
}

// ============ Gemini ============

pub struct GeminiClient {
    model: String,
    base_url: String,
    api_key: String,
    timeout: Duration,
    policy: RetryPolicy,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let Some(api_key) = env_key(&["GEMINI_API_KEY", "API_KEY"]) else {
            bail!("GEMINI_API_KEY (or API_KEY) environment variable not set");
        };
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            model: config.model.clone(),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            api_key,
            timeout,
            policy: RetryPolicy::new(config.max_retries),
            client,
        })
    }

    async fn request(&self, prompt: &str, generation: &GenerationConfig) -> RagResult<String> {
        let body = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": generation.temperature,
                "maxOutputTokens": generation.max_output_tokens,
            },
        });

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error("Gemini", e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error("Gemini", status, &body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| send_error("Gemini", e, self.timeout))?;
        parse_gemini_response(&json)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, generation: &GenerationConfig) -> RagResult<String> {
        with_retries(self.policy, "Gemini", || self.request(prompt, generation)).await
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_response(json: &serde_json::Value) -> RagResult<String> {
    let Some(candidate) = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
    else {
        let reason = json
            .pointer("/promptFeedback/blockReason")
            .and_then(|r| r.as_str())
            .unwrap_or("no candidates returned");
        return Err(RagError::InvalidRequest(format!(
            "Gemini returned no completion: {}",
            reason
        )));
    };

    let parts = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            RagError::ServiceUnavailable("Invalid Gemini response: missing content parts".to_string())
        })?;

    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join(""))
}

// ============ OpenAI ============

/// Client for OpenAI-compatible chat-completion APIs.
pub struct OpenAIChatClient {
    model: String,
    base_url: String,
    api_key: String,
    timeout: Duration,
    policy: RetryPolicy,
    client: reqwest::Client,
}

impl OpenAIChatClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let Some(api_key) = env_key(&["OPENAI_API_KEY"]) else {
            bail!("OPENAI_API_KEY environment variable not set");
        };
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            model: config.model.clone(),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            timeout,
            policy: RetryPolicy::new(config.max_retries),
            client,
        })
    }

    async fn request(&self, prompt: &str, generation: &GenerationConfig) -> RagResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": generation.temperature,
            "max_tokens": generation.max_output_tokens,
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error("OpenAI", e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error("OpenAI", status, &body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| send_error("OpenAI", e, self.timeout))?;
        parse_openai_chat_response(&json)
    }
}

#[async_trait]
impl LlmClient for OpenAIChatClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, generation: &GenerationConfig) -> RagResult<String> {
        with_retries(self.policy, "OpenAI", || self.request(prompt, generation)).await
    }
}

fn parse_openai_chat_response(json: &serde_json::Value) -> RagResult<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            RagError::ServiceUnavailable(
                "Invalid OpenAI response: missing choices[0].message.content".to_string(),
            )
        })
}

/// Create the configured [`LlmClient`].
pub fn create_llm(config: &LlmConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiClient::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIChatClient::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
