//! Embedding backends.
//!
//! Concrete [`Embedder`] implementations on top of the core trait:
//! - **[`HashingEmbedder`]**: offline feature hashing (default; re-exported from core).
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: runs a fastembed ONNX model in-process (feature
//!   `local-embeddings-fastembed`), always behind a [`SerializedEmbedder`].
//!
//! # Provider Selection
//!
//! Use [`create_embedder`] to instantiate the configured backend:
//!
//! ```rust,no_run
//! # use ragchat::config::EmbeddingConfig;
//! # use ragchat::embedding::{create_embedder, Embedder};
//! let config = EmbeddingConfig::default(); // provider = "hashing"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "hashing-v1");
//! ```
//!
//! # Failure Semantics
//!
//! Network backends retry HTTP 429, 5xx, and connection errors with
//! exponential backoff (see [`crate::retry`]). Once retries are exhausted
//! the failure surfaces as `ModelUnavailable`; a per-attempt timeout that
//! never recovers surfaces as `Timeout`. A malformed response is never
//! patched up with placeholder values.

#[cfg(feature = "local-embeddings-fastembed")]
mod local;
mod queue;

use anyhow::bail;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use ragchat_core::embedding::*;
pub use queue::SerializedEmbedder;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, RagResult};
use crate::retry::{send_error, status_error, with_retries, RetryPolicy};

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

/// Collapse exhausted transport failures into `ModelUnavailable`.
fn unavailable(e: RagError) -> RagError {
    match e {
        RagError::ServiceUnavailable(m) | RagError::RateLimited(m) => RagError::ModelUnavailable(m),
        other => other,
    }
}

fn parse_vector(value: &serde_json::Value, what: &str) -> RagResult<Vec<f32>> {
    let arr = value
        .as_array()
        .ok_or_else(|| RagError::ModelUnavailable(format!("Invalid {} response: embedding is not an array", what)))?;
    arr.iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                RagError::ModelUnavailable(format!("Invalid {} response: non-numeric component", what))
            })
        })
        .collect()
}

// ============ OpenAI ============

/// Embedding backend using the OpenAI API.
///
/// Calls `POST {url}/v1/embeddings` (default `https://api.openai.com`).
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    batch_size: usize,
    timeout: Duration,
    policy: RetryPolicy,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(k) => k,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            batch_size: config.batch_size,
            timeout,
            policy: RetryPolicy::new(config.max_retries),
            client,
        })
    }

    async fn request(&self, batch: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": batch,
        });

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
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
        parse_openai_response(&json)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = with_retries(self.policy, "OpenAI", || self.request(batch))
                .await
                .map_err(unavailable)?;
            check_embeddings(&self.model, self.dims, batch.len(), &vectors)?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> RagResult<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::ModelUnavailable("Invalid OpenAI response: missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item.get("embedding").ok_or_else(|| {
            RagError::ModelUnavailable("Invalid OpenAI response: missing embedding".to_string())
        })?;
        indexed.push((index, parse_vector(embedding, "OpenAI")?));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedding backend using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default
/// `http://localhost:11434`). The model must already be pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    timeout: Duration,
    policy: RetryPolicy,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let timeout = Duration::from_secs(config.timeout_secs);

        Ok(Self {
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            batch_size: config.batch_size,
            timeout,
            policy: RetryPolicy::new(config.max_retries),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    async fn request(&self, batch: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": batch,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| match send_error("Ollama", e, self.timeout) {
                RagError::ServiceUnavailable(m) => RagError::ServiceUnavailable(format!(
                    "{} (is Ollama running at {}?)",
                    m, self.url
                )),
                other => other,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(status_error("Ollama", status, &body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| send_error("Ollama", e, self.timeout))?;
        parse_ollama_response(&json)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = with_retries(self.policy, "Ollama", || self.request(batch))
                .await
                .map_err(unavailable)?;
            check_embeddings(&self.model, self.dims, batch.len(), &vectors)?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> RagResult<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            RagError::ModelUnavailable("Invalid Ollama response: missing embeddings array".to_string())
        })?;

    embeddings.iter().map(|e| parse_vector(e, "Ollama")).collect()
}

/// Create the configured [`Embedder`].
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"hashing"` | [`HashingEmbedder`] (`dims` default 384) |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` behind a [`SerializedEmbedder`] |
///
/// The local backend spawns its worker task, so it must be called from
/// within a tokio runtime.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dims.unwrap_or(384)))),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => {
            let local = LocalEmbedder::new(config)?;
            Ok(Arc::new(SerializedEmbedder::spawn(
                Arc::new(local),
                config.queue_capacity,
            )))
        }
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
