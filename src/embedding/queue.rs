//! Single-worker embedding queue.
//!
//! Models whose runtime is not reentrant are driven by one worker task
//! fed through a bounded channel. Callers wait for a free slot when the
//! queue is full, so memory stays bounded under load instead of piling up
//! blocked threads.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::embedding::Embedder;
use crate::error::{RagError, RagResult};

struct Job {
    texts: Vec<String>,
    reply: oneshot::Sender<RagResult<Vec<Vec<f32>>>>,
}

/// An [`Embedder`] that forwards every call to one background worker.
pub struct SerializedEmbedder {
    model: String,
    dims: usize,
    tx: mpsc::Sender<Job>,
}

impl SerializedEmbedder {
    /// Spawn the worker on the current tokio runtime. At most `capacity`
    /// requests wait in the queue; the worker runs one at a time.
    pub fn spawn(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let model = inner.model_name().to_string();
        let dims = inner.dims();

        let worker_model = model.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = inner.embed(&job.texts).await;
                // The caller may have given up (timeout); nothing to do then.
                let _ = job.reply.send(result);
            }
            debug!(model = %worker_model, "embedding worker stopped");
        });

        Self { model, dims, tx }
    }
}

#[async_trait]
impl Embedder for SerializedEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job {
                texts: texts.to_vec(),
                reply,
            })
            .await
            .map_err(|_| RagError::ModelUnavailable("embedding worker has stopped".to_string()))?;

        rx.await.map_err(|_| {
            RagError::ModelUnavailable("embedding worker dropped the request".to_string())
        })?
    }
}
