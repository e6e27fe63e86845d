//! In-process embeddings via fastembed (ONNX Runtime, bundled binaries).
//!
//! Models are downloaded from Hugging Face on first use and cached. The
//! model handle is created lazily on the first call and reused; calls must
//! be serialized, so [`create_embedder`](super::create_embedder) always
//! wraps this type in a [`SerializedEmbedder`](super::SerializedEmbedder).

use anyhow::bail;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::config::EmbeddingConfig;
use crate::embedding::{check_embeddings, Embedder};
use crate::error::{RagError, RagResult};

pub struct LocalEmbedder {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
    handle: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
}

impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let (model, native_dims) = resolve_model(&model_name)?;
        let dims = config.dims.unwrap_or(native_dims);
        if dims != native_dims {
            bail!(
                "embedding.dims = {} but {} produces {}-dimensional vectors",
                dims,
                model_name,
                native_dims
            );
        }

        Ok(Self {
            model_name,
            model,
            dims,
            batch_size: config.batch_size,
            handle: Arc::new(Mutex::new(None)),
        })
    }
}

fn resolve_model(name: &str) -> anyhow::Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel as M;
    match name {
        "all-minilm-l6-v2" => Ok((M::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((M::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((M::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((M::BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Ok((M::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((M::MultilingualE5Small, 384)),
        "multilingual-e5-base" => Ok((M::MultilingualE5Base, 768)),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base",
            other
        ),
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let handle = self.handle.clone();
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let inputs = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = handle
                .lock()
                .map_err(|_| RagError::ModelUnavailable("local model lock poisoned".to_string()))?;
            if guard.is_none() {
                let loaded = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(false),
                )
                .map_err(|e| {
                    RagError::ModelUnavailable(format!(
                        "Failed to initialize local embedding model: {}",
                        e
                    ))
                })?;
                *guard = Some(loaded);
            }
            let Some(embedder) = guard.as_mut() else {
                return Err(RagError::ModelUnavailable("local model not loaded".to_string()));
            };
            embedder
                .embed(inputs, Some(batch_size))
                .map_err(|e| RagError::ModelUnavailable(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| RagError::ModelUnavailable(format!("embedding task failed: {}", e)))??;

        check_embeddings(&self.model_name, self.dims, texts.len(), &vectors)?;
        Ok(vectors)
    }
}
