//! Query-side retrieval: embed the query, search the owner's index,
//! resolve chunk references to text.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::embedding::Embedder;
use crate::error::{RagError, RagResult};
use crate::indexes::OwnerIndexes;
use crate::models::RetrievedChunk;
use crate::retry::with_timeout;

#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    indexes: Arc<OwnerIndexes>,
    timeout: Duration,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, indexes: Arc<OwnerIndexes>, timeout: Duration) -> Self {
        Self {
            embedder,
            indexes,
            timeout,
        }
    }

    /// Top-`k` chunks for `query`, highest similarity first.
    ///
    /// An owner with no index (or an empty one) gets an empty result
    /// without the query being embedded. The stored model identity is
    /// checked against the configured embedder before anything else.
    pub async fn retrieve(&self, owner: &str, query: &str, k: usize) -> RagResult<Vec<RetrievedChunk>> {
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be >= 1".to_string()));
        }
        if query.trim().is_empty() {
            return Err(RagError::InvalidArgument("query is empty".to_string()));
        }

        let Some(stats) = self.indexes.stats(owner).await? else {
            debug!(owner, "no index for owner");
            return Ok(Vec::new());
        };
        if stats.model != self.embedder.model_name() || stats.dims != self.embedder.dims() {
            return Err(RagError::ConfigMismatch(format!(
                "index built with {} ({} dims), embedder is {} ({} dims)",
                stats.model,
                stats.dims,
                self.embedder.model_name(),
                self.embedder.dims()
            )));
        }
        if stats.vectors == 0 {
            return Ok(Vec::new());
        }

        let vector = with_timeout(self.timeout, self.embedder.embed_one(query)).await?;
        let hits = self
            .indexes
            .search(owner, self.embedder.model_name(), &vector, k)
            .await?;
        debug!(
            owner,
            k,
            hits = hits.len(),
            top_score = hits.first().map(|h| h.score),
            "retrieved"
        );
        Ok(hits)
    }
}
