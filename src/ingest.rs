//! Ingestion pipeline orchestration.
//!
//! Validate → chunk → embed (one batch call) → append to the owner's index
//! → persist. Nothing reaches the index until every chunk of the document
//! has a vector, and the append and persist happen as one unit, so a
//! failed or timed-out ingestion leaves no trace.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::{check_embeddings, Embedder};
use crate::error::{RagError, RagResult};
use crate::indexes::OwnerIndexes;
use crate::models::{Document, DocumentRecord};
use crate::retry::with_timeout;

/// Build a [`Document`], generating a UUID when no id is given.
pub fn new_document(
    owner: &str,
    text: impl Into<String>,
    title: Option<String>,
    id: Option<String>,
) -> Document {
    Document {
        id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        owner: owner.to_string(),
        title,
        text: text.into(),
        created_at: Utc::now(),
    }
}

/// Outcome of one successful ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub owner: String,
    pub document_id: String,
    pub chunks: usize,
    /// Vectors in the owner's index after the append.
    pub total_vectors: usize,
}

#[derive(Clone)]
pub struct IngestionPipeline {
    embedder: Arc<dyn Embedder>,
    indexes: Arc<OwnerIndexes>,
    chunk_size: usize,
    overlap: usize,
    timeout: Duration,
}

impl IngestionPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        indexes: Arc<OwnerIndexes>,
        chunking: &ChunkingConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            indexes,
            chunk_size: chunking.chunk_size,
            overlap: chunking.overlap,
            timeout,
        }
    }

    pub async fn ingest(&self, document: &Document) -> RagResult<IngestReport> {
        if document.owner.trim().is_empty() {
            return Err(RagError::InvalidArgument("owner is empty".to_string()));
        }
        if document.id.trim().is_empty() {
            return Err(RagError::InvalidArgument("document id is empty".to_string()));
        }
        if document.text.trim().is_empty() {
            return Err(RagError::InvalidArgument(format!(
                "document {} has no text",
                document.id
            )));
        }

        let owner = document.owner.as_str();
        let model = self.embedder.model_name();
        let dims = self.embedder.dims();

        // Reject known conflicts before spending an embedding call.
        if let Some(stats) = self.indexes.stats(owner).await? {
            if stats.model != model || stats.dims != dims {
                return Err(RagError::ConfigMismatch(format!(
                    "index built with {} ({} dims), embedder is {} ({} dims)",
                    stats.model, stats.dims, model, dims
                )));
            }
            let documents = self.indexes.documents(owner).await?;
            if documents.iter().any(|d| d.id == document.id) {
                return Err(RagError::InvalidArgument(format!(
                    "document {} is already indexed",
                    document.id
                )));
            }
        }

        let chunks = chunk_text(&document.id, &document.text, self.chunk_size, self.overlap)?;
        debug!(owner, document_id = %document.id, chunks = chunks.len(), "chunked");

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = with_timeout(self.timeout, self.embedder.embed(&texts)).await?;
        check_embeddings(model, dims, texts.len(), &vectors)?;

        let record = DocumentRecord {
            id: document.id.clone(),
            title: document.title.clone(),
            created_at: document.created_at,
            chunk_count: chunks.len(),
        };
        let stats = self
            .indexes
            .add_document(owner, model, dims, record, &chunks, &vectors)
            .await?;

        info!(
            owner,
            document_id = %document.id,
            chunks = chunks.len(),
            total_vectors = stats.vectors,
            "ingested"
        );
        Ok(IngestReport {
            owner: owner.to_string(),
            document_id: document.id.clone(),
            chunks: chunks.len(),
            total_vectors: stats.vectors,
        })
    }
}
