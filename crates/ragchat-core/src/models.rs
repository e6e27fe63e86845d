//! Core data models used throughout ragchat.
//!
//! These types represent the documents, chunks, retrieval results, and
//! conversation turns that flow through the ingestion and query pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-uploaded document, immutable once ingested.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub owner: String,
    pub title: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A contiguous span of a document's text; the unit of retrieval.
///
/// `start`/`end` are byte offsets into the parent document text and
/// `token_start`/`token_end` are the covered token positions, both
/// half-open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk reference, `"{document_id}:{chunk_index}"`.
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub token_start: usize,
    pub token_end: usize,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// Build the deterministic chunk reference for a document position.
pub fn chunk_ref(document_id: &str, chunk_index: usize) -> String {
    format!("{}:{}", document_id, chunk_index)
}

/// Per-document bookkeeping kept in an owner's chunk store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub chunk_count: usize,
}

/// A chunk resolved back to its text, with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_ref: String,
    pub document_id: String,
    pub text: String,
    pub score: f32,
}

/// One question/answer exchange of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub query: String,
    /// `None` while the completion is pending or if generation failed.
    pub response: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Chunk references that were placed in the prompt for this turn.
    #[serde(default)]
    pub provenance: Vec<String>,
}

impl Turn {
    pub fn new(query: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            response: Some(response.into()),
            timestamp: Utc::now(),
            provenance: Vec::new(),
        }
    }

    /// A turn is usable as history only when both sides are present.
    pub fn is_complete(&self) -> bool {
        !self.query.trim().is_empty()
            && self
                .response
                .as_deref()
                .is_some_and(|r| !r.trim().is_empty())
    }
}
