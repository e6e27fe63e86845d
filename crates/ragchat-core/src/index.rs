//! Per-owner vector index and chunk-text store.
//!
//! [`VectorIndex`] is a flat (exact) nearest-neighbour structure over
//! L2-normalised vectors. Similarity is **cosine**: vectors are normalised
//! at insertion and queries at search time, so the score is a dot product
//! in `[-1.0, 1.0]`. Results are ordered by descending score with ties
//! broken by insertion order.
//!
//! [`ChunkStore`] holds the text behind every chunk reference plus
//! per-document bookkeeping. [`OwnerIndex`] pairs the two and keeps their
//! membership identical: every indexed vector has its chunk text and every
//! stored chunk has its vector.
//!
//! Both halves serialize to JSON snapshots. Vectors are stored as base64
//! little-endian `f32` blobs under a SHA-256 checksum, so a reload is
//! bit-identical and any damage surfaces as [`RagError::IndexCorrupt`].

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::embedding::{decode_vector, encode_vector, l2_normalize, vec_to_blob};
use crate::error::{RagError, RagResult};
use crate::models::{Chunk, DocumentRecord, RetrievedChunk};

/// Snapshot format written by this version.
pub const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Debug, Clone)]
struct IndexEntry {
    chunk_ref: String,
    document_id: String,
    vector: Vec<f32>,
}

/// Exact cosine-similarity index over one owner's chunk embeddings.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model: String,
    dims: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new(model: impl Into<String>, dims: usize) -> Self {
        Self {
            model: model.into(),
            dims,
            entries: Vec::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail with `ConfigMismatch` unless `model`/`dims` match this index.
    pub fn check_compatible(&self, model: &str, dims: usize) -> RagResult<()> {
        if self.model != model || self.dims != dims {
            return Err(RagError::ConfigMismatch(format!(
                "index was built with {} ({} dims) but the embedder is {} ({} dims)",
                self.model, self.dims, model, dims
            )));
        }
        Ok(())
    }

    /// Append one vector per chunk, keyed by `chunk.id`.
    ///
    /// All-or-nothing: every input is validated before anything is stored.
    pub fn add(&mut self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> RagResult<()> {
        if chunks.len() != vectors.len() {
            return Err(RagError::InvalidArgument(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        let existing: HashSet<&str> = self.entries.iter().map(|e| e.chunk_ref.as_str()).collect();
        let mut incoming: HashSet<&str> = HashSet::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            if vector.len() != self.dims {
                return Err(RagError::ConfigMismatch(format!(
                    "vector for {} has {} dims, index expects {}",
                    chunk.id,
                    vector.len(),
                    self.dims
                )));
            }
            if vector.iter().any(|x| !x.is_finite()) {
                return Err(RagError::InvalidArgument(format!(
                    "vector for {} contains non-finite values",
                    chunk.id
                )));
            }
            if existing.contains(chunk.id.as_str()) || !incoming.insert(chunk.id.as_str()) {
                return Err(RagError::InvalidArgument(format!(
                    "duplicate chunk reference {}",
                    chunk.id
                )));
            }
        }

        self.entries.reserve(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let mut v = vector.clone();
            l2_normalize(&mut v);
            self.entries.push(IndexEntry {
                chunk_ref: chunk.id.clone(),
                document_id: chunk.document_id.clone(),
                vector: v,
            });
        }
        Ok(())
    }

    /// Return up to `k` `(chunk_ref, score)` pairs, best first.
    ///
    /// Fewer than `k` stored vectors is not an error; everything available
    /// is returned.
    pub fn search(&self, query: &[f32], k: usize) -> RagResult<Vec<(String, f32)>> {
        if query.len() != self.dims {
            return Err(RagError::ConfigMismatch(format!(
                "query vector has {} dims, index expects {}",
                query.len(),
                self.dims
            )));
        }
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut q = query.to_vec();
        l2_normalize(&mut q);

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, crate::embedding::dot(&q, &e.vector)))
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| (self.entries[i].chunk_ref.clone(), score))
            .collect())
    }

    /// Drop every vector derived from `document_id` and rebuild the entry
    /// list from what remains. Returns the number of vectors removed.
    pub fn remove_document(&mut self, document_id: &str) -> usize {
        let before = self.entries.len();
        let retained: Vec<IndexEntry> = self
            .entries
            .drain(..)
            .filter(|e| e.document_id != document_id)
            .collect();
        self.entries = retained;
        before - self.entries.len()
    }

    /// Truncate back to `len` entries, undoing the most recent appends.
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Chunk references in insertion order.
    pub fn chunk_refs(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.chunk_ref.as_str())
    }

    pub fn to_snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            format: SNAPSHOT_FORMAT,
            model: self.model.clone(),
            dims: self.dims,
            checksum: self.checksum(),
            entries: self
                .entries
                .iter()
                .map(|e| SnapshotEntry {
                    chunk_ref: e.chunk_ref.clone(),
                    document_id: e.document_id.clone(),
                    vector: encode_vector(&e.vector),
                })
                .collect(),
        }
    }

    /// Rebuild an index from a snapshot, verifying format, dimensions,
    /// and checksum.
    pub fn from_snapshot(snapshot: IndexSnapshot) -> RagResult<Self> {
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(RagError::IndexCorrupt(format!(
                "unsupported index format {}",
                snapshot.format
            )));
        }
        if snapshot.dims == 0 {
            return Err(RagError::IndexCorrupt("index dims is 0".to_string()));
        }

        let mut entries = Vec::with_capacity(snapshot.entries.len());
        for e in snapshot.entries {
            let vector = decode_vector(&e.vector, snapshot.dims)?;
            entries.push(IndexEntry {
                chunk_ref: e.chunk_ref,
                document_id: e.document_id,
                vector,
            });
        }

        let index = Self {
            model: snapshot.model,
            dims: snapshot.dims,
            entries,
        };
        if index.checksum() != snapshot.checksum {
            return Err(RagError::IndexCorrupt("checksum mismatch".to_string()));
        }
        Ok(index)
    }

    fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.model.as_bytes());
        hasher.update((self.dims as u64).to_le_bytes());
        for e in &self.entries {
            hasher.update(e.chunk_ref.as_bytes());
            hasher.update([0u8]);
            hasher.update(e.document_id.as_bytes());
            hasher.update([0u8]);
            hasher.update(vec_to_blob(&e.vector));
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Serialized form of a [`VectorIndex`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub format: u32,
    pub model: String,
    pub dims: usize,
    pub checksum: String,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub chunk_ref: String,
    pub document_id: String,
    /// Base64 of the little-endian `f32` bytes.
    pub vector: String,
}

/// Chunk texts and document records for one owner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkStore {
    documents: Vec<DocumentRecord>,
    chunks: BTreeMap<String, Chunk>,
}

impl ChunkStore {
    pub fn documents(&self) -> &[DocumentRecord] {
        &self.documents
    }

    pub fn contains_document(&self, document_id: &str) -> bool {
        self.documents.iter().any(|d| d.id == document_id)
    }

    pub fn get(&self, chunk_ref: &str) -> Option<&Chunk> {
        self.chunks.get(chunk_ref)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn insert_document(&mut self, record: DocumentRecord, chunks: &[Chunk]) {
        for c in chunks {
            self.chunks.insert(c.id.clone(), c.clone());
        }
        self.documents.push(record);
    }

    fn remove_document(&mut self, document_id: &str) -> bool {
        let before = self.documents.len();
        self.documents.retain(|d| d.id != document_id);
        self.chunks.retain(|_, c| c.document_id != document_id);
        self.documents.len() < before
    }
}

/// Summary counts for one owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub model: String,
    pub dims: usize,
    pub documents: usize,
    pub vectors: usize,
}

/// A [`VectorIndex`] and its [`ChunkStore`], kept in lockstep.
#[derive(Debug, Clone)]
pub struct OwnerIndex {
    index: VectorIndex,
    store: ChunkStore,
}

impl OwnerIndex {
    pub fn new(model: impl Into<String>, dims: usize) -> Self {
        Self {
            index: VectorIndex::new(model, dims),
            store: ChunkStore::default(),
        }
    }

    /// Pair a loaded index with its chunk store, failing with
    /// `IndexCorrupt` unless both describe exactly the same chunks.
    pub fn from_parts(index: VectorIndex, store: ChunkStore) -> RagResult<Self> {
        let indexed: HashSet<&str> = index.chunk_refs().collect();
        if indexed.len() != index.len() {
            return Err(RagError::IndexCorrupt(
                "duplicate chunk references in index".to_string(),
            ));
        }
        if indexed.len() != store.chunks.len()
            || store.chunks.keys().any(|k| !indexed.contains(k.as_str()))
        {
            return Err(RagError::IndexCorrupt(format!(
                "index holds {} vectors but chunk store holds {} chunks",
                index.len(),
                store.chunks.len()
            )));
        }
        for doc in &store.documents {
            let n = store
                .chunks
                .values()
                .filter(|c| c.document_id == doc.id)
                .count();
            if n != doc.chunk_count {
                return Err(RagError::IndexCorrupt(format!(
                    "document {} records {} chunks, found {}",
                    doc.id, doc.chunk_count, n
                )));
            }
        }
        Ok(Self { index, store })
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            model: self.index.model().to_string(),
            dims: self.index.dims(),
            documents: self.store.documents.len(),
            vectors: self.index.len(),
        }
    }

    /// Add a whole document's chunks and vectors, or nothing.
    pub fn add_document(
        &mut self,
        record: DocumentRecord,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> RagResult<()> {
        if self.store.contains_document(&record.id) {
            return Err(RagError::InvalidArgument(format!(
                "document {} is already indexed",
                record.id
            )));
        }
        if let Some(stray) = chunks.iter().find(|c| c.document_id != record.id) {
            return Err(RagError::InvalidArgument(format!(
                "chunk {} does not belong to document {}",
                stray.id, record.id
            )));
        }
        let record = DocumentRecord {
            chunk_count: chunks.len(),
            ..record
        };

        self.index.add(chunks, vectors)?;
        self.store.insert_document(record, chunks);
        Ok(())
    }

    /// Undo the most recent [`add_document`](Self::add_document).
    pub fn rollback_document(&mut self, document_id: &str, previous_len: usize) {
        self.index.truncate(previous_len);
        self.store.remove_document(document_id);
    }

    /// Remove a document with all its chunks and vectors. Returns the
    /// number of vectors removed, or `None` if the document is unknown.
    pub fn remove_document(&mut self, document_id: &str) -> Option<usize> {
        if !self.store.remove_document(document_id) {
            return None;
        }
        Some(self.index.remove_document(document_id))
    }

    /// Search and resolve chunk references back to their text.
    pub fn search(&self, query: &[f32], k: usize) -> RagResult<Vec<RetrievedChunk>> {
        let hits = self.index.search(query, k)?;
        hits.into_iter()
            .map(|(chunk_ref, score)| {
                let chunk = self.store.get(&chunk_ref).ok_or_else(|| {
                    RagError::IndexCorrupt(format!("no chunk text for {}", chunk_ref))
                })?;
                Ok(RetrievedChunk {
                    chunk_ref,
                    document_id: chunk.document_id.clone(),
                    text: chunk.text.clone(),
                    score,
                })
            })
            .collect()
    }

    pub fn index_to_json(&self) -> RagResult<Vec<u8>> {
        serde_json::to_vec(&self.index.to_snapshot())
            .map_err(|e| RagError::Io(std::io::Error::other(e)))
    }

    pub fn store_to_json(&self) -> RagResult<Vec<u8>> {
        serde_json::to_vec_pretty(&self.store).map_err(|e| RagError::Io(std::io::Error::other(e)))
    }

    /// Decode both persisted artifacts and cross-check them.
    pub fn from_json(index_bytes: &[u8], store_bytes: &[u8]) -> RagResult<Self> {
        let snapshot: IndexSnapshot = serde_json::from_slice(index_bytes)
            .map_err(|e| RagError::IndexCorrupt(format!("unreadable index: {}", e)))?;
        let store: ChunkStore = serde_json::from_slice(store_bytes)
            .map_err(|e| RagError::IndexCorrupt(format!("unreadable chunk store: {}", e)))?;
        Self::from_parts(VectorIndex::from_snapshot(snapshot)?, store)
    }
}
