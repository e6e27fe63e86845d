//! Registry of per-owner indexes.
//!
//! Every owner has an independent [`OwnerIndex`] behind its own
//! [`RwLock`]: searches on one owner share the read lock, while adds,
//! removals and resets take the write lock, so a search never sees a
//! half-applied change. Different owners never contend.
//!
//! Indexes are loaded from [`Storage`] on first access and written back
//! after every mutation. A mutation whose persist fails is undone in memory
//! so memory and disk keep describing the same chunks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{info, warn};

use crate::error::RagResult;
use crate::models::{Chunk, DocumentRecord, RetrievedChunk};
use crate::storage::Storage;
use ragchat_core::index::{IndexStats, OwnerIndex};

#[derive(Default)]
struct OwnerSlot {
    loaded: bool,
    index: Option<OwnerIndex>,
}

pub struct OwnerIndexes {
    storage: Storage,
    owners: Mutex<HashMap<String, Arc<RwLock<OwnerSlot>>>>,
}

impl OwnerIndexes {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            owners: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    async fn slot(&self, owner: &str) -> Arc<RwLock<OwnerSlot>> {
        let mut owners = self.owners.lock().await;
        owners
            .entry(owner.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(OwnerSlot::default())))
            .clone()
    }

    async fn write(&self, owner: &str) -> RagResult<OwnedRwLockWriteGuard<OwnerSlot>> {
        let slot = self.slot(owner).await;
        let mut guard = slot.write_owned().await;
        if !guard.loaded {
            guard.index = self.storage.load(owner).await?;
            guard.loaded = true;
        }
        Ok(guard)
    }

    /// Forget an owner's slot when it holds nothing and nobody else has it.
    ///
    /// Every slot is handed out under the `owners` mutex, so a strong count
    /// of one while holding that mutex means no guard or clone is live.
    async fn release_if_empty(&self, owner: &str) {
        let mut owners = self.owners.lock().await;
        let empty = owners.get(owner).is_some_and(|slot| {
            Arc::strong_count(slot) == 1
                && slot
                    .try_read()
                    .map(|guard| guard.index.is_none())
                    .unwrap_or(false)
        });
        if empty {
            owners.remove(owner);
        }
    }

    /// Run `f` under the owner's read lock, then drop the slot if empty.
    async fn inspect<T>(
        &self,
        owner: &str,
        f: impl FnOnce(&OwnerSlot) -> RagResult<T>,
    ) -> RagResult<T> {
        let result = match self.read(owner).await {
            Ok(guard) => f(&guard),
            Err(e) => Err(e),
        };
        self.release_if_empty(owner).await;
        result
    }

    async fn read(&self, owner: &str) -> RagResult<OwnedRwLockReadGuard<OwnerSlot>> {
        let slot = self.slot(owner).await;
        {
            let guard = slot.clone().read_owned().await;
            if guard.loaded {
                return Ok(guard);
            }
        }
        drop(self.write(owner).await?);
        Ok(slot.read_owned().await)
    }

    /// Append one document's chunks and vectors and persist, as one unit.
    ///
    /// The owner's index is created on first upload with the given model
    /// identity. An existing index with a different model or dimension is
    /// a `ConfigMismatch`.
    pub async fn add_document(
        &self,
        owner: &str,
        model: &str,
        dims: usize,
        record: DocumentRecord,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> RagResult<IndexStats> {
        let mut slot = self.write(owner).await?;
        let created = slot.index.is_none();
        let index = slot
            .index
            .get_or_insert_with(|| OwnerIndex::new(model, dims));
        index.index().check_compatible(model, dims)?;

        let document_id = record.id.clone();
        let previous_len = index.index().len();
        if let Err(e) = index.add_document(record, chunks, vectors) {
            if created {
                slot.index = None;
            }
            return Err(e);
        }

        if let Err(e) = self.storage.persist(owner, index).await {
            warn!(owner, document_id = %document_id, error = %e, "persist failed, rolling back");
            index.rollback_document(&document_id, previous_len);
            let restored = if created {
                slot.index = None;
                self.storage.remove_index(owner).await
            } else {
                self.storage.persist(owner, index).await
            };
            if let Err(restore_err) = restored {
                warn!(owner, error = %restore_err, "could not restore persisted index");
            }
            return Err(e);
        }

        let stats = index.stats();
        info!(
            owner,
            document_id = %document_id,
            chunks = chunks.len(),
            vectors = stats.vectors,
            "document indexed"
        );
        Ok(stats)
    }

    /// Nearest chunks to `query`. An owner without an index yields an
    /// empty result.
    pub async fn search(
        &self,
        owner: &str,
        model: &str,
        query: &[f32],
        k: usize,
    ) -> RagResult<Vec<RetrievedChunk>> {
        self.inspect(owner, |slot| match &slot.index {
            Some(index) => {
                index.index().check_compatible(model, query.len())?;
                index.search(query, k)
            }
            None => Ok(Vec::new()),
        })
        .await
    }

    /// Remove a document and persist. Returns the number of vectors
    /// removed, or `None` if the owner has no such document.
    pub async fn remove_document(&self, owner: &str, document_id: &str) -> RagResult<Option<usize>> {
        let mut slot = self.write(owner).await?;
        let Some(index) = slot.index.as_mut() else {
            return Ok(None);
        };
        if !index.store().contains_document(document_id) {
            return Ok(None);
        }
        let before = index.clone();
        let removed = index.remove_document(document_id).unwrap_or_default();

        if let Err(e) = self.storage.persist(owner, index).await {
            *index = before;
            return Err(e);
        }
        info!(owner, document_id, vectors_removed = removed, "document removed");
        Ok(Some(removed))
    }

    /// Write the owner's current in-memory index to storage.
    pub async fn persist(&self, owner: &str) -> RagResult<()> {
        let result = match self.read(owner).await {
            Ok(slot) => match &slot.index {
                Some(index) => self.storage.persist(owner, index).await,
                None => Ok(()),
            },
            Err(e) => Err(e),
        };
        self.release_if_empty(owner).await;
        result
    }

    /// Discard the in-memory state and reload it from storage.
    pub async fn load(&self, owner: &str) -> RagResult<Option<IndexStats>> {
        let result = {
            let mut guard = self.slot(owner).await.write_owned().await;
            guard.loaded = false;
            guard.index = None;
            self.storage.load(owner).await.map(|loaded| {
                let stats = loaded.as_ref().map(OwnerIndex::stats);
                guard.index = loaded;
                guard.loaded = true;
                stats
            })
        };
        self.release_if_empty(owner).await;
        result
    }

    /// Delete the owner's index, chunk store and conversations.
    pub async fn reset(&self, owner: &str) -> RagResult<bool> {
        let existed = {
            let mut guard = self.slot(owner).await.write_owned().await;
            let existed = self.storage.remove_owner(owner).await?;
            guard.index = None;
            guard.loaded = true;
            existed
        };
        self.release_if_empty(owner).await;
        info!(owner, existed, "owner reset");
        Ok(existed)
    }

    pub async fn documents(&self, owner: &str) -> RagResult<Vec<DocumentRecord>> {
        self.inspect(owner, |slot| {
            Ok(slot
                .index
                .as_ref()
                .map(|i| i.store().documents().to_vec())
                .unwrap_or_default())
        })
        .await
    }

    pub async fn stats(&self, owner: &str) -> RagResult<Option<IndexStats>> {
        self.inspect(owner, |slot| Ok(slot.index.as_ref().map(OwnerIndex::stats)))
            .await
    }

    /// A copy of the owner's current index, for inspection.
    pub async fn snapshot(&self, owner: &str) -> RagResult<Option<OwnerIndex>> {
        self.inspect(owner, |slot| Ok(slot.index.clone())).await
    }

    /// Number of owners currently held in memory.
    pub async fn cached_owners(&self) -> usize {
        self.owners.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ConversationStore, FileConversationStore};
    use crate::error::RagError;
    use crate::models::Turn;
    use chrono::Utc;
    use ragchat_core::chunk::chunk_text;
    use ragchat_core::embedding::HashingEmbedder;
    use tempfile::TempDir;

    fn doc(id: &str, text: &str) -> (DocumentRecord, Vec<Chunk>, Vec<Vec<f32>>) {
        let embedder = HashingEmbedder::new(32);
        let chunks = chunk_text(id, text, 4, 1).unwrap();
        let vectors = chunks.iter().map(|c| embedder.embed_text(&c.text)).collect();
        let record = DocumentRecord {
            id: id.to_string(),
            title: None,
            created_at: Utc::now(),
            chunk_count: 0,
        };
        (record, chunks, vectors)
    }

    async fn add(indexes: &OwnerIndexes, owner: &str, id: &str, text: &str) -> RagResult<IndexStats> {
        let (record, chunks, vectors) = doc(id, text);
        indexes
            .add_document(owner, "hashing-v1", 32, record, &chunks, &vectors)
            .await
    }

    #[tokio::test]
    async fn test_unknown_owner_is_empty() {
        let tmp = TempDir::new().unwrap();
        let indexes = OwnerIndexes::new(Storage::new(tmp.path()));
        let hits = indexes.search("ghost", "hashing-v1", &[0.0; 32], 3).await.unwrap();
        assert!(hits.is_empty());
        assert!(indexes.stats("ghost").await.unwrap().is_none());
        assert!(indexes.documents("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_owners_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let indexes = OwnerIndexes::new(Storage::new(tmp.path()));
        add(&indexes, "alice", "a1", "alpha beta gamma delta epsilon").await.unwrap();
        add(&indexes, "bob", "b1", "one two three").await.unwrap();

        let alice = indexes.documents("alice").await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].id, "a1");
        assert_eq!(alice[0].chunk_count, 2);

        let q = HashingEmbedder::new(32).embed_text("one two three");
        let hits = indexes.search("alice", "hashing-v1", &q, 10).await.unwrap();
        assert!(hits.iter().all(|h| h.document_id == "a1"));
    }

    #[tokio::test]
    async fn test_lazy_load_from_disk() {
        let tmp = TempDir::new().unwrap();
        {
            let indexes = OwnerIndexes::new(Storage::new(tmp.path()));
            add(&indexes, "alice", "a1", "alpha beta gamma").await.unwrap();
        }
        let reopened = OwnerIndexes::new(Storage::new(tmp.path()));
        let stats = reopened.stats("alice").await.unwrap().unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.model, "hashing-v1");
    }

    #[tokio::test]
    async fn test_model_mismatch_rejected() {
        let tmp = TempDir::new().unwrap();
        let indexes = OwnerIndexes::new(Storage::new(tmp.path()));
        add(&indexes, "alice", "a1", "alpha beta gamma").await.unwrap();

        let (record, chunks, vectors) = doc("a2", "more words here");
        let err = indexes
            .add_document("alice", "other-model", 32, record, &chunks, &vectors)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::ConfigMismatch(_)));

        let err = indexes
            .search("alice", "other-model", &[0.0; 32], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::ConfigMismatch(_)));
    }

    #[tokio::test]
    async fn test_persist_failure_rolls_back() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        let indexes = OwnerIndexes::new(storage.clone());
        add(&indexes, "alice", "a1", "alpha beta gamma").await.unwrap();

        // A directory where the chunk store file belongs makes the rename fail.
        let chunks_path = storage.owner_dir("alice").join(crate::storage::CHUNKS_FILE);
        std::fs::remove_file(&chunks_path).unwrap();
        std::fs::create_dir(&chunks_path).unwrap();

        assert!(add(&indexes, "alice", "a2", "delta epsilon zeta").await.is_err());
        let docs = indexes.documents("alice").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "a1");
        let snapshot = indexes.snapshot("alice").await.unwrap().unwrap();
        assert!(snapshot.index().chunk_refs().all(|r| r.starts_with("a1:")));
    }

    /// A directory where the index temp file goes makes the second write of
    /// a persist fail after the chunk store was already written.
    fn block_index_write(storage: &Storage, owner: &str) {
        let dir = storage.owner_dir(owner);
        std::fs::create_dir_all(dir.join("index.tmp")).unwrap();
    }

    #[tokio::test]
    async fn test_failed_first_upload_leaves_no_index() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        let indexes = OwnerIndexes::new(storage.clone());
        block_index_write(&storage, "alice");

        assert!(add(&indexes, "alice", "a1", "alpha beta").await.is_err());
        assert!(indexes.stats("alice").await.unwrap().is_none());
        assert!(!storage.owner_dir("alice").join(crate::storage::CHUNKS_FILE).exists());
    }

    #[tokio::test]
    async fn test_failed_first_upload_keeps_conversations() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        let indexes = OwnerIndexes::new(storage.clone());
        let conversations = FileConversationStore::new(storage.clone());
        conversations
            .record_turn(
                "alice",
                "c1",
                Turn {
                    query: "What are bananas?".to_string(),
                    response: Some("Vegetables.".to_string()),
                    timestamp: Utc::now(),
                    provenance: Vec::new(),
                },
            )
            .await
            .unwrap();
        block_index_write(&storage, "alice");

        assert!(add(&indexes, "alice", "a1", "alpha beta").await.is_err());
        let turns = conversations.recent_turns("alice", "c1", 10).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].query, "What are bananas?");
        assert!(indexes.stats("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookups_of_empty_owners_are_not_retained() {
        let tmp = TempDir::new().unwrap();
        let indexes = OwnerIndexes::new(Storage::new(tmp.path()));
        for i in 0..50 {
            let owner = format!("ghost-{}", i);
            indexes.search(&owner, "hashing-v1", &[0.0; 32], 3).await.unwrap();
            indexes.documents(&owner).await.unwrap();
            indexes.stats(&owner).await.unwrap();
        }
        assert_eq!(indexes.cached_owners().await, 0);

        add(&indexes, "alice", "a1", "alpha beta gamma").await.unwrap();
        assert_eq!(indexes.cached_owners().await, 1);
        assert!(indexes.reset("alice").await.unwrap());
        assert_eq!(indexes.cached_owners().await, 0);
        assert!(indexes.stats("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_and_reset() {
        let tmp = TempDir::new().unwrap();
        let indexes = OwnerIndexes::new(Storage::new(tmp.path()));
        add(&indexes, "alice", "a1", "alpha beta gamma").await.unwrap();
        add(&indexes, "alice", "a2", "delta epsilon zeta eta theta").await.unwrap();

        assert_eq!(indexes.remove_document("alice", "a1").await.unwrap(), Some(1));
        assert_eq!(indexes.remove_document("alice", "a1").await.unwrap(), None);
        let reloaded = indexes.load("alice").await.unwrap().unwrap();
        assert_eq!(reloaded.documents, 1);
        assert_eq!(reloaded.vectors, 2);

        assert!(indexes.reset("alice").await.unwrap());
        assert!(indexes.stats("alice").await.unwrap().is_none());
        assert!(!indexes.storage().owner_dir("alice").exists());
    }
}
