//! Durable per-owner storage.
//!
//! Each owner gets one directory under the storage root:
//!
//! ```text
//! {root}/owners/{sha256(owner)[..32]}/
//!     index.json          vectors, model identity, dimension, checksum
//!     chunks.json         documents and chunk texts
//!     conversations/      one JSONL transcript per conversation
//! ```
//!
//! The directory name is a hash so arbitrary owner identifiers cannot
//! escape the root. Deleting the directory is a full reset.

use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{RagError, RagResult};
use ragchat_core::index::OwnerIndex;

pub const INDEX_FILE: &str = "index.json";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const CONVERSATIONS_DIR: &str = "conversations";

/// Stable directory key for an owner identifier.
pub fn owner_key(owner: &str) -> String {
    let digest = Sha256::digest(owner.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..32].to_string()
}

/// Write `data` to a `.tmp` sibling, then rename over `path`.
pub async fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn owner_dir(&self, owner: &str) -> PathBuf {
        self.root.join("owners").join(owner_key(owner))
    }

    pub fn conversations_dir(&self, owner: &str) -> PathBuf {
        self.owner_dir(owner).join(CONVERSATIONS_DIR)
    }

    /// Load an owner's index and chunk store.
    ///
    /// Returns `None` when neither file exists. One file without the
    /// other, or any decoding failure, is `IndexCorrupt`.
    pub async fn load(&self, owner: &str) -> RagResult<Option<OwnerIndex>> {
        let dir = self.owner_dir(owner);
        let index = read_optional(&dir.join(INDEX_FILE)).await?;
        let chunks = read_optional(&dir.join(CHUNKS_FILE)).await?;

        match (index, chunks) {
            (None, None) => {
                debug!(owner, "no persisted index");
                Ok(None)
            }
            (Some(index), Some(chunks)) => {
                let loaded = OwnerIndex::from_json(&index, &chunks)?;
                debug!(owner, vectors = loaded.index().len(), "index loaded");
                Ok(Some(loaded))
            }
            (Some(_), None) => Err(RagError::IndexCorrupt(format!(
                "{} present without {} in {}",
                INDEX_FILE,
                CHUNKS_FILE,
                dir.display()
            ))),
            (None, Some(_)) => Err(RagError::IndexCorrupt(format!(
                "{} present without {} in {}",
                CHUNKS_FILE,
                INDEX_FILE,
                dir.display()
            ))),
        }
    }

    /// Write both artifacts. The chunk store goes first so a crash in
    /// between leaves a mismatch that `load` reports instead of hiding.
    pub async fn persist(&self, owner: &str, index: &OwnerIndex) -> RagResult<()> {
        let dir = self.owner_dir(owner);
        atomic_write(&dir.join(CHUNKS_FILE), &index.store_to_json()?).await?;
        atomic_write(&dir.join(INDEX_FILE), &index.index_to_json()?).await?;
        debug!(owner, vectors = index.index().len(), "index persisted");
        Ok(())
    }

    /// Delete the index and chunk store, plus any leftover `.tmp` files,
    /// and nothing else. Conversations survive.
    pub async fn remove_index(&self, owner: &str) -> RagResult<()> {
        let dir = self.owner_dir(owner);
        for name in [INDEX_FILE, CHUNKS_FILE] {
            let path = dir.join(name);
            for candidate in [path.with_extension("tmp"), path] {
                match tokio::fs::symlink_metadata(&candidate).await {
                    Ok(meta) if meta.is_file() => tokio::fs::remove_file(&candidate).await?,
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        debug!(owner, "index files removed");
        Ok(())
    }

    /// Delete everything stored for an owner. Returns whether anything
    /// was there.
    pub async fn remove_owner(&self, owner: &str) -> RagResult<bool> {
        match tokio::fs::remove_dir_all(self.owner_dir(owner)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ragchat_core::chunk::chunk_text;
    use ragchat_core::embedding::{Embedder, HashingEmbedder};
    use ragchat_core::models::DocumentRecord;
    use tempfile::TempDir;

    fn sample_index() -> OwnerIndex {
        let embedder = HashingEmbedder::new(16);
        let chunks = chunk_text("doc", "one two three four five six", 3, 1).unwrap();
        let vectors: Vec<Vec<f32>> = chunks.iter().map(|c| embedder.embed_text(&c.text)).collect();
        let mut idx = OwnerIndex::new(embedder.model_name(), embedder.dims());
        idx.add_document(
            DocumentRecord {
                id: "doc".to_string(),
                title: Some("Sample".to_string()),
                created_at: Utc::now(),
                chunk_count: 0,
            },
            &chunks,
            &vectors,
        )
        .unwrap();
        idx
    }

    #[test]
    fn test_owner_key_is_stable_and_safe() {
        let a = owner_key("../../etc/passwd");
        assert_eq!(a, owner_key("../../etc/passwd"));
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, owner_key("alice"));
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        assert!(storage.load("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persist_then_load() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        let idx = sample_index();
        storage.persist("alice", &idx).await.unwrap();

        let loaded = storage.load("alice").await.unwrap().unwrap();
        assert_eq!(loaded.stats(), idx.stats());
        assert_eq!(loaded.store().documents(), idx.store().documents());
        assert!(!storage.owner_dir("alice").join("index.tmp").exists());
    }

    #[tokio::test]
    async fn test_half_written_owner_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        storage.persist("alice", &sample_index()).await.unwrap();
        std::fs::remove_file(storage.owner_dir("alice").join(CHUNKS_FILE)).unwrap();

        assert!(matches!(
            storage.load("alice").await,
            Err(RagError::IndexCorrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        storage.persist("alice", &sample_index()).await.unwrap();
        std::fs::write(storage.owner_dir("alice").join(INDEX_FILE), b"{not json").unwrap();

        assert!(matches!(
            storage.load("alice").await,
            Err(RagError::IndexCorrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_index_keeps_conversations() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        storage.persist("alice", &sample_index()).await.unwrap();
        let conversations = storage.conversations_dir("alice");
        std::fs::create_dir_all(&conversations).unwrap();
        std::fs::write(conversations.join("c1.jsonl"), b"{}\n").unwrap();
        std::fs::write(storage.owner_dir("alice").join("chunks.tmp"), b"partial").unwrap();

        storage.remove_index("alice").await.unwrap();
        assert!(storage.load("alice").await.unwrap().is_none());
        assert!(!storage.owner_dir("alice").join("chunks.tmp").exists());
        assert!(conversations.join("c1.jsonl").exists());

        // Nothing left to remove is not an error.
        storage.remove_index("alice").await.unwrap();
        storage.remove_index("nobody").await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_owner() {
        let tmp = TempDir::new().unwrap();
        let storage = Storage::new(tmp.path());
        storage.persist("alice", &sample_index()).await.unwrap();

        assert!(storage.remove_owner("alice").await.unwrap());
        assert!(!storage.owner_dir("alice").exists());
        assert!(!storage.remove_owner("alice").await.unwrap());
    }
}
