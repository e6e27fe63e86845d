//! Conversation history.
//!
//! The query pipeline reads recent turns from a [`ConversationStore`] and
//! hands back each completed turn, with the chunk references that were in
//! its prompt, for the store to keep.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{RagError, RagResult};
use crate::models::Turn;
use crate::storage::{owner_key, Storage};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Up to `limit` most recent turns, oldest first.
    async fn recent_turns(&self, owner: &str, conversation: &str, limit: usize)
        -> RagResult<Vec<Turn>>;

    async fn record_turn(&self, owner: &str, conversation: &str, turn: Turn) -> RagResult<()>;
}

fn tail(mut turns: Vec<Turn>, limit: usize) -> Vec<Turn> {
    let start = turns.len().saturating_sub(limit);
    turns.drain(..start);
    turns
}

/// Process-local store, for tests and embedding in other services.
#[derive(Default)]
pub struct InMemoryConversationStore {
    turns: Mutex<HashMap<(String, String), Vec<Turn>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn recent_turns(
        &self,
        owner: &str,
        conversation: &str,
        limit: usize,
    ) -> RagResult<Vec<Turn>> {
        let turns = self.turns.lock().await;
        let all = turns
            .get(&(owner.to_string(), conversation.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(tail(all, limit))
    }

    async fn record_turn(&self, owner: &str, conversation: &str, turn: Turn) -> RagResult<()> {
        self.turns
            .lock()
            .await
            .entry((owner.to_string(), conversation.to_string()))
            .or_default()
            .push(turn);
        Ok(())
    }
}

/// One JSONL transcript per conversation under the owner's directory.
///
/// Conversation ids are hashed into file names the same way owners are.
pub struct FileConversationStore {
    storage: Storage,
    write_lock: Mutex<()>,
}

impl FileConversationStore {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    pub fn transcript_path(&self, owner: &str, conversation: &str) -> PathBuf {
        self.storage
            .conversations_dir(owner)
            .join(format!("{}.jsonl", owner_key(conversation)))
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn recent_turns(
        &self,
        owner: &str,
        conversation: &str,
        limit: usize,
    ) -> RagResult<Vec<Turn>> {
        let path = self.transcript_path(owner, conversation);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut turns = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Turn>(line) {
                Ok(turn) => turns.push(turn),
                // A torn final line from an interrupted append is skipped.
                Err(e) => warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "skipping unreadable transcript line"
                ),
            }
        }
        Ok(tail(turns, limit))
    }

    async fn record_turn(&self, owner: &str, conversation: &str, turn: Turn) -> RagResult<()> {
        let path = self.transcript_path(owner, conversation);
        let mut line = serde_json::to_string(&turn)
            .map_err(|e| RagError::Io(std::io::Error::other(e)))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
