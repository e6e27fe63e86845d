//! Query pipeline orchestration.
//!
//! Retrieve top-k → assemble the prompt → call the language model → return
//! the completion with the chunk references that were actually in the
//! prompt. Failures leave indexes and conversation history untouched.
//!
//! A pipeline built without a language model can still [`prepare`] prompts.
//!
//! [`prepare`]: QueryPipeline::prepare

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::conversation::ConversationStore;
use crate::error::{RagError, RagResult};
use crate::llm::{GenerationConfig, LlmClient};
use crate::models::{RetrievedChunk, Turn};
use crate::prompt::{AssembledPrompt, PromptAssembler};
use crate::retrieve::Retriever;
use crate::retry::with_timeout;

/// Completion plus provenance for one query.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub completion: String,
    /// Chunk references placed in the prompt, highest similarity first.
    pub provenance: Vec<String>,
    #[serde(skip)]
    pub prompt: AssembledPrompt,
}

/// Retrieval results and the prompt built from them, before generation.
#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub retrieved: Vec<RetrievedChunk>,
    pub prompt: AssembledPrompt,
}

#[derive(Clone)]
pub struct QueryPipeline {
    retriever: Retriever,
    llm: Option<Arc<dyn LlmClient>>,
    assembler: PromptAssembler,
    generation: GenerationConfig,
    preamble: String,
    max_length: usize,
    top_k: usize,
    history_turns: usize,
    timeout: Duration,
}

impl QueryPipeline {
    pub fn new(retriever: Retriever, config: &Config) -> Self {
        Self {
            retriever,
            llm: None,
            assembler: PromptAssembler::new(config.prompt.history_turns),
            generation: GenerationConfig::from(&config.llm),
            preamble: config.prompt.preamble.clone(),
            max_length: config.prompt.max_length,
            top_k: config.retrieval.top_k,
            history_turns: config.prompt.history_turns,
            timeout: Duration::from_secs(config.llm.timeout_secs),
        }
    }

    /// Language model used by [`answer`](Self::answer) and [`chat`](Self::chat).
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Override the number of chunks retrieved per query.
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retrieve and assemble without calling the model.
    pub async fn prepare(&self, owner: &str, query: &str, history: &[Turn]) -> RagResult<PreparedPrompt> {
        let retrieved = self.retriever.retrieve(owner, query, self.top_k).await?;
        let prompt = self.assembler.assemble(
            &self.preamble,
            &retrieved,
            history,
            query,
            self.max_length,
        )?;
        debug!(
            owner,
            chars = prompt.text.chars().count(),
            chunks = prompt.chunks_used.len(),
            turns = prompt.turns_used,
            "prompt assembled"
        );
        Ok(PreparedPrompt { retrieved, prompt })
    }

    pub async fn answer(&self, owner: &str, query: &str, history: &[Turn]) -> RagResult<Answer> {
        let llm = self.llm.as_ref().ok_or_else(|| {
            RagError::InvalidArgument("no language model configured".to_string())
        })?;
        let prepared = self.prepare(owner, query, history).await?;
        let completion = with_timeout(
            self.timeout,
            llm.complete(&prepared.prompt.text, &self.generation),
        )
        .await?;

        info!(
            owner,
            model = llm.model_name(),
            provenance = prepared.prompt.chunks_used.len(),
            "answered"
        );
        Ok(Answer {
            completion,
            provenance: prepared.prompt.chunks_used.clone(),
            prompt: prepared.prompt,
        })
    }

    /// Answer within a stored conversation and record the new turn.
    pub async fn chat(
        &self,
        store: &dyn ConversationStore,
        owner: &str,
        conversation: &str,
        query: &str,
    ) -> RagResult<Answer> {
        let history = store
            .recent_turns(owner, conversation, self.history_turns)
            .await?;
        let answer = self.answer(owner, query, &history).await?;
        store
            .record_turn(
                owner,
                conversation,
                Turn {
                    query: query.to_string(),
                    response: Some(answer.completion.clone()),
                    timestamp: Utc::now(),
                    provenance: answer.provenance.clone(),
                },
            )
            .await?;
        Ok(answer)
    }
}
