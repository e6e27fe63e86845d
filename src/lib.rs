//! # ragchat
//!
//! Retrieval-augmented generation for document chat.
//!
//! Users upload documents; each document is split into overlapping
//! passages, embedded, and appended to a vector index owned by that user.
//! At query time the most similar passages are retrieved and combined with
//! recent conversation history and the question into one prompt for a
//! language model. Answers come back with the chunk references they were
//! built from.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌──────────────┐
//! │ Document │──▶│ Chunker │──▶│ Embedder │──▶│ OwnerIndexes │──▶ disk
//! └──────────┘   └─────────┘   └──────────┘   └──────┬───────┘
//!                                                    │ top-k
//! ┌──────────┐   ┌──────────┐   ┌────────────────┐   │
//! │  Query   │──▶│ Embedder │──▶│   Retriever    │◀──┘
//! └──────────┘   └──────────┘   └───────┬────────┘
//!                                       ▼
//!                 history ──▶ ┌──────────────────┐   ┌─────┐
//!                             │ PromptAssembler  │──▶│ LLM │──▶ answer + provenance
//!                             └──────────────────┘   └─────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Token-window chunking |
//! | [`embedding`] | Embedding backends and the serialized work queue |
//! | [`storage`] | Per-owner durable layout |
//! | [`indexes`] | Per-owner index registry with read/write locking |
//! | [`retrieve`] | Query embedding and top-k search |
//! | [`prompt`] | Prompt assembly under a length budget |
//! | [`llm`] | Language-model clients |
//! | [`conversation`] | Conversation history stores |
//! | [`ingest`] | Ingestion pipeline |
//! | [`query`] | Query pipeline |

pub mod chunk;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod indexes;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod query;
pub mod retrieve;
pub mod retry;
pub mod storage;
