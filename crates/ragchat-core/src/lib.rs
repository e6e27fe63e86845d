//! # ragchat core
//!
//! Runtime-free logic for ragchat: data models, the error taxonomy,
//! token-window chunking, the embedder trait, the per-owner vector index
//! with its chunk-text store, and prompt assembly.
//!
//! This crate contains no tokio, filesystem I/O, or network clients. The
//! `ragchat` application crate wires these pieces to durable storage,
//! embedding backends, and language-model clients.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod prompt;

pub use error::{RagError, RagResult};
