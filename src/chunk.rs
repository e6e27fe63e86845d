//! Token-window chunker, re-exported from `ragchat-core`.
//!
//! # Example
//!
//! ```rust
//! use ragchat::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-1", "Bananas are vegetables.", 20, 5).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].id, "doc-1:0");
//! ```

pub use ragchat_core::chunk::*;
