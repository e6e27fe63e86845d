//! Core data types, re-exported from `ragchat-core`.

pub use ragchat_core::models::*;
