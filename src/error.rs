//! Error taxonomy, re-exported from `ragchat-core`.

pub use ragchat_core::error::*;
