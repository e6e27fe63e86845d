//! Prompt assembly, re-exported from `ragchat-core`.

pub use ragchat_core::prompt::*;
