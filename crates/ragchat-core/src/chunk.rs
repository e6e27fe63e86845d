//! Overlapping token-window chunker.
//!
//! Splits document text into [`Chunk`]s of `chunk_size` tokens, advancing
//! `chunk_size - overlap` tokens per step so consecutive chunks share
//! `overlap` tokens. A token is a maximal run of non-whitespace characters
//! (Unicode `White_Space`), which is also the unit the hashing embedder
//! consumes.
//!
//! Each chunk's text is the exact slice of the source between its first and
//! last token, so original spacing and punctuation survive. Chunk references
//! are derived from the document id and position, and each chunk carries a
//! SHA-256 of its text.
//!
//! # Example
//!
//! ```rust
//! use ragchat_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-1", "one two three four five", 3, 1).unwrap();
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].text, "one two three");
//! assert_eq!(chunks[1].text, "three four five");
//! ```

use sha2::{Digest, Sha256};

use crate::error::{RagError, RagResult};
use crate::models::{chunk_ref, Chunk};

/// Byte spans `(start, end)` of every whitespace-delimited token in `text`.
pub fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }

    spans
}

/// Split `text` into windows of `chunk_size` tokens overlapping by `overlap`.
///
/// # Guarantees
///
/// - Empty or whitespace-only text yields an empty vector.
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - The final window may be shorter than `chunk_size` and is always emitted.
/// - Output depends only on the inputs.
///
/// # Errors
///
/// `InvalidArgument` when `chunk_size == 0` or `overlap >= chunk_size`.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> RagResult<Vec<Chunk>> {
    if chunk_size == 0 {
        return Err(RagError::InvalidArgument(
            "chunk_size must be > 0".to_string(),
        ));
    }
    if overlap >= chunk_size {
        return Err(RagError::InvalidArgument(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }

    let spans = token_spans(text);
    if spans.is_empty() {
        return Ok(Vec::new());
    }

    let step = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut token_start = 0;

    loop {
        let token_end = (token_start + chunk_size).min(spans.len());
        let start = spans[token_start].0;
        let end = spans[token_end - 1].1;
        chunks.push(make_chunk(
            document_id,
            chunks.len(),
            text,
            (start, end),
            (token_start, token_end),
        ));
        if token_end == spans.len() {
            break;
        }
        token_start += step;
    }

    Ok(chunks)
}

/// Rebuild the token-covered span of a document from its chunks.
///
/// Overlapping regions are emitted once. When chunks were produced without
/// overlap the whitespace between them is not part of any chunk and is
/// replaced by a single space.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered_to: Option<usize> = None;

    for c in chunks {
        match covered_to {
            None => out.push_str(&c.text),
            Some(prev_end) if c.start >= prev_end => {
                out.push(' ');
                out.push_str(&c.text);
            }
            Some(prev_end) => {
                let skip = (prev_end - c.start).min(c.text.len());
                out.push_str(&c.text[skip..]);
            }
        }
        covered_to = Some(c.end);
    }

    out
}

fn make_chunk(
    document_id: &str,
    index: usize,
    text: &str,
    (start, end): (usize, usize),
    (token_start, token_end): (usize, usize),
) -> Chunk {
    let piece = &text[start..end];
    let mut hasher = Sha256::new();
    hasher.update(piece.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_ref(document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: piece.to_string(),
        start,
        end,
        token_start,
        token_end,
        hash,
    }
}
