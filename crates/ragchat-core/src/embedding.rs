//! Embedder trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! the deterministic offline [`HashingEmbedder`], and pure helpers for
//! similarity computation and vector serialization.
//!
//! Network and local-model backends (OpenAI, Ollama, fastembed) live in
//! the `ragchat` app crate.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::chunk::token_spans;
use crate::error::{RagError, RagResult};

/// Trait for embedding backends.
///
/// One instance (same model, same dimension) must serve both chunk and
/// query embedding for a given index. The index records
/// [`model_name`](Embedder::model_name) and [`dims`](Embedder::dims) so a
/// swapped backend is caught before any search.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, order preserved.
    ///
    /// Fails with `ModelUnavailable` when the model cannot be loaded or
    /// reached. Never substitutes placeholder vectors.
    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>>;

    /// Embed a single text (e.g. a query).
    async fn embed_one(&self, text: &str) -> RagResult<Vec<f32>> {
        let mut out = self.embed(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| RagError::ModelUnavailable("empty embedding response".to_string()))
    }
}

/// Check that a backend response has one vector of the right size per input.
pub fn check_embeddings(
    model: &str,
    dims: usize,
    inputs: usize,
    vectors: &[Vec<f32>],
) -> RagResult<()> {
    if vectors.len() != inputs {
        return Err(RagError::ModelUnavailable(format!(
            "{} returned {} embeddings for {} inputs",
            model,
            vectors.len(),
            inputs
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(RagError::ConfigMismatch(format!(
            "{} returned a {}-dimensional vector, configured dims is {}",
            model,
            bad.len(),
            dims
        )));
    }
    Ok(())
}

// ============ Hashing Embedder ============

/// Offline bag-of-words embedder using feature hashing.
///
/// Tokens are the chunker's whitespace tokens, lowercased and stripped of
/// surrounding punctuation. Each token contributes its term frequency to
/// three FNV-1a hashed buckets; the result is L2-normalised. Deterministic
/// and dependency-free, which makes it the default for tests and for
/// installs without an embedding service.
pub struct HashingEmbedder {
    model: String,
    dims: usize,
}

impl HashingEmbedder {
    pub const MODEL_NAME: &'static str = "hashing-v1";

    pub fn new(dims: usize) -> Self {
        Self {
            model: Self::MODEL_NAME.to_string(),
            dims: dims.max(1),
        }
    }

    /// Embed synchronously; the async trait method delegates here.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];

        let words: Vec<String> = token_spans(text)
            .into_iter()
            .map(|(s, e)| normalize_token(&text[s..e]))
            .filter(|w| !w.is_empty())
            .collect();

        if words.is_empty() {
            return vector;
        }

        let total = words.len() as f32;
        let mut freq: Vec<(&str, f32)> = Vec::new();
        for word in &words {
            match freq.iter_mut().find(|(w, _)| *w == word.as_str()) {
                Some((_, count)) => *count += 1.0,
                None => freq.push((word.as_str(), 1.0)),
            }
        }

        for (word, count) in &freq {
            let tf = count / total;
            let bytes = word.as_bytes();
            let h1 = fnv1a(bytes) as usize;
            let h2 = fnv1a(&[bytes, &[1u8]].concat()) as usize;
            let h3 = fnv1a(&[bytes, &[2u8]].concat()) as usize;

            vector[h1 % self.dims] += tf;
            vector[h2 % self.dims] += tf * 0.7;
            vector[h3 % self.dims] += tf * 0.5;
        }

        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn normalize_token(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// FNV-1a, 32-bit.
fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

// ============ Vector utilities ============

/// Scale `v` to unit length in place. Zero vectors are left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product of two equal-length vectors; `0.0` on length mismatch.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, or zero vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Encode a float vector as little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes. Trailing bytes that do not form a
/// whole `f32` are ignored; callers check the resulting length.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Encode a vector as base64 text for JSON persistence (bit-exact).
pub fn encode_vector(vec: &[f32]) -> String {
    STANDARD.encode(vec_to_blob(vec))
}

/// Decode a vector written by [`encode_vector`], checking its dimension.
pub fn decode_vector(encoded: &str, dims: usize) -> RagResult<Vec<f32>> {
    let blob = STANDARD
        .decode(encoded)
        .map_err(|e| RagError::IndexCorrupt(format!("invalid vector encoding: {}", e)))?;
    if blob.len() != dims * 4 {
        return Err(RagError::IndexCorrupt(format!(
            "vector has {} bytes, expected {}",
            blob.len(),
            dims * 4
        )));
    }
    Ok(blob_to_vec(&blob))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001, f32::MIN_POSITIVE];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
        assert_eq!(decode_vector(&encode_vector(&vec), 6).unwrap(), vec);
    }

    #[test]
    fn test_decode_wrong_dims_is_corrupt() {
        let encoded = encode_vector(&[1.0, 2.0]);
        assert!(matches!(
            decode_vector(&encoded, 3),
            Err(RagError::IndexCorrupt(_))
        ));
        assert!(matches!(
            decode_vector("not base64!!", 2),
            Err(RagError::IndexCorrupt(_))
        ));
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_check_embeddings() {
        let ok = vec![vec![0.0; 4], vec![1.0; 4]];
        assert!(check_embeddings("m", 4, 2, &ok).is_ok());
        assert!(matches!(
            check_embeddings("m", 4, 3, &ok),
            Err(RagError::ModelUnavailable(_))
        ));
        assert!(matches!(
            check_embeddings("m", 8, 2, &ok),
            Err(RagError::ConfigMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_hashing_dimension_and_norm() {
        let emb = HashingEmbedder::new(128);
        assert_eq!(emb.dims(), 128);
        let v = emb.embed_one("the quick brown fox jumps").await.unwrap();
        assert_eq!(v.len(), 128);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_hashing_order_preserved() {
        let emb = HashingEmbedder::default();
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let batch = emb.embed(&texts).await.unwrap();
        assert_eq!(batch[0], emb.embed_text("alpha"));
        assert_eq!(batch[1], emb.embed_text("beta"));
    }

    #[test]
    fn test_hashing_ignores_case_and_punctuation() {
        let emb = HashingEmbedder::default();
        assert_eq!(emb.embed_text("Bananas?"), emb.embed_text("bananas"));
    }

    #[test]
    fn test_hashing_similar_texts() {
        let emb = HashingEmbedder::default();
        let v1 = emb.embed_text("rust programming language");
        let v2 = emb.embed_text("rust programming systems");
        let v3 = emb.embed_text("cooking recipes for dinner");
        assert!(cosine_similarity(&v1, &v2) > cosine_similarity(&v1, &v3));
    }

    #[test]
    fn test_hashing_empty_text_is_zero() {
        let emb = HashingEmbedder::new(16);
        assert!(emb.embed_text("  ").iter().all(|x| *x == 0.0));
    }
}
