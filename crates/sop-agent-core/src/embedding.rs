//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, the deterministic [`HashingEmbedder`], and pure helper
//! functions for vector serialization and similarity computation.
//!
//! Network-backed providers (OpenAI, Azure OpenAI, Ollama, fastembed)
//! live in the `sop-agent` app crate.

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality, or `0` when it is only
    /// known after the first response.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let results = provider.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

// ============ Hashing Embedder ============

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "at", "be", "can", "do", "does", "for", "from", "how", "i", "if",
    "in", "is", "it", "me", "my", "of", "on", "or", "our", "the", "this", "to", "we", "what",
    "when", "with", "you", "your",
];

/// Offline embedder: a signed, feature-hashed bag of normalized words.
///
/// Deterministic across runs and platforms, so it is suitable for tests
/// and air-gapped deployments. Similarity reflects shared vocabulary only.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub const MODEL_NAME: &'static str = "hashing-bow";

    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            bail!("hashing embedder needs dims > 0");
        }
        Ok(Self { dims })
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let h = fnv1a(token.as_bytes());
            let slot = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Lowercased word tokens with stopwords removed and plurals folded.
///
/// Hyphenated words yield the whole word plus its parts, so `walk-ins`
/// produces `walk-in` and `walk`.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for raw in text.split(|c: char| !(c.is_alphanumeric() || c == '-')) {
        let word = raw.trim_matches('-').to_lowercase();
        if word.is_empty() {
            continue;
        }
        if word.contains('-') {
            for part in word.split('-') {
                push_token(&mut tokens, part);
            }
        }
        push_token(&mut tokens, &word);
    }
    tokens
}

fn push_token(tokens: &mut Vec<String>, word: &str) {
    if word.is_empty() || STOPWORDS.contains(&word) {
        return;
    }
    let folded = if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        &word[..word.len() - 1]
    } else {
        word
    };
    tokens.push(folded.to_string());
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

// ============ Vector Utilities ============

/// Encode a float vector as little-endian f32 bytes.
///
/// # Example
///
/// ```rust
/// use sop_agent_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or
/// vectors of different lengths.
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

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn tokenizer_folds_plurals_and_hyphens() {
        let tokens = tokenize("Do you accept Walk-ins?");
        assert_eq!(tokens, vec!["accept", "walk", "ins", "walk-in"]);
    }

    #[test]
    fn hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let a = embedder.embed_one("late arrival policy");
        let b = embedder.embed_one("late arrival policy");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashing_embedder_ranks_shared_vocabulary_higher() {
        let embedder = HashingEmbedder::new(384).unwrap();
        let doc = embedder.embed_one("Walk-in patients are welcome without an appointment.");
        let related = embedder.embed_one("Do you accept walk-ins?");
        let unrelated = embedder.embed_one("what is the capital of France");
        assert!(cosine_similarity(&doc, &related) > cosine_similarity(&doc, &unrelated));
    }

    #[test]
    fn zero_dims_rejected() {
        assert!(HashingEmbedder::new(0).is_err());
    }

    #[tokio::test]
    async fn embed_query_returns_single_vector() {
        let embedder = HashingEmbedder::new(16).unwrap();
        let v = embed_query(&embedder, "hold").await.unwrap();
        assert_eq!(v.len(), 16);
    }
}
