//! Embedding provider and persistent store traits, plus vector math shared
//! by the index and memory crates.

use async_trait::async_trait;

use crate::error::{EmbeddingError, StoreError};

/// The embedding provider trait.
///
/// Implementations must be deterministic for identical input and model
/// identifier: the cache keys vectors by `(model_id, text)` and assumes a
/// repeat call would produce the same vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the model producing the vectors (cache key component).
    fn model_id(&self) -> &str;

    /// Fixed output dimension D.
    fn dimension(&self) -> usize;

    /// Whether this is a semantic model or the deterministic fallback.
    /// Callers use this to decide whether a similarity threshold is
    /// meaningful.
    fn is_semantic(&self) -> bool;

    /// Convert text to a vector of length `dimension()`.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;
}

/// Persistent key-value backend for the embedding cache.
///
/// External collaborator seam: the cache only requires get/put-by-key
/// semantics, so a local file, an embedded database, or a remote store are
/// all valid behind this trait.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Fetch a previously stored vector by cache key.
    async fn get(&self, key: &str) -> std::result::Result<Option<Vec<f32>>, StoreError>;

    /// Store a vector under a cache key, replacing any previous value.
    async fn put(&self, key: &str, vector: &[f32]) -> std::result::Result<(), StoreError>;
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length, empty, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}
