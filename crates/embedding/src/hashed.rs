//! Deterministic hashed embedding — the retrieval fallback.
//!
//! The scheme is fixed so vectors are bit-reproducible across processes and
//! reimplementations:
//!
//! 1. Lowercase the input.
//! 2. Split into terms on any non-alphanumeric boundary, dropping empties.
//! 3. Hash each term with FNV-1a (64-bit); bucket = hash mod D.
//! 4. Accumulate term counts per bucket.
//! 5. Weight each occupied bucket `1.0 + ln(count)`.
//! 6. L2-normalize the vector.
//!
//! Empty input produces the zero vector. This is a term-frequency signal,
//! not a semantic one, so `is_semantic()` is false and callers should skip
//! similarity thresholds tuned for semantic models.

use async_trait::async_trait;

use contextloom_core::embedding::EmbeddingProvider;
use contextloom_core::error::EmbeddingError;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a hash of a term's UTF-8 bytes.
fn fnv1a(term: &str) -> u64 {
    term.bytes()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(FNV_PRIME))
}

/// The deterministic hashing embedder.
pub struct HashedEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashedEmbedder {
    /// Create an embedder with the given fixed dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            model_id: format!("hashed-{dimension}"),
            dimension,
        }
    }

    /// Compute the vector synchronously. Exposed because the scheme is pure
    /// CPU work and some callers (tests, the fallback path) have no reason
    /// to go through the async trait.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut counts = vec![0u32; self.dimension];

        for term in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(term) % self.dimension as u64) as usize;
            counts[bucket] += 1;
        }

        let mut vector: Vec<f32> = counts
            .into_iter()
            .map(|count| {
                if count == 0 {
                    0.0
                } else {
                    1.0 + (count as f32).ln()
                }
            })
            .collect();

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashedEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_semantic(&self) -> bool {
        false
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextloom_core::embedding::cosine_similarity;

    #[test]
    fn identical_input_is_bit_identical() {
        let embedder = HashedEmbedder::new(256);
        let a = embedder.embed_sync("Rust is a systems programming language");
        let b = embedder.embed_sync("Rust is a systems programming language");
        assert_eq!(a, b);
    }

    #[test]
    fn output_has_fixed_dimension() {
        let embedder = HashedEmbedder::new(128);
        assert_eq!(embedder.embed_sync("hello world").len(), 128);
        assert_eq!(embedder.embed_sync("a much longer piece of text with many terms").len(), 128);
    }

    #[test]
    fn vector_is_l2_normalized() {
        let embedder = HashedEmbedder::new(256);
        let v = embedder.embed_sync("normalize this text please");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_input_is_zero_vector() {
        let embedder = HashedEmbedder::new(64);
        let v = embedder.embed_sync("");
        assert!(v.iter().all(|x| *x == 0.0));
        // punctuation-only input has no terms either
        let v = embedder.embed_sync("!!! ... ???");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn case_and_punctuation_insensitive() {
        let embedder = HashedEmbedder::new(256);
        let a = embedder.embed_sync("Pandas, memory usage!");
        let b = embedder.embed_sync("pandas memory usage");
        assert_eq!(a, b);
    }

    #[test]
    fn similar_texts_score_higher_than_unrelated() {
        let embedder = HashedEmbedder::new(256);
        let query = embedder.embed_sync("pandas dataframe memory optimization");
        let related = embedder.embed_sync("optimizing memory usage of a pandas dataframe");
        let unrelated = embedder.embed_sync("the weather in tokyo is cloudy today");

        let sim_related = cosine_similarity(&query, &related);
        let sim_unrelated = cosine_similarity(&query, &unrelated);
        assert!(sim_related > sim_unrelated);
    }

    #[test]
    fn repeated_terms_are_log_scaled() {
        let embedder = HashedEmbedder::new(256);
        let once = embedder.embed_sync("cache");
        let many = embedder.embed_sync("cache cache cache cache");
        // Same single occupied bucket, so both normalize to the same unit vector
        assert_eq!(once, many);

        // With a second distinct term the repeated one dominates but not linearly
        let v = embedder.embed_sync("cache cache cache cache miss");
        let bucket_cache = (fnv1a("cache") % 256) as usize;
        let bucket_miss = (fnv1a("miss") % 256) as usize;
        assert!(v[bucket_cache] > v[bucket_miss]);
        assert!(v[bucket_cache] < 4.0 * v[bucket_miss]);
    }

    #[test]
    fn known_fnv_vector() {
        // Pin the scheme: fnv1a("rust") must always land in the same bucket.
        let bucket = (fnv1a("rust") % 256) as usize;
        let embedder = HashedEmbedder::new(256);
        let v = embedder.embed_sync("rust");
        assert!((v[bucket] - 1.0).abs() < 1e-6);
        assert_eq!(v.iter().filter(|x| **x != 0.0).count(), 1);
    }

    #[tokio::test]
    async fn async_trait_path_matches_sync() {
        let embedder = HashedEmbedder::new(256);
        let via_trait = embedder.embed("single flight").await.unwrap();
        assert_eq!(via_trait, embedder.embed_sync("single flight"));
        assert!(!embedder.is_semantic());
        assert_eq!(embedder.model_id(), "hashed-256");
    }
}
