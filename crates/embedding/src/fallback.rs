//! Embedding fallback — degrade to the deterministic scheme on failure.
//!
//! Wraps a primary (semantic) provider and a [`HashedEmbedder`] of the same
//! dimension. Any primary failure is logged and answered from the hashed
//! scheme instead, so retrieval degrades gracefully rather than failing the
//! whole build.
//!
//! The wrapper reports a composite model id distinct from both inner ids, so
//! cached vectors produced under degradation are never confused with pure
//! primary (or pure hashed) vectors.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::warn;

use contextloom_core::embedding::EmbeddingProvider;
use contextloom_core::error::EmbeddingError;

use crate::hashed::HashedEmbedder;

/// A provider that wraps a primary and falls back to hashing on failure.
pub struct FallbackEmbedder {
    primary: Arc<dyn EmbeddingProvider>,
    fallback: HashedEmbedder,
    model_id: String,
    degraded_calls: AtomicU64,
}

impl FallbackEmbedder {
    /// Wrap a primary provider. The hashed fallback is built with the
    /// primary's dimension so vector sizes stay uniform either way.
    pub fn new(primary: Arc<dyn EmbeddingProvider>) -> Self {
        let fallback = HashedEmbedder::new(primary.dimension());
        let model_id = format!("{}+{}", primary.model_id(), fallback.model_id());
        Self {
            primary,
            fallback,
            model_id,
            degraded_calls: AtomicU64::new(0),
        }
    }

    /// How many calls were answered by the fallback so far.
    pub fn degraded_calls(&self) -> u64 {
        self.degraded_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EmbeddingProvider for FallbackEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.primary.dimension()
    }

    fn is_semantic(&self) -> bool {
        self.primary.is_semantic()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        match self.primary.embed(text).await {
            Ok(vector) => Ok(vector),
            Err(e) => {
                warn!(
                    primary = %self.primary.model_id(),
                    error = %e,
                    "Embedding failed, degrading to hashed fallback"
                );
                self.degraded_calls.fetch_add(1, Ordering::Relaxed);
                Ok(self.fallback.embed_sync(text))
            }
        }
    }
}
