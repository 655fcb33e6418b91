//! In-memory vector index — exact cosine scan over stored chunks.
//!
//! Fine for the deployment sizes this engine targets; an external ANN
//! service slots in behind the same trait when the corpus outgrows a scan.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use contextloom_core::chunk::{DocumentChunk, IndexStats, ScoredChunk, SearchFilters, VectorIndex};
use contextloom_core::embedding::cosine_similarity;
use contextloom_core::error::IndexError;

/// An index that stores chunks in a Vec and scans on search.
pub struct InMemoryIndex {
    chunks: RwLock<Vec<DocumentChunk>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn upsert(&self, chunk: DocumentChunk) -> Result<(), IndexError> {
        let mut chunks = self.chunks.write().await;

        if let Some(existing) = chunks.first() {
            if !existing.embedding.is_empty()
                && !chunk.embedding.is_empty()
                && existing.embedding.len() != chunk.embedding.len()
            {
                return Err(IndexError::DimensionMismatch {
                    expected: existing.embedding.len(),
                    actual: chunk.embedding.len(),
                });
            }
        }

        // Idempotent: same id replaces the stored chunk
        if let Some(slot) = chunks.iter_mut().find(|c| c.id == chunk.id) {
            *slot = chunk;
        } else {
            chunks.push(chunk);
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let chunks = self.chunks.read().await;

        // Filters apply before truncation to k
        let mut scored: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|c| filters.matches(c))
            .map(|c| ScoredChunk {
                similarity: cosine_similarity(&c.embedding, query),
                chunk: c.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.chunk.created_at.cmp(&a.chunk.created_at))
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(k);

        debug!(results = scored.len(), k, "Index search complete");
        Ok(scored)
    }

    async fn remove_document(&self, source_document_id: &str) -> Result<usize, IndexError> {
        let mut chunks = self.chunks.write().await;
        let before = chunks.len();
        chunks.retain(|c| c.source_document_id != source_document_id);
        Ok(before - chunks.len())
    }

    async fn stats(&self) -> Result<IndexStats, IndexError> {
        let chunks = self.chunks.read().await;
        let documents: HashSet<&str> =
            chunks.iter().map(|c| c.source_document_id.as_str()).collect();
        Ok(IndexStats {
            chunk_count: chunks.len(),
            document_count: documents.len(),
            dimension: chunks.first().map(|c| c.embedding.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn chunk(doc: &str, pos: usize, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk::new(doc, pos, format!("chunk {pos} of {doc}"), embedding, None)
    }

    fn chunk_lang(doc: &str, pos: usize, embedding: Vec<f32>, lang: &str) -> DocumentChunk {
        DocumentChunk::new(doc, pos, format!("chunk {pos} of {doc}"), embedding, Some(lang.into()))
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let index = InMemoryIndex::new();
        index.upsert(chunk("a", 0, vec![0.0, 1.0, 0.0])).await.unwrap(); // orthogonal
        index.upsert(chunk("b", 0, vec![1.0, 0.0, 0.0])).await.unwrap(); // identical
        index.upsert(chunk("c", 0, vec![0.5, 0.5, 0.0])).await.unwrap(); // partial

        let results = index
            .search(&[1.0, 0.0, 0.0], 10, &SearchFilters::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].chunk.source_document_id, "b");
        assert_eq!(results[1].chunk.source_document_id, "c");
        assert_eq!(results[2].chunk.source_document_id, "a");
    }

    #[tokio::test]
    async fn upsert_same_id_replaces() {
        let index = InMemoryIndex::new();
        index.upsert(chunk("doc", 0, vec![1.0, 0.0])).await.unwrap();

        let mut replacement = chunk("doc", 0, vec![0.0, 1.0]);
        replacement.text = "replaced".into();
        index.upsert(replacement).await.unwrap();

        let stats = index.stats().await.unwrap();
        assert_eq!(stats.chunk_count, 1);

        let results = index
            .search(&[0.0, 1.0], 1, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(results[0].chunk.text, "replaced");
    }

    #[tokio::test]
    async fn filters_apply_before_truncation() {
        let index = InMemoryIndex::new();
        // Two high-scoring German chunks and one low-scoring English chunk
        index
            .upsert(chunk_lang("de_doc", 0, vec![1.0, 0.0], "de"))
            .await
            .unwrap();
        index
            .upsert(chunk_lang("de_doc", 1, vec![0.9, 0.1], "de"))
            .await
            .unwrap();
        index
            .upsert(chunk_lang("en_doc", 0, vec![0.1, 0.9], "en"))
            .await
            .unwrap();

        let filters = SearchFilters {
            language: Some("en".into()),
            ..Default::default()
        };
        // k=1: if truncation happened first, the German chunks would crowd
        // out the only English one
        let results = index.search(&[1.0, 0.0], 1, &filters).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.source_document_id, "en_doc");
    }

    #[tokio::test]
    async fn equal_similarity_prefers_newer_chunk() {
        let index = InMemoryIndex::new();
        let mut old = chunk("old", 0, vec![1.0, 0.0]);
        old.created_at = Utc::now() - Duration::hours(2);
        let new = chunk("new", 0, vec![1.0, 0.0]);

        index.upsert(old).await.unwrap();
        index.upsert(new).await.unwrap();

        let results = index
            .search(&[1.0, 0.0], 2, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(results[0].chunk.source_document_id, "new");
        assert_eq!(results[1].chunk.source_document_id, "old");
    }

    #[tokio::test]
    async fn remove_document_drops_all_its_chunks() {
        let index = InMemoryIndex::new();
        index.upsert(chunk("keep", 0, vec![1.0])).await.unwrap();
        index.upsert(chunk("gone", 0, vec![1.0])).await.unwrap();
        index.upsert(chunk("gone", 1, vec![1.0])).await.unwrap();

        let removed = index.remove_document("gone").await.unwrap();
        assert_eq!(removed, 2);

        let stats = index.stats().await.unwrap();
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.document_count, 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_rejected() {
        let index = InMemoryIndex::new();
        index.upsert(chunk("a", 0, vec![1.0, 0.0])).await.unwrap();
        let err = index.upsert(chunk("b", 0, vec![1.0, 0.0, 0.0])).await;
        assert!(matches!(err, Err(IndexError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn stats_on_empty_index() {
        let index = InMemoryIndex::new();
        let stats = index.stats().await.unwrap();
        assert_eq!(stats.chunk_count, 0);
        assert_eq!(stats.document_count, 0);
        assert!(stats.dimension.is_none());
    }

    #[tokio::test]
    async fn k_bounds_result_count() {
        let index = InMemoryIndex::new();
        for i in 0..10 {
            index.upsert(chunk("doc", i, vec![1.0, i as f32 * 0.1])).await.unwrap();
        }
        let results = index
            .search(&[1.0, 0.0], 3, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
    }
}
