//! Document chunks and the vector index trait.
//!
//! A chunk is a segment of a source document indexed independently for
//! retrieval. Chunks are immutable once indexed and owned by the index;
//! re-upserting the same `id` replaces the stored chunk instead of
//! appending a duplicate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// A single indexed document chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Unique ID within an index.
    pub id: String,

    /// Stable identifier of the source document this chunk came from.
    pub source_document_id: String,

    /// The text content of this chunk.
    pub text: String,

    /// Embedding vector (fixed dimension per index).
    #[serde(default)]
    pub embedding: Vec<f32>,

    /// Optional language tag (e.g. "en", "zh").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Sequential position of this chunk within its source document.
    pub position_index: usize,

    /// When this chunk was indexed.
    pub created_at: DateTime<Utc>,
}

impl DocumentChunk {
    /// Create a chunk with a deterministic id derived from its source
    /// document and position. Re-ingesting the same document therefore
    /// produces the same ids, which makes upserts replace rather than
    /// duplicate.
    pub fn new(
        source_document_id: impl Into<String>,
        position_index: usize,
        text: impl Into<String>,
        embedding: Vec<f32>,
        language: Option<String>,
    ) -> Self {
        let source_document_id = source_document_id.into();
        Self {
            id: format!("{source_document_id}#{position_index}"),
            source_document_id,
            text: text.into(),
            embedding,
            language,
            position_index,
            created_at: Utc::now(),
        }
    }
}

/// A chunk paired with its similarity to a query vector.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    /// Cosine similarity in [-1, 1], higher is better.
    pub similarity: f32,
}

/// Metadata filters applied to a search *before* truncation to `k`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Only return chunks with this language tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Only return chunks from this source document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_document_id: Option<String>,
}

impl SearchFilters {
    /// Whether a chunk passes every set filter.
    pub fn matches(&self, chunk: &DocumentChunk) -> bool {
        if let Some(lang) = &self.language {
            if chunk.language.as_deref() != Some(lang.as_str()) {
                return false;
            }
        }
        if let Some(doc) = &self.source_document_id {
            if &chunk.source_document_id != doc {
                return false;
            }
        }
        true
    }
}

/// Aggregate statistics about an index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    /// Total chunks stored.
    pub chunk_count: usize,
    /// Distinct source documents.
    pub document_count: usize,
    /// Embedding dimension, if any chunk is stored.
    pub dimension: Option<usize>,
}

/// The vector/chunk index trait.
///
/// Implementations: in-memory (default for small deployments), or adapters
/// over an external vector database. The engine treats all of them the same.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Insert or replace a chunk. Idempotent by `id`.
    async fn upsert(&self, chunk: DocumentChunk) -> std::result::Result<(), IndexError>;

    /// Approximate nearest-neighbor search by cosine similarity.
    ///
    /// Filters are applied before truncation to `k`. Results are ordered by
    /// descending similarity; ties broken by most recent `created_at`,
    /// then id.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filters: &SearchFilters,
    ) -> std::result::Result<Vec<ScoredChunk>, IndexError>;

    /// Remove every chunk belonging to a source document.
    /// Returns the number of chunks removed.
    async fn remove_document(
        &self,
        source_document_id: &str,
    ) -> std::result::Result<usize, IndexError>;

    /// Aggregate statistics.
    async fn stats(&self) -> std::result::Result<IndexStats, IndexError>;
}
