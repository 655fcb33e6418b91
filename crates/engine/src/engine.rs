//! The engine facade — explicitly constructed, dependency-injected.
//!
//! `ContextEngine` owns the wired components (embedder, cache, index,
//! memory store, splitter) and exposes the build, memory, and knowledge
//! operations. Construct one at startup from an `EngineConfig`, override
//! individual components with the `with_*` methods, and pass it by
//! reference — there is no ambient global state.

use std::sync::Arc;

use tracing::{debug, info};

use contextloom_config::EngineConfig;
use contextloom_core::chunk::{DocumentChunk, IndexStats, ScoredChunk, SearchFilters, VectorIndex};
use contextloom_core::embedding::{EmbeddingProvider, EmbeddingStore};
use contextloom_core::error::{EngineError, Result};
use contextloom_core::evidence::ContextAssembly;
use contextloom_core::memory::{MemoryRecord, MemoryStore, MemoryType, RecallQuery, ScoredRecord};
use contextloom_core::request::BuildRequest;
use contextloom_core::splitter::TextSplitter;
use contextloom_embedding::{CacheStats, EmbeddingCache, FallbackEmbedder, FileEmbeddingStore, HashedEmbedder, RemoteEmbedder};
use contextloom_index::InMemoryIndex;
use contextloom_memory::InMemoryStore;

use crate::context::ContextBuilder;

/// Splits text on blank lines, packing paragraphs up to a size cap.
///
/// The default splitter for documents that arrive whole. A dedicated
/// loading/chunking service can replace it behind the `TextSplitter` trait.
pub struct ParagraphSplitter {
    max_chars: usize,
}

impl ParagraphSplitter {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }
}

impl Default for ParagraphSplitter {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl TextSplitter for ParagraphSplitter {
    fn split(&self, text: &str) -> Vec<String> {
        let mut segments: Vec<String> = Vec::new();
        let mut current = String::new();

        for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            if !current.is_empty() && current.len() + 2 + paragraph.len() > self.max_chars {
                segments.push(std::mem::take(&mut current));
            }

            if paragraph.len() > self.max_chars {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                // Oversized paragraph: hard-split at whitespace boundaries
                let mut start = 0;
                let bytes = paragraph.as_bytes();
                while start < paragraph.len() {
                    let mut end = (start + self.max_chars).min(paragraph.len());
                    if end < paragraph.len() {
                        while end > start && !bytes[end - 1].is_ascii_whitespace() {
                            end -= 1;
                        }
                        if end == start {
                            end = (start + self.max_chars).min(paragraph.len());
                            while end < paragraph.len() && !paragraph.is_char_boundary(end) {
                                end += 1;
                            }
                        }
                    }
                    let piece = paragraph[start..end].trim();
                    if !piece.is_empty() {
                        segments.push(piece.to_string());
                    }
                    start = end;
                }
            } else if current.is_empty() {
                current.push_str(paragraph);
            } else {
                current.push_str("\n\n");
                current.push_str(paragraph);
            }
        }

        if !current.is_empty() {
            segments.push(current);
        }
        segments
    }
}

/// The retrieval-and-context-assembly engine.
pub struct ContextEngine {
    config: EngineConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    index: Arc<dyn VectorIndex>,
    memory: Arc<dyn MemoryStore>,
    splitter: Arc<dyn TextSplitter>,
}

impl std::fmt::Debug for ContextEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ContextEngine {
    /// Wire an engine from configuration with the default in-memory
    /// components. Fails on invalid configuration or a remote provider
    /// missing its endpoint settings.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| EngineError::Config { message: e.to_string() })?;

        let embedder: Arc<dyn EmbeddingProvider> = match config.embedding.provider.as_str() {
            "remote" => {
                let api_url = config.embedding.api_url.clone().ok_or_else(|| {
                    EngineError::Config {
                        message: "embedding.api_url is required for the remote provider".into(),
                    }
                })?;
                let api_key = config.embedding.api_key.clone().ok_or_else(|| {
                    EngineError::Config {
                        message: "embedding.api_key is required for the remote provider".into(),
                    }
                })?;
                let remote = RemoteEmbedder::new(
                    config.embedding.model.clone(),
                    api_url,
                    api_key,
                    config.embedding.dimension,
                )?;
                // Remote always rides behind the deterministic fallback so
                // retrieval degrades instead of failing the build.
                Arc::new(FallbackEmbedder::new(Arc::new(remote)))
            }
            _ => Arc::new(HashedEmbedder::new(config.embedding.dimension)),
        };

        let mut cache = EmbeddingCache::new(config.cache.capacity);
        if let Some(path) = &config.cache.persist_path {
            cache = cache.with_store(Arc::new(FileEmbeddingStore::new(path.clone())));
        }

        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new(config.recall.clone()));

        info!(
            provider = %embedder.model_id(),
            dimension = embedder.dimension(),
            cache_capacity = config.cache.capacity,
            "Context engine initialized"
        );

        Ok(Self {
            config,
            embedder,
            cache: Arc::new(cache),
            index: Arc::new(InMemoryIndex::new()),
            memory,
            splitter: Arc::new(ParagraphSplitter::default()),
        })
    }

    // ── Component injection ───────────────────────────────────────────────

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = index;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_splitter(mut self, splitter: Arc<dyn TextSplitter>) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_embedding_store(mut self, store: Arc<dyn EmbeddingStore>) -> Self {
        self.cache = Arc::new(
            EmbeddingCache::new(self.config.cache.capacity).with_store(store),
        );
        self
    }

    // ── Build ─────────────────────────────────────────────────────────────

    /// Assemble a token-budgeted context for one query.
    pub async fn build(&self, request: &BuildRequest) -> Result<ContextAssembly> {
        let builder = ContextBuilder::new(
            self.memory.clone(),
            self.index.clone(),
            self.cache.clone(),
            self.embedder.clone(),
            self.config.fusion.clone(),
            self.config.build.to_build_limits(),
        );
        builder.build(request).await
    }

    // ── Memory operations ─────────────────────────────────────────────────

    /// Store a memory record, embedding its content for semantic recall.
    pub async fn add_memory(&self, record: MemoryRecord) -> Result<String> {
        let record = match self
            .cache
            .get_or_compute(&record.content, self.embedder.as_ref())
            .await
        {
            Ok(vector) => record.with_embedding(vector.as_ref().clone()),
            // Recall falls back to keyword scoring for records without vectors
            Err(_) => record,
        };
        Ok(self.memory.add(record).await?)
    }

    /// Recall records for a user, most relevant first.
    pub async fn recall_memory(
        &self,
        user_id: &str,
        query: &str,
        types: Vec<MemoryType>,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let embedding = self
            .cache
            .get_or_compute(query, self.embedder.as_ref())
            .await
            .ok()
            .map(|v| v.as_ref().clone());

        let recall = RecallQuery {
            user_id: user_id.to_string(),
            text: query.to_string(),
            embedding,
            types,
            limit,
            min_score: 0.0,
        };
        Ok(self.memory.recall(&recall).await?)
    }

    /// Stable text summary of a user's memory.
    pub async fn summarize_memory(&self, user_id: &str) -> Result<String> {
        Ok(self.memory.summarize(user_id).await?)
    }

    // ── Knowledge operations ──────────────────────────────────────────────

    /// Split, embed, and index a document. Re-adding the same
    /// `document_id` replaces its previous chunks. Returns the chunk count.
    pub async fn add_document(
        &self,
        document_id: &str,
        text: &str,
        language: Option<String>,
    ) -> Result<usize> {
        let segments = self.splitter.split(text);
        debug!(document_id, segments = segments.len(), "Indexing document");

        let replaced = self.index.remove_document(document_id).await?;
        if replaced > 0 {
            debug!(document_id, replaced, "Replaced previously indexed chunks");
        }

        for (position, segment) in segments.iter().enumerate() {
            let vector = self
                .cache
                .get_or_compute(segment, self.embedder.as_ref())
                .await?;
            let chunk = DocumentChunk::new(
                document_id,
                position,
                segment.clone(),
                vector.as_ref().clone(),
                language.clone(),
            );
            self.index.upsert(chunk).await?;
        }

        Ok(segments.len())
    }

    /// Remove every chunk of a document. Returns the number removed.
    pub async fn remove_document(&self, document_id: &str) -> Result<usize> {
        Ok(self.index.remove_document(document_id).await?)
    }

    /// Search the knowledge index for a text query.
    pub async fn search_knowledge(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let vector = self
            .cache
            .get_or_compute(query, self.embedder.as_ref())
            .await?;
        Ok(self
            .index
            .search(vector.as_ref(), k, &SearchFilters::default())
            .await?)
    }

    /// Aggregate index statistics.
    pub async fn index_stats(&self) -> Result<IndexStats> {
        Ok(self.index.stats().await?)
    }

    /// Embedding cache counters.
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}
