//! Memory records and the memory store trait.
//!
//! The memory store holds typed records (working / semantic / episodic) per
//! user, each with an importance score. Recall blends semantic similarity
//! (when a query embedding is supplied) with recency-decayed importance;
//! every recall refreshes `last_accessed_at` on the returned records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemoryError;

/// The kind of a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Short-lived task state.
    Working,
    /// Durable facts and preferences.
    Semantic,
    /// Events tied to a point in time.
    Episodic,
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Working => "working",
            Self::Semantic => "semantic",
            Self::Episodic => "episodic",
        };
        write!(f, "{s}")
    }
}

/// A single memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique ID for this record.
    pub id: String,

    /// Which user (or session) this record belongs to.
    pub user_id: String,

    /// Record type.
    pub memory_type: MemoryType,

    /// The content of the memory.
    pub content: String,

    /// Importance in [0, 1]. May be boosted on access.
    pub importance: f32,

    /// When this record was created.
    pub created_at: DateTime<Utc>,

    /// When this record was last returned by a recall.
    pub last_accessed_at: DateTime<Utc>,

    /// Optional embedding vector (stored alongside the record).
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl MemoryRecord {
    /// Create a new record with a generated id and clamped importance.
    pub fn new(
        user_id: impl Into<String>,
        memory_type: MemoryType,
        content: impl Into<String>,
        importance: f32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            memory_type,
            content: content.into(),
            importance: importance.clamp(0.0, 1.0),
            created_at: now,
            last_accessed_at: now,
            embedding: None,
        }
    }

    /// Attach an embedding vector.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// A recall request against the memory store.
#[derive(Debug, Clone)]
pub struct RecallQuery {
    /// Which user's records to search.
    pub user_id: String,

    /// The search text (keyword scoring when no embedding is supplied).
    pub text: String,

    /// Query embedding, if the caller computed one.
    pub embedding: Option<Vec<f32>>,

    /// Restrict to these types. Empty = all types.
    pub types: Vec<MemoryType>,

    /// Maximum number of results.
    pub limit: usize,

    /// Minimum blended relevance threshold.
    pub min_score: f32,
}

impl RecallQuery {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            text: text.into(),
            embedding: None,
            types: Vec::new(),
            limit: 10,
            min_score: 0.0,
        }
    }
}

/// A record paired with its blended recall relevance in [0, 1].
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub relevance: f32,
}

/// Weights for blending recall relevance.
///
/// `relevance = semantic_weight * similarity + importance_weight *
/// effective_importance`, where effective importance decays by half every
/// `half_life_days` since the record was last accessed. `access_boost` is
/// added to importance each time a record is recalled (0.0 disables the
/// boost and keeps repeated builds byte-identical).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallWeights {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,

    #[serde(default = "default_importance_weight")]
    pub importance_weight: f32,

    #[serde(default = "default_half_life_days")]
    pub half_life_days: f32,

    #[serde(default)]
    pub access_boost: f32,
}

fn default_semantic_weight() -> f32 {
    0.7
}
fn default_importance_weight() -> f32 {
    0.3
}
fn default_half_life_days() -> f32 {
    30.0
}

impl Default for RecallWeights {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            importance_weight: default_importance_weight(),
            half_life_days: default_half_life_days(),
            access_boost: 0.0,
        }
    }
}

/// The memory store trait.
///
/// Implementations: in-memory (tests, ephemeral sessions), JSONL file
/// (durable local deployments).
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "file").
    fn name(&self) -> &str;

    /// Store a new record, returning its id.
    async fn add(&self, record: MemoryRecord) -> std::result::Result<String, MemoryError>;

    /// Recall records ordered by descending blended relevance.
    async fn recall(
        &self,
        query: &RecallQuery,
    ) -> std::result::Result<Vec<ScoredRecord>, MemoryError>;

    /// Render a stable text summary of a user's records.
    ///
    /// Same record set must always produce the same summary, and truncation
    /// never drops the highest-importance record.
    async fn summarize(&self, user_id: &str) -> std::result::Result<String, MemoryError>;

    /// Number of records stored for a user.
    async fn count(&self, user_id: &str) -> std::result::Result<usize, MemoryError>;

    /// Remove all records for a user.
    async fn clear(&self, user_id: &str) -> std::result::Result<(), MemoryError>;
}
