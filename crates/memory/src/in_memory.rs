//! In-memory store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use contextloom_core::error::MemoryError;
use contextloom_core::memory::{
    MemoryRecord, MemoryStore, RecallQuery, RecallWeights, ScoredRecord,
};

use crate::scoring::{blended_relevance, render_summary};

/// How many records a summary shows before truncating.
pub const DEFAULT_SUMMARY_LIMIT: usize = 20;

/// A store that keeps records in a Vec.
pub struct InMemoryStore {
    entries: RwLock<Vec<MemoryRecord>>,
    weights: RecallWeights,
    summary_limit: usize,
}

impl InMemoryStore {
    pub fn new(weights: RecallWeights) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            weights,
            summary_limit: DEFAULT_SUMMARY_LIMIT,
        }
    }

    pub fn with_summary_limit(mut self, limit: usize) -> Self {
        self.summary_limit = limit.max(1);
        self
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(RecallWeights::default())
    }
}

/// Score, filter, select, and touch records for a recall. Shared shape with
/// the file store, which persists after calling this.
pub(crate) fn recall_in_place(
    entries: &mut [MemoryRecord],
    query: &RecallQuery,
    weights: &RecallWeights,
) -> Vec<ScoredRecord> {
    let now = Utc::now();

    let mut scored: Vec<(usize, f32)> = entries
        .iter()
        .enumerate()
        .filter(|(_, r)| r.user_id == query.user_id)
        .filter(|(_, r)| query.types.is_empty() || query.types.contains(&r.memory_type))
        .map(|(i, r)| (i, blended_relevance(r, query, now, weights)))
        .filter(|(_, score)| *score >= query.min_score)
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| entries[b.0].created_at.cmp(&entries[a.0].created_at))
            .then_with(|| entries[a.0].id.cmp(&entries[b.0].id))
    });
    scored.truncate(query.limit);

    scored
        .into_iter()
        .map(|(i, relevance)| {
            let record = &mut entries[i];
            record.last_accessed_at = now;
            if weights.access_boost > 0.0 {
                record.importance = (record.importance + weights.access_boost).min(1.0);
            }
            ScoredRecord {
                record: record.clone(),
                relevance,
            }
        })
        .collect()
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn add(&self, mut record: MemoryRecord) -> Result<String, MemoryError> {
        if record.id.is_empty() {
            record.id = Uuid::new_v4().to_string();
        }
        record.importance = record.importance.clamp(0.0, 1.0);
        let id = record.id.clone();
        self.entries.write().await.push(record);
        Ok(id)
    }

    async fn recall(&self, query: &RecallQuery) -> Result<Vec<ScoredRecord>, MemoryError> {
        let mut entries = self.entries.write().await;
        Ok(recall_in_place(&mut entries, query, &self.weights))
    }

    async fn summarize(&self, user_id: &str) -> Result<String, MemoryError> {
        let entries = self.entries.read().await;
        let records: Vec<MemoryRecord> = entries
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        Ok(render_summary(user_id, &records, self.summary_limit))
    }

    async fn count(&self, user_id: &str) -> Result<usize, MemoryError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|r| r.user_id == user_id)
            .count())
    }

    async fn clear(&self, user_id: &str) -> Result<(), MemoryError> {
        self.entries.write().await.retain(|r| r.user_id != user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextloom_core::memory::MemoryType;

    fn record(user: &str, memory_type: MemoryType, content: &str, importance: f32) -> MemoryRecord {
        MemoryRecord::new(user, memory_type, content, importance)
    }

    #[tokio::test]
    async fn add_and_count() {
        let store = InMemoryStore::default();
        let id = store
            .add(record("u1", MemoryType::Semantic, "user builds data tools", 0.8))
            .await
            .unwrap();
        assert!(!id.is_empty());
        assert_eq!(store.count("u1").await.unwrap(), 1);
        assert_eq!(store.count("u2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recall_filters_by_user_and_type() {
        let store = InMemoryStore::default();
        store
            .add(record("u1", MemoryType::Semantic, "rust preference", 0.8))
            .await
            .unwrap();
        store
            .add(record("u1", MemoryType::Episodic, "shipped the rust parser", 0.7))
            .await
            .unwrap();
        store
            .add(record("u2", MemoryType::Semantic, "rust expert elsewhere", 0.9))
            .await
            .unwrap();

        let mut query = RecallQuery::new("u1", "rust");
        query.types = vec![MemoryType::Semantic];
        let results = store.recall(&query).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.content, "rust preference");
    }

    #[tokio::test]
    async fn recall_orders_by_relevance() {
        let store = InMemoryStore::default();
        store
            .add(record("u1", MemoryType::Semantic, "pandas and dataframes daily", 0.9))
            .await
            .unwrap();
        store
            .add(record("u1", MemoryType::Semantic, "nothing to do with the topic", 0.9))
            .await
            .unwrap();

        let results = store.recall(&RecallQuery::new("u1", "pandas dataframes")).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].relevance > results[1].relevance);
        assert!(results[0].record.content.contains("pandas"));
    }

    #[tokio::test]
    async fn recall_respects_limit_and_min_score() {
        let store = InMemoryStore::default();
        for i in 0..5 {
            store
                .add(record("u1", MemoryType::Semantic, &format!("pandas note {i}"), 0.5))
                .await
                .unwrap();
        }

        let mut query = RecallQuery::new("u1", "pandas");
        query.limit = 2;
        assert_eq!(store.recall(&query).await.unwrap().len(), 2);

        let mut query = RecallQuery::new("u1", "completely unrelated");
        query.min_score = 0.5;
        assert!(store.recall(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recall_refreshes_last_accessed() {
        let store = InMemoryStore::default();
        let mut rec = record("u1", MemoryType::Semantic, "pandas knowledge", 0.5);
        rec.last_accessed_at = Utc::now() - chrono::Duration::days(10);
        let before = rec.last_accessed_at;
        store.add(rec).await.unwrap();

        let results = store.recall(&RecallQuery::new("u1", "pandas")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].record.last_accessed_at > before);
    }

    #[tokio::test]
    async fn access_boost_raises_importance_when_enabled() {
        let weights = RecallWeights {
            access_boost: 0.1,
            ..Default::default()
        };
        let store = InMemoryStore::new(weights);
        store
            .add(record("u1", MemoryType::Semantic, "boosted memory", 0.5))
            .await
            .unwrap();

        let results = store.recall(&RecallQuery::new("u1", "boosted")).await.unwrap();
        assert!((results[0].record.importance - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn summarize_and_clear() {
        let store = InMemoryStore::default();
        store
            .add(record("u1", MemoryType::Semantic, "important fact", 0.9))
            .await
            .unwrap();

        let summary = store.summarize("u1").await.unwrap();
        assert!(summary.contains("important fact"));

        store.clear("u1").await.unwrap();
        assert_eq!(store.count("u1").await.unwrap(), 0);
        let summary = store.summarize("u1").await.unwrap();
        assert!(summary.contains("No memories"));
    }

    #[tokio::test]
    async fn semantic_recall_uses_embeddings() {
        let store = InMemoryStore::default();
        store
            .add(
                record("u1", MemoryType::Semantic, "aligned", 0.5)
                    .with_embedding(vec![1.0, 0.0]),
            )
            .await
            .unwrap();
        store
            .add(
                record("u1", MemoryType::Semantic, "orthogonal", 0.5)
                    .with_embedding(vec![0.0, 1.0]),
            )
            .await
            .unwrap();

        let mut query = RecallQuery::new("u1", "");
        query.embedding = Some(vec![1.0, 0.0]);
        let results = store.recall(&query).await.unwrap();

        assert_eq!(results[0].record.content, "aligned");
        assert!(results[0].relevance > results[1].relevance);
    }
}
