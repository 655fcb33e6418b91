//! File-based memory store — persistent JSONL storage.
//!
//! Each line is a JSON-encoded `MemoryRecord`. Records are loaded into
//! memory on creation and flushed to disk on every mutation (add, recall
//! bookkeeping, clear). Fast reads, durable writes, human-inspectable files.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use contextloom_core::error::MemoryError;
use contextloom_core::memory::{
    MemoryRecord, MemoryStore, RecallQuery, RecallWeights, ScoredRecord,
};

use crate::in_memory::{DEFAULT_SUMMARY_LIMIT, recall_in_place};
use crate::scoring::render_summary;

/// A JSONL-backed memory store.
pub struct FileMemoryStore {
    path: PathBuf,
    entries: RwLock<Vec<MemoryRecord>>,
    weights: RecallWeights,
    summary_limit: usize,
}

impl FileMemoryStore {
    /// Open a store at the given path, loading existing records.
    pub fn new(path: PathBuf, weights: RecallWeights) -> Self {
        let entries = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = entries.len(), "File memory store loaded");
        Self {
            path,
            entries: RwLock::new(entries),
            weights,
            summary_limit: DEFAULT_SUMMARY_LIMIT,
        }
    }

    /// Default path: `~/.contextloom/memory/records.jsonl`
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".contextloom")
            .join("memory")
            .join("records.jsonl")
    }

    fn load_from_disk(path: &PathBuf) -> Vec<MemoryRecord> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(), // File doesn't exist yet — start empty
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<MemoryRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted memory record");
                    None
                }
            })
            .collect()
    }

    /// Flush all records to disk as JSONL.
    async fn flush(&self) -> Result<(), MemoryError> {
        let entries = self.entries.read().await;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemoryError::Storage(format!("Failed to create memory directory: {e}"))
            })?;
        }

        let mut content = String::new();
        for record in entries.iter() {
            let line = serde_json::to_string(record).map_err(|e| {
                MemoryError::Storage(format!("Failed to serialize memory record: {e}"))
            })?;
            content.push_str(&line);
            content.push('\n');
        }

        std::fs::write(&self.path, &content)
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn add(&self, mut record: MemoryRecord) -> Result<String, MemoryError> {
        if record.id.is_empty() {
            record.id = Uuid::new_v4().to_string();
        }
        record.importance = record.importance.clamp(0.0, 1.0);
        let id = record.id.clone();
        self.entries.write().await.push(record);
        self.flush().await?;
        Ok(id)
    }

    async fn recall(&self, query: &RecallQuery) -> Result<Vec<ScoredRecord>, MemoryError> {
        let results = {
            let mut entries = self.entries.write().await;
            recall_in_place(&mut entries, query, &self.weights)
        };
        if !results.is_empty() {
            // last_accessed_at changed on the returned records
            self.flush().await?;
        }
        Ok(results)
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
        self.flush().await
    }
}
