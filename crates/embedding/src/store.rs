//! File-based embedding store — persistent JSONL key-value backend.
//!
//! Each line is a JSON-encoded `{key, vector}` pair. Entries are loaded into
//! memory on creation; `put` appends a line, so re-opening the file replays
//! history with later entries winning. Corrupted lines are skipped with a
//! warning rather than failing the load.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use contextloom_core::embedding::EmbeddingStore;
use contextloom_core::error::StoreError;

#[derive(Serialize, Deserialize)]
struct StoredVector {
    key: String,
    vector: Vec<f32>,
}

/// A JSONL-backed embedding store.
pub struct FileEmbeddingStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Vec<f32>>>,
}

impl FileEmbeddingStore {
    /// Open (or create on first write) a store at the given path.
    pub fn new(path: PathBuf) -> Self {
        let entries = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = entries.len(), "Embedding store loaded");
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Default path: `~/.contextloom/cache/embeddings.jsonl`
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".contextloom")
            .join("cache")
            .join("embeddings.jsonl")
    }

    fn load_from_disk(path: &PathBuf) -> HashMap<String, Vec<f32>> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return HashMap::new(), // File doesn't exist yet — start empty
        };

        let mut entries = HashMap::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<StoredVector>(line) {
                Ok(stored) => {
                    entries.insert(stored.key, stored.vector);
                }
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted embedding store line");
                }
            }
        }
        entries
    }

    fn append_line(&self, stored: &StoredVector) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("Failed to create store directory: {e}")))?;
        }

        let line = serde_json::to_string(stored)
            .map_err(|e| StoreError::Corrupt(format!("Failed to serialize vector: {e}")))?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::Io(format!("Failed to open store file: {e}")))?;

        writeln!(file, "{line}").map_err(|e| StoreError::Io(format!("Failed to write store file: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl EmbeddingStore for FileEmbeddingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<f32>>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, vector: &[f32]) -> Result<(), StoreError> {
        let stored = StoredVector {
            key: key.to_string(),
            vector: vector.to_vec(),
        };
        self.append_line(&stored)?;
        self.entries.lock().await.insert(stored.key, stored.vector);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn put_and_get_persists() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        drop(tmp);

        let store = FileEmbeddingStore::new(path.clone());
        store.put("key_a", &[0.5, 0.25]).await.unwrap();
        assert_eq!(store.get("key_a").await.unwrap(), Some(vec![0.5, 0.25]));

        // Reload from disk — entry survives
        let store2 = FileEmbeddingStore::new(path);
        assert_eq!(store2.get("key_a").await.unwrap(), Some(vec![0.5, 0.25]));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        drop(tmp);

        let store = FileEmbeddingStore::new(path);
        assert_eq!(store.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn later_entries_win_on_reload() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        drop(tmp);

        let store = FileEmbeddingStore::new(path.clone());
        store.put("k", &[1.0]).await.unwrap();
        store.put("k", &[2.0]).await.unwrap();

        let store2 = FileEmbeddingStore::new(path);
        assert_eq!(store2.get("k").await.unwrap(), Some(vec![2.0]));
    }

    #[tokio::test]
    async fn handles_corrupted_lines() {
        let mut tmp = NamedTempFile::new().unwrap();
        writeln!(tmp, r#"{{"key":"good","vector":[0.1]}}"#).unwrap();
        writeln!(tmp, "this is not json").unwrap();
        writeln!(tmp, r#"{{"key":"also_good","vector":[0.2]}}"#).unwrap();
        let path = tmp.path().to_path_buf();

        let store = FileEmbeddingStore::new(path);
        assert_eq!(store.get("good").await.unwrap(), Some(vec![0.1]));
        assert_eq!(store.get("also_good").await.unwrap(), Some(vec![0.2]));
    }

    #[tokio::test]
    async fn handles_missing_file_gracefully() {
        let path = PathBuf::from("/tmp/contextloom_test_nonexistent_store.jsonl");
        let _ = std::fs::remove_file(&path);
        let store = FileEmbeddingStore::new(path);
        assert_eq!(store.get("anything").await.unwrap(), None);
    }
}
