//! The embedding cache — single-flight memoization with explicit capacity.
//!
//! Keyed by SHA-256 of `(model_id, text)`. On a hit the stored vector is
//! returned with no recomputation. On a miss the cache consults the optional
//! persistent store first, then computes via the provider, stores, and
//! returns. Concurrent callers for the same missing key collapse into one
//! computation (single-flight): the first caller initializes a per-key cell,
//! the rest await it.
//!
//! Eviction is least-recently-used and only happens under capacity pressure
//! configured by the caller — never implicitly.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use contextloom_core::embedding::{EmbeddingProvider, EmbeddingStore};
use contextloom_core::error::EmbeddingError;

/// Cache hit/miss counters, exposed for diagnostics and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from memory.
    pub hits: u64,
    /// Lookups that had to go past memory.
    pub misses: u64,
    /// Misses answered by the persistent store without recomputation.
    pub store_hits: u64,
    /// Actual provider computations performed.
    pub computations: u64,
    /// Vectors currently held in memory.
    pub entries: usize,
}

/// One cache slot: a single-flight cell plus its LRU stamp.
struct Slot {
    cell: Arc<OnceCell<Arc<Vec<f32>>>>,
    last_used: u64,
}

struct CacheInner {
    slots: HashMap<String, Slot>,
    tick: u64,
}

/// The embedding cache.
pub struct EmbeddingCache {
    capacity: usize,
    store: Option<Arc<dyn EmbeddingStore>>,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    store_hits: AtomicU64,
    computations: AtomicU64,
}

impl EmbeddingCache {
    /// Create a cache bounded to `capacity` in-memory vectors.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            store: None,
            inner: Mutex::new(CacheInner {
                slots: HashMap::new(),
                tick: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            store_hits: AtomicU64::new(0),
            computations: AtomicU64::new(0),
        }
    }

    /// Attach a persistent key-value store consulted on memory misses.
    pub fn with_store(mut self, store: Arc<dyn EmbeddingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The cache key for a `(model_id, text)` pair.
    pub fn cache_key(model_id: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    /// Return the cached vector for `(provider.model_id(), text)`, computing
    /// it at most once across concurrent callers.
    pub async fn get_or_compute(
        &self,
        text: &str,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Arc<Vec<f32>>, EmbeddingError> {
        let key = Self::cache_key(provider.model_id(), text);

        // Grab (or create) the slot under the lock; await outside it.
        let cell = {
            let mut inner = self.inner.lock().await;
            inner.tick += 1;
            let tick = inner.tick;

            if let Some(slot) = inner.slots.get_mut(&key) {
                slot.last_used = tick;
                if slot.cell.initialized() {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                }
                slot.cell.clone()
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                if inner.slots.len() >= self.capacity {
                    Self::evict_lru(&mut inner);
                }
                let cell = Arc::new(OnceCell::new());
                inner.slots.insert(
                    key.clone(),
                    Slot {
                        cell: cell.clone(),
                        last_used: tick,
                    },
                );
                cell
            }
        };

        let vector = cell
            .get_or_try_init(|| self.compute(&key, text, provider))
            .await?;

        Ok(vector.clone())
    }

    /// Single-flight body: persistent store lookup, then provider call.
    async fn compute(
        &self,
        key: &str,
        text: &str,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Arc<Vec<f32>>, EmbeddingError> {
        if let Some(store) = &self.store {
            match store.get(key).await {
                Ok(Some(vector)) => {
                    self.store_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %&key[..12], "Embedding answered from persistent store");
                    return Ok(Arc::new(vector));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Persistent store lookup failed, computing instead");
                }
            }
        }

        let vector = provider.embed(text).await?;
        self.computations.fetch_add(1, Ordering::Relaxed);

        if vector.len() != provider.dimension() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: provider.dimension(),
                actual: vector.len(),
            });
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.put(key, &vector).await {
                warn!(error = %e, "Failed to persist embedding, keeping in memory only");
            }
        }

        Ok(Arc::new(vector))
    }

    /// Remove the least-recently-used completed slot. In-flight slots are
    /// skipped so an ongoing computation is never orphaned.
    fn evict_lru(inner: &mut CacheInner) {
        let victim = inner
            .slots
            .iter()
            .filter(|(_, slot)| slot.cell.initialized())
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(key, _)| key.clone());

        if let Some(key) = victim {
            inner.slots.remove(&key);
        }
    }

    /// Current counters.
    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            entries: inner.slots.len(),
        }
    }
}
