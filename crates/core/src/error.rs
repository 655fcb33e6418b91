//! Error types for the contextloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; `EngineError` wraps them
//! and adds the build-level failure modes that cross component boundaries.

use thiserror::Error;

/// The top-level error type for all contextloom operations.
#[derive(Debug, Error)]
pub enum EngineError {
    // --- Embedding errors ---
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    // --- Index errors ---
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Persistent store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors (rejected before COLLECT) ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// System instructions alone exceed the non-reserved budget.
    /// Silently truncating required instructions would be unsafe, so the
    /// build fails naming the offending segment.
    #[error("Segment '{segment}' needs {needed} tokens but only {budget} are available")]
    BudgetExceededBeforeAllocation {
        segment: String,
        needed: usize,
        budget: usize,
    },

    /// Every evidence source failed or timed out. A single failing source is
    /// degraded to an empty candidate set; all of them failing is an error
    /// rather than a silently empty context.
    #[error("All evidence sources unavailable: {reason}")]
    AllSourcesUnavailable { reason: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Rate limited by embedding endpoint, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index backend error: {0}")]
    Backend(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Dimension mismatch: index holds {expected}-dim vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Errors from the persistent key-value store behind the embedding cache.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Corrupt store entry: {0}")]
    Corrupt(String),
}
