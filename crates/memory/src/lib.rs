//! Memory store implementations for contextloom.

pub mod file_store;
pub mod in_memory;
pub mod scoring;

pub use file_store::FileMemoryStore;
pub use in_memory::InMemoryStore;
pub use scoring::{blended_relevance, effective_importance, keyword_score, render_summary};
