//! Text splitter seam.
//!
//! Chunk segmentation mechanics belong to an external loading service; the
//! engine only requires text already cut to a reasonable size. This trait is
//! the seam that service plugs into when documents arrive whole.

/// Splits raw document text into chunk-sized segments.
pub trait TextSplitter: Send + Sync {
    /// Split `text` into ordered, non-empty segments.
    fn split(&self, text: &str) -> Vec<String>;
}
