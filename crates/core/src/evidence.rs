//! Evidence candidates and the context assembly result.
//!
//! An `EvidenceCandidate` is transient: it exists only for the duration of
//! one build call, produced by the fusion engine from memory recall and
//! knowledge search results. The `ContextAssembly` is created fresh per
//! call and never persisted.

use serde::{Deserialize, Serialize};

/// Which source an evidence candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceOrigin {
    Memory,
    Knowledge,
}

impl std::fmt::Display for EvidenceOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Memory => "memory",
            Self::Knowledge => "knowledge",
        };
        write!(f, "{s}")
    }
}

/// A fused, normalized piece of evidence competing for budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceCandidate {
    /// The text that would be injected into the context.
    pub text: String,

    /// Normalized relevance in [0, 1] (comparable across origins).
    pub relevance: f32,

    /// Source kind.
    pub origin: EvidenceOrigin,

    /// Stable identifier within the source (record id or chunk id).
    pub origin_id: String,

    /// Pre-fusion score in the source's native scale, kept for tie-breaking.
    #[serde(default)]
    pub source_score: f32,

    /// Token estimate for this candidate's rendered form.
    pub estimated_tokens: usize,
}

/// A recoverable condition reported on the result, not only via logs,
/// so callers can react programmatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// One evidence source timed out or errored; the build proceeded with
    /// an empty candidate set from it.
    SourceDegraded { source: String, reason: String },

    /// Both sources were healthy but returned nothing relevant.
    NoEvidence,

    /// A segment was compressed to fit the budget instead of being dropped.
    Compressed { segment: String },

    /// Items were dropped during allocation (budget exhausted).
    Dropped { segment: String, items: usize },
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceDegraded { source, reason } => {
                write!(f, "source '{source}' degraded: {reason}")
            }
            Self::NoEvidence => write!(f, "no evidence found for query"),
            Self::Compressed { segment } => write!(f, "segment '{segment}' compressed"),
            Self::Dropped { segment, items } => {
                write!(f, "{items} item(s) dropped from '{segment}'")
            }
        }
    }
}

/// The assembled context, ready to hand to a language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextAssembly {
    /// The final context text in fixed section order.
    pub assembled_text: String,

    /// Estimated tokens in `assembled_text`, using the same estimator as
    /// allocation. Never exceeds `max_tokens * (1 - reserve_ratio)`.
    pub total_tokens: usize,

    /// Ordered origin ids of the evidence that survived allocation.
    /// Contains no duplicates.
    pub included_sources: Vec<String>,

    /// Whether anything was dropped or compressed to fit the budget.
    pub truncated: bool,

    /// Recoverable conditions encountered during the build.
    #[serde(default)]
    pub notices: Vec<Notice>,
}
