//! Fusion & ranking — one ranked, deduplicated evidence list.
//!
//! Memory recall scores and knowledge cosine similarities are not directly
//! comparable, so each source is rescaled into [0, 1] first (fixed-range
//! rescale per source). Candidates below the relevance floor are dropped
//! entirely, near-identical texts collapse to their highest-scoring
//! instance, and ties break by origin priority then original source score.
//!
//! This stage performs no I/O; both source result sets are fetched by the
//! builder before fusion runs.

use std::collections::HashSet;

use tracing::debug;

use contextloom_config::FusionConfig;
use contextloom_core::chunk::ScoredChunk;
use contextloom_core::evidence::{EvidenceCandidate, EvidenceOrigin};
use contextloom_core::memory::ScoredRecord;

use super::token::TokenEstimator;

/// The fusion output: ranked candidates plus bookkeeping counters.
#[derive(Debug, Clone)]
pub struct FusedEvidence {
    /// Ranked, deduplicated candidates (descending relevance).
    pub candidates: Vec<EvidenceCandidate>,
    /// Candidates dropped for scoring below the relevance floor.
    pub dropped_below_floor: usize,
    /// Candidates collapsed into a higher-scoring duplicate.
    pub deduplicated: usize,
}

struct Entry {
    candidate: EvidenceCandidate,
    /// Dedup key for knowledge chunks: two results from the same source
    /// document collapse to the better-scoring one.
    doc_id: Option<String>,
    norm_text: String,
    words: HashSet<String>,
}

fn normalize_text(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn word_set(norm_text: &str) -> HashSet<String> {
    norm_text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Jaccard overlap of two word sets in [0, 1].
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f32 / union as f32
}

/// Merge memory recall and knowledge search results for one query.
pub fn fuse(
    memory: &[ScoredRecord],
    knowledge: &[ScoredChunk],
    min_relevance: f32,
    config: &FusionConfig,
    estimator: &dyn TokenEstimator,
) -> FusedEvidence {
    let mut entries: Vec<Entry> = Vec::with_capacity(memory.len() + knowledge.len());

    for scored in memory {
        let text = scored.record.content.clone();
        let norm_text = normalize_text(&text);
        entries.push(Entry {
            candidate: EvidenceCandidate {
                estimated_tokens: estimator.estimate(&text),
                relevance: scored.relevance.clamp(0.0, 1.0),
                origin: EvidenceOrigin::Memory,
                origin_id: scored.record.id.clone(),
                source_score: scored.relevance,
                text,
            },
            doc_id: None,
            words: word_set(&norm_text),
            norm_text,
        });
    }

    for scored in knowledge {
        let text = scored.chunk.text.clone();
        let norm_text = normalize_text(&text);
        entries.push(Entry {
            candidate: EvidenceCandidate {
                estimated_tokens: estimator.estimate(&text),
                // cosine in [-1, 1] → fixed-range rescale to [0, 1]
                relevance: ((scored.similarity + 1.0) / 2.0).clamp(0.0, 1.0),
                origin: EvidenceOrigin::Knowledge,
                origin_id: scored.chunk.id.clone(),
                source_score: scored.similarity,
                text,
            },
            doc_id: Some(scored.chunk.source_document_id.clone()),
            words: word_set(&norm_text),
            norm_text,
        });
    }

    // Relevance floor: below it means dropped entirely, not deprioritized.
    let before_floor = entries.len();
    entries.retain(|e| e.candidate.relevance >= min_relevance);
    let dropped_below_floor = before_floor - entries.len();

    // Descending relevance; ties by origin priority, then original source
    // score, then origin id for a deterministic total order.
    entries.sort_by(|a, b| {
        b.candidate
            .relevance
            .partial_cmp(&a.candidate.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let a_pri = a.candidate.origin == config.priority;
                let b_pri = b.candidate.origin == config.priority;
                b_pri.cmp(&a_pri)
            })
            .then_with(|| {
                b.candidate
                    .source_score
                    .partial_cmp(&a.candidate.source_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.candidate.origin_id.cmp(&b.candidate.origin_id))
    });

    // Dedup in ranked order: the first (highest-scoring) instance wins.
    let mut kept: Vec<Entry> = Vec::with_capacity(entries.len());
    let mut deduplicated = 0;
    'outer: for entry in entries {
        for existing in &kept {
            let same_origin = existing.candidate.origin_id == entry.candidate.origin_id;
            let same_document = existing.doc_id.is_some() && existing.doc_id == entry.doc_id;
            let same_text = existing.norm_text == entry.norm_text;
            let overlapping = jaccard(&existing.words, &entry.words) >= config.overlap_threshold;
            if same_origin || same_document || same_text || overlapping {
                deduplicated += 1;
                continue 'outer;
            }
        }
        kept.push(entry);
    }

    debug!(
        candidates = kept.len(),
        dropped_below_floor, deduplicated, "Fusion complete"
    );

    FusedEvidence {
        candidates: kept.into_iter().map(|e| e.candidate).collect(),
        dropped_below_floor,
        deduplicated,
    }
}
