//! Recall scoring and summary rendering — shared by every backend.
//!
//! Recall relevance blends semantic similarity (when a query embedding is
//! available) with recency-decayed importance. The blend weights are
//! configuration, not constants; see `RecallWeights`.

use chrono::{DateTime, Utc};

use contextloom_core::embedding::cosine_similarity;
use contextloom_core::memory::{MemoryRecord, MemoryType, RecallQuery, RecallWeights};

/// Importance with recency decay applied: halves every `half_life_days`
/// since the record was last accessed, so older unaccessed records score
/// lower.
pub fn effective_importance(record: &MemoryRecord, now: DateTime<Utc>, weights: &RecallWeights) -> f32 {
    let age_days = ((now - record.last_accessed_at).num_seconds().max(0) as f32) / 86_400.0;
    record.importance * 0.5_f32.powf(age_days / weights.half_life_days)
}

/// Keyword-occurrence relevance of `content` for `query_text`, in [0, 1].
pub fn keyword_score(content: &str, query_text: &str) -> f32 {
    let query = query_text.trim().to_lowercase();
    if query.is_empty() {
        return 0.0;
    }
    let content_lower = content.to_lowercase();

    // Score each query term, then average: partial matches still count.
    let terms: Vec<&str> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        return 0.0;
    }

    let matched = terms
        .iter()
        .filter(|t| content_lower.contains(**t))
        .count();
    matched as f32 / terms.len() as f32
}

/// Blended recall relevance in [0, 1].
pub fn blended_relevance(
    record: &MemoryRecord,
    query: &RecallQuery,
    now: DateTime<Utc>,
    weights: &RecallWeights,
) -> f32 {
    let similarity01 = match (&query.embedding, &record.embedding) {
        (Some(q), Some(e)) => (cosine_similarity(e, q) + 1.0) / 2.0,
        _ => keyword_score(&record.content, &query.text),
    };

    let importance = effective_importance(record, now, weights);
    let norm = weights.semantic_weight + weights.importance_weight;
    ((weights.semantic_weight * similarity01 + weights.importance_weight * importance) / norm)
        .clamp(0.0, 1.0)
}

/// Render a stable summary of a user's records.
///
/// Ordering is deterministic (importance desc, created_at asc, id asc) and
/// truncation to `limit` keeps the front of that order, so the
/// highest-importance record is never lost. Records are grouped by type in
/// fixed section order.
pub fn render_summary(user_id: &str, records: &[MemoryRecord], limit: usize) -> String {
    if records.is_empty() {
        return format!("No memories stored for user '{user_id}'.");
    }

    let mut ordered: Vec<&MemoryRecord> = records.iter().collect();
    ordered.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    let shown = &ordered[..ordered.len().min(limit)];

    let mut out = format!(
        "Memory summary for user '{user_id}': {} of {} record(s).\n",
        shown.len(),
        records.len()
    );

    for memory_type in [MemoryType::Working, MemoryType::Semantic, MemoryType::Episodic] {
        let section: Vec<&&MemoryRecord> =
            shown.iter().filter(|r| r.memory_type == memory_type).collect();
        if section.is_empty() {
            continue;
        }
        out.push_str(&format!("[{memory_type}]\n"));
        for record in section {
            out.push_str(&format!("- ({:.2}) {}\n", record.importance, record.content));
        }
    }

    out
}
