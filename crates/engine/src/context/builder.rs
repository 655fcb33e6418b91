//! The context builder — COLLECT → ALLOCATE → COMPRESS → ASSEMBLE.
//!
//! One build call is one coordinating task: the memory store and the vector
//! index are queried concurrently (two independent I/O operations), each
//! under its own timeout, and joined before fusion. A timed-out or failing
//! source degrades to an empty candidate set with a notice; only both
//! failing fails the build. No background work is spawned, so dropping the
//! returned future cancels the in-flight queries with it.
//!
//! # Determinism
//!
//! Assembly is deterministic: identical inputs and unchanged store state
//! produce identical output text. No randomness enters the pipeline.

use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use contextloom_config::FusionConfig;
use contextloom_core::chunk::{ScoredChunk, SearchFilters, VectorIndex};
use contextloom_core::embedding::EmbeddingProvider;
use contextloom_core::error::{EngineError, IndexError};
use contextloom_core::evidence::{ContextAssembly, EvidenceCandidate, Notice};
use contextloom_core::memory::{MemoryStore, RecallQuery, ScoredRecord};
use contextloom_core::request::{BuildLimits, BuildRequest};
use contextloom_core::turn::{ConversationTurn, TurnRole};
use contextloom_embedding::EmbeddingCache;

use super::fusion::fuse;
use super::token::{HeuristicEstimator, TokenEstimator};

const SYSTEM_HEADER: &str = "[System Instructions]\n";
const EVIDENCE_HEADER: &str = "[Relevant Context]\n";
const HISTORY_HEADER: &str = "[Conversation]\n";
const QUERY_HEADER: &str = "[Current Query]\n";

/// Assembles token-budgeted context from memory, knowledge, and history.
pub struct ContextBuilder {
    memory: Arc<dyn MemoryStore>,
    index: Arc<dyn VectorIndex>,
    cache: Arc<EmbeddingCache>,
    embedder: Arc<dyn EmbeddingProvider>,
    estimator: Arc<dyn TokenEstimator>,
    fusion: FusionConfig,
    limits: BuildLimits,
}

/// A budgeted line of output: its position in the source ordering, the
/// rendered text, and (for evidence) the origin id.
struct Line {
    position: usize,
    text: String,
    origin_id: Option<String>,
}

impl ContextBuilder {
    pub fn new(
        memory: Arc<dyn MemoryStore>,
        index: Arc<dyn VectorIndex>,
        cache: Arc<EmbeddingCache>,
        embedder: Arc<dyn EmbeddingProvider>,
        fusion: FusionConfig,
        limits: BuildLimits,
    ) -> Self {
        Self {
            memory,
            index,
            cache,
            embedder,
            estimator: Arc::new(HeuristicEstimator),
            fusion,
            limits,
        }
    }

    /// Swap the token estimator (heuristic by default).
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Run one build call through the full pipeline.
    pub async fn build(&self, request: &BuildRequest) -> Result<ContextAssembly, EngineError> {
        request.config.validate()?;

        let mut notices: Vec<Notice> = Vec::new();

        // ── COLLECT ────────────────────────────────────────────────────────
        let (memory_results, knowledge_results) = self.collect(request, &mut notices).await?;

        let fused = fuse(
            &memory_results,
            &knowledge_results,
            request.config.min_relevance,
            &self.fusion,
            self.estimator.as_ref(),
        );
        if fused.candidates.is_empty() {
            notices.push(Notice::NoEvidence);
        }

        // ── ALLOCATE ───────────────────────────────────────────────────────
        let effective = request.config.effective_budget();

        let system_section = if request.system_instructions.is_empty() {
            String::new()
        } else {
            format!("{SYSTEM_HEADER}{}\n", request.system_instructions)
        };
        let system_tokens = self.estimator.estimate(&system_section);
        if system_tokens > effective {
            return Err(EngineError::BudgetExceededBeforeAllocation {
                segment: "system_instructions".into(),
                needed: system_tokens,
                budget: effective,
            });
        }

        let query_section = format!("{QUERY_HEADER}{}\n", request.user_query);
        let query_tokens = self.estimator.estimate(&query_section);
        if system_tokens + query_tokens > effective {
            return Err(EngineError::BudgetExceededBeforeAllocation {
                segment: "user_query".into(),
                needed: query_tokens,
                budget: effective - system_tokens,
            });
        }

        let mut remaining = effective - system_tokens - query_tokens;

        // History: most recent turns greedily, up to the configured cap.
        let history: Vec<(usize, &ConversationTurn)> = request
            .conversation_history
            .iter()
            .enumerate()
            .filter(|(_, t)| t.role != TurnRole::System)
            .collect();
        let capped_out = history.len().saturating_sub(self.limits.max_history_turns);

        let history_header_tokens = self.estimator.estimate(HISTORY_HEADER);
        let mut history_lines: Vec<Line> = Vec::new();
        let mut dropped_turns: Vec<(usize, &ConversationTurn)> = Vec::new();
        let mut history_used = 0;

        for &(position, turn) in history.iter().rev().take(self.limits.max_history_turns) {
            let text = format!("{}: {}\n", turn.role, turn.content);
            let tokens = 4 + self.estimator.estimate(&text);
            let header = if history_lines.is_empty() {
                history_header_tokens
            } else {
                0
            };
            if history_used + header + tokens <= remaining {
                history_used += header + tokens;
                history_lines.push(Line {
                    position,
                    text,
                    origin_id: None,
                });
            } else {
                dropped_turns.push((position, turn));
            }
        }
        remaining -= history_used;

        // Evidence: highest relevance first.
        let evidence_header_tokens = self.estimator.estimate(EVIDENCE_HEADER);
        let mut evidence_lines: Vec<Line> = Vec::new();
        let mut dropped_evidence: Vec<(usize, &EvidenceCandidate)> = Vec::new();
        let mut evidence_used = 0;

        for (rank, candidate) in fused.candidates.iter().enumerate() {
            let text = format!("- ({}) {}\n", candidate.origin, candidate.text);
            let tokens = self.estimator.estimate(&text);
            let header = if evidence_lines.is_empty() {
                evidence_header_tokens
            } else {
                0
            };
            if evidence_used + header + tokens <= remaining {
                evidence_used += header + tokens;
                evidence_lines.push(Line {
                    position: rank,
                    text,
                    origin_id: Some(candidate.origin_id.clone()),
                });
            } else {
                dropped_evidence.push((rank, candidate));
            }
        }
        remaining -= evidence_used;

        // ── COMPRESS (optional) ────────────────────────────────────────────
        let mut compressed_history = 0;
        let mut compressed_evidence = 0;
        if request.config.enable_compression {
            // Dropped turns are re-admitted as single sentences, oldest last
            // in the iteration order (they were collected newest-first).
            let mut admitted = Vec::new();
            for (i, (position, turn)) in dropped_turns.iter().enumerate() {
                let sentence = first_sentence(&turn.content);
                let text = format!("{}: {}\n", turn.role, sentence);
                let tokens = 4 + self.estimator.estimate(&text);
                let header = if history_lines.is_empty() {
                    history_header_tokens
                } else {
                    0
                };
                if tokens + header <= remaining {
                    remaining -= tokens + header;
                    history_used += tokens + header;
                    history_lines.push(Line {
                        position: *position,
                        text,
                        origin_id: None,
                    });
                    admitted.push(i);
                    compressed_history += 1;
                }
            }
            for i in admitted.into_iter().rev() {
                dropped_turns.remove(i);
            }

            let mut admitted = Vec::new();
            for (i, (rank, candidate)) in dropped_evidence.iter().enumerate() {
                let sentence = first_sentence(&candidate.text);
                let text = format!("- ({}) {}\n", candidate.origin, sentence);
                let tokens = self.estimator.estimate(&text);
                let header = if evidence_lines.is_empty() {
                    evidence_header_tokens
                } else {
                    0
                };
                if tokens + header <= remaining {
                    remaining -= tokens + header;
                    evidence_used += tokens + header;
                    evidence_lines.push(Line {
                        position: *rank,
                        text,
                        origin_id: Some(candidate.origin_id.clone()),
                    });
                    admitted.push(i);
                    compressed_evidence += 1;
                }
            }
            for i in admitted.into_iter().rev() {
                dropped_evidence.remove(i);
            }
        }

        let history_dropped = dropped_turns.len() + capped_out;
        let mut truncated = false;
        if history_dropped > 0 {
            truncated = true;
            notices.push(Notice::Dropped {
                segment: "conversation_history".into(),
                items: history_dropped,
            });
        }
        if !dropped_evidence.is_empty() {
            truncated = true;
            notices.push(Notice::Dropped {
                segment: "evidence".into(),
                items: dropped_evidence.len(),
            });
        }
        if compressed_history > 0 {
            truncated = true;
            notices.push(Notice::Compressed {
                segment: "conversation_history".into(),
            });
        }
        if compressed_evidence > 0 {
            truncated = true;
            notices.push(Notice::Compressed {
                segment: "evidence".into(),
            });
        }

        // ── ASSEMBLE ───────────────────────────────────────────────────────
        // Fixed section order: system instructions, evidence, history, query.
        evidence_lines.sort_by_key(|l| l.position);
        history_lines.sort_by_key(|l| l.position);

        let mut assembled = String::new();
        if !system_section.is_empty() {
            assembled.push_str(&system_section);
        }
        if !evidence_lines.is_empty() {
            assembled.push_str(EVIDENCE_HEADER);
            for line in &evidence_lines {
                assembled.push_str(&line.text);
            }
        }
        if !history_lines.is_empty() {
            assembled.push_str(HISTORY_HEADER);
            for line in &history_lines {
                assembled.push_str(&line.text);
            }
        }
        assembled.push_str(&query_section);

        let included_sources: Vec<String> = evidence_lines
            .iter()
            .filter_map(|l| l.origin_id.clone())
            .collect();

        let total_tokens = system_tokens + query_tokens + history_used + evidence_used;
        debug_assert!(total_tokens <= effective);

        info!(
            total_tokens,
            budget = effective,
            sources = included_sources.len(),
            turns = history_lines.len(),
            truncated,
            "Context assembled"
        );

        Ok(ContextAssembly {
            assembled_text: assembled,
            total_tokens,
            included_sources,
            truncated,
            notices,
        })
    }

    /// Fan out to both evidence sources concurrently and join.
    async fn collect(
        &self,
        request: &BuildRequest,
        notices: &mut Vec<Notice>,
    ) -> Result<(Vec<ScoredRecord>, Vec<ScoredChunk>), EngineError> {
        // The query embedding is computed once through the cache and shared
        // by both sources. The fallback provider absorbs embedding failures;
        // anything that still escapes degrades the knowledge source only.
        let query_embedding = match self
            .cache
            .get_or_compute(&request.user_query, self.embedder.as_ref())
            .await
        {
            Ok(vector) => Some(vector.as_ref().clone()),
            Err(e) => {
                warn!(error = %e, "Query embedding unavailable, memory degrades to keyword recall");
                None
            }
        };

        let recall_query = RecallQuery {
            user_id: request.user_id.clone(),
            text: request.user_query.clone(),
            embedding: query_embedding.clone(),
            types: Vec::new(),
            limit: self.limits.max_evidence,
            min_score: 0.0,
        };

        let (memory_out, knowledge_out) = tokio::join!(
            timeout(self.limits.source_timeout, self.memory.recall(&recall_query)),
            async {
                match &query_embedding {
                    Some(vector) => {
                        timeout(
                            self.limits.source_timeout,
                            self.index.search(
                                vector,
                                self.limits.max_evidence,
                                &SearchFilters::default(),
                            ),
                        )
                        .await
                    }
                    None => Ok(Err(IndexError::QueryFailed(
                        "query embedding unavailable".into(),
                    ))),
                }
            }
        );

        let mut failed = 0;

        let memory_results = match memory_out {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                failed += 1;
                notices.push(Notice::SourceDegraded {
                    source: "memory".into(),
                    reason: e.to_string(),
                });
                Vec::new()
            }
            Err(_) => {
                failed += 1;
                notices.push(Notice::SourceDegraded {
                    source: "memory".into(),
                    reason: format!("timed out after {:?}", self.limits.source_timeout),
                });
                Vec::new()
            }
        };

        let knowledge_results = match knowledge_out {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                failed += 1;
                notices.push(Notice::SourceDegraded {
                    source: "knowledge".into(),
                    reason: e.to_string(),
                });
                Vec::new()
            }
            Err(_) => {
                failed += 1;
                notices.push(Notice::SourceDegraded {
                    source: "knowledge".into(),
                    reason: format!("timed out after {:?}", self.limits.source_timeout),
                });
                Vec::new()
            }
        };

        if failed == 2 {
            let reason = notices
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(EngineError::AllSourcesUnavailable { reason });
        }

        debug!(
            memory = memory_results.len(),
            knowledge = knowledge_results.len(),
            "Evidence collected"
        );
        Ok((memory_results, knowledge_results))
    }
}

/// First sentence of `text` — the compression unit. Falls back to a hard
/// cut when no sentence terminator appears within a reasonable span.
fn first_sentence(text: &str) -> String {
    let trimmed = text.trim();
    for (i, c) in trimmed.char_indices() {
        if matches!(c, '.' | '!' | '?' | '\n') {
            return trimmed[..i + c.len_utf8()].trim_end().to_string();
        }
    }
    if trimmed.len() > 160 {
        let mut cut = 160;
        while !trimmed.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &trimmed[..cut])
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextloom_core::memory::{MemoryRecord, MemoryType};
    use contextloom_core::request::BuildConfig;
    use contextloom_embedding::HashedEmbedder;
    use contextloom_index::InMemoryIndex;
    use contextloom_memory::InMemoryStore;

    fn builder_with(
        memory: Arc<dyn MemoryStore>,
        index: Arc<dyn VectorIndex>,
        limits: BuildLimits,
    ) -> ContextBuilder {
        ContextBuilder::new(
            memory,
            index,
            Arc::new(EmbeddingCache::new(128)),
            Arc::new(HashedEmbedder::new(64)),
            FusionConfig::default(),
            limits,
        )
    }

    fn empty_builder() -> ContextBuilder {
        builder_with(
            Arc::new(InMemoryStore::default()),
            Arc::new(InMemoryIndex::new()),
            BuildLimits::default(),
        )
    }

    #[tokio::test]
    async fn invalid_config_rejected_before_collect() {
        let builder = empty_builder();
        let request = BuildRequest::new("u1", "query").with_config(BuildConfig {
            reserve_ratio: 1.5,
            ..Default::default()
        });
        let err = builder.build(&request).await.unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }

    #[tokio::test]
    async fn empty_sources_succeed_with_notice() {
        let builder = empty_builder();
        let request = BuildRequest::new("u1", "anything at all")
            .with_instructions("You are a helpful assistant.");

        let result = builder.build(&request).await.unwrap();
        assert!(result.notices.contains(&Notice::NoEvidence));
        assert!(result.assembled_text.contains("[System Instructions]"));
        assert!(result.assembled_text.contains("[Current Query]"));
        assert!(result.included_sources.is_empty());
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn oversized_instructions_error_names_segment() {
        let builder = empty_builder();
        let request = BuildRequest::new("u1", "q")
            .with_instructions("x".repeat(4000))
            .with_config(BuildConfig {
                max_tokens: 100,
                reserve_ratio: 0.0,
                ..Default::default()
            });

        let err = builder.build(&request).await.unwrap_err();
        match err {
            EngineError::BudgetExceededBeforeAllocation { segment, .. } => {
                assert_eq!(segment, "system_instructions");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn sections_render_in_fixed_order() {
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::default());
        memory
            .add(MemoryRecord::new(
                "u1",
                MemoryType::Semantic,
                "user is building a pandas data tool",
                0.9,
            ))
            .await
            .unwrap();

        let builder = builder_with(
            memory,
            Arc::new(InMemoryIndex::new()),
            BuildLimits::default(),
        );
        let request = BuildRequest::new("u1", "pandas memory tips")
            .with_instructions("Answer precisely.")
            .with_history(vec![
                ConversationTurn::user("I work with big CSVs"),
                ConversationTurn::assistant("Pandas can handle those."),
            ])
            .with_config(BuildConfig {
                min_relevance: 0.1,
                ..Default::default()
            });

        let result = builder.build(&request).await.unwrap();
        let text = &result.assembled_text;

        let sys = text.find("[System Instructions]").unwrap();
        let ev = text.find("[Relevant Context]").unwrap();
        let hist = text.find("[Conversation]").unwrap();
        let query = text.find("[Current Query]").unwrap();
        assert!(sys < ev && ev < hist && hist < query);

        // History renders chronologically
        let first = text.find("big CSVs").unwrap();
        let second = text.find("can handle those").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn build_is_deterministic() {
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::default());
        memory
            .add(MemoryRecord::new("u1", MemoryType::Semantic, "likes rust", 0.8))
            .await
            .unwrap();

        let builder = builder_with(
            memory,
            Arc::new(InMemoryIndex::new()),
            BuildLimits::default(),
        );
        let request = BuildRequest::new("u1", "rust advice")
            .with_instructions("Be concise.")
            .with_config(BuildConfig {
                min_relevance: 0.1,
                ..Default::default()
            });

        let a = builder.build(&request).await.unwrap();
        let b = builder.build(&request).await.unwrap();
        assert_eq!(a.assembled_text, b.assembled_text);
        assert_eq!(a.total_tokens, b.total_tokens);
        assert_eq!(a.included_sources, b.included_sources);
    }

    #[tokio::test]
    async fn history_cap_limits_turns() {
        let builder = builder_with(
            Arc::new(InMemoryStore::default()),
            Arc::new(InMemoryIndex::new()),
            BuildLimits {
                max_history_turns: 2,
                ..Default::default()
            },
        );

        let history: Vec<ConversationTurn> = (0..6)
            .map(|i| ConversationTurn::user(format!("turn number {i}")))
            .collect();
        let request = BuildRequest::new("u1", "q")
            .with_instructions("sys")
            .with_history(history);

        let result = builder.build(&request).await.unwrap();
        assert!(result.assembled_text.contains("turn number 5"));
        assert!(result.assembled_text.contains("turn number 4"));
        assert!(!result.assembled_text.contains("turn number 3"));
        assert!(result.truncated);
        assert!(result
            .notices
            .iter()
            .any(|n| matches!(n, Notice::Dropped { segment, items: 4 } if segment == "conversation_history")));
    }

    #[tokio::test]
    async fn tight_budget_drops_oldest_turns_first() {
        let builder = empty_builder();
        let history = vec![
            ConversationTurn::user("oldest turn with plenty of words in it"),
            ConversationTurn::assistant("middle turn, also fairly wordy overall"),
            ConversationTurn::user("newest"),
        ];
        let request = BuildRequest::new("u1", "q")
            .with_history(history)
            .with_config(BuildConfig {
                max_tokens: 30,
                reserve_ratio: 0.0,
                min_relevance: 0.0,
                enable_compression: false,
            });

        let result = builder.build(&request).await.unwrap();
        assert!(result.assembled_text.contains("newest"));
        assert!(!result.assembled_text.contains("oldest turn"));
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn compression_readmits_first_sentence() {
        let builder = empty_builder();
        let long_old = "First sentence kept here. Then a very long tail that absolutely \
                        would not fit into the remaining budget no matter what because it \
                        keeps going on and on with more and more words.";
        let history = vec![
            ConversationTurn::user(long_old),
            ConversationTurn::user("short new turn"),
        ];
        let request = BuildRequest::new("u1", "q")
            .with_history(history)
            .with_config(BuildConfig {
                max_tokens: 40,
                reserve_ratio: 0.0,
                min_relevance: 0.0,
                enable_compression: true,
            });

        let result = builder.build(&request).await.unwrap();
        assert!(result.assembled_text.contains("short new turn"));
        assert!(result.assembled_text.contains("First sentence kept here."));
        assert!(!result.assembled_text.contains("on and on"));
        assert!(result
            .notices
            .iter()
            .any(|n| matches!(n, Notice::Compressed { segment } if segment == "conversation_history")));
    }

    #[test]
    fn first_sentence_extraction() {
        assert_eq!(first_sentence("One. Two. Three."), "One.");
        assert_eq!(first_sentence("No terminator here"), "No terminator here");
        assert_eq!(first_sentence("Question? Answer."), "Question?");
        let long = "word ".repeat(100);
        let cut = first_sentence(&long);
        assert!(cut.len() <= 170);
        assert!(cut.ends_with('…'));
    }
}
