//! Build request and budget configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::turn::ConversationTurn;

/// Per-build budget configuration. Validated before any collection happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Total token budget for the assembled context.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Fraction of `max_tokens` held back to absorb token-estimation error.
    /// Must be in [0, 1).
    #[serde(default = "default_reserve_ratio")]
    pub reserve_ratio: f32,

    /// Evidence below this normalized relevance is dropped entirely.
    /// Must be in [0, 1].
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,

    /// Compress low-priority segments instead of dropping them outright.
    #[serde(default)]
    pub enable_compression: bool,
}

fn default_max_tokens() -> usize {
    4096
}
fn default_reserve_ratio() -> f32 {
    0.1
}
fn default_min_relevance() -> f32 {
    0.2
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            reserve_ratio: default_reserve_ratio(),
            min_relevance: default_min_relevance(),
            enable_compression: false,
        }
    }
}

impl BuildConfig {
    /// Reject invalid budget configuration before COLLECT.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_tokens == 0 {
            return Err(EngineError::Config {
                message: "max_tokens must be greater than 0".into(),
            });
        }
        if !(0.0..1.0).contains(&self.reserve_ratio) {
            return Err(EngineError::Config {
                message: format!(
                    "reserve_ratio must be in [0, 1), got {}",
                    self.reserve_ratio
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.min_relevance) {
            return Err(EngineError::Config {
                message: format!(
                    "min_relevance must be in [0, 1], got {}",
                    self.min_relevance
                ),
            });
        }
        Ok(())
    }

    /// Tokens actually spendable after the reserve is held back.
    pub fn effective_budget(&self) -> usize {
        (self.max_tokens as f64 * (1.0 - self.reserve_ratio as f64)).floor() as usize
    }
}

/// Operational limits for one build call.
#[derive(Debug, Clone)]
pub struct BuildLimits {
    /// Timeout applied to each evidence source independently.
    pub source_timeout: Duration,

    /// Cap on conversation turns considered, newest first.
    pub max_history_turns: usize,

    /// How many candidates to request from each source before fusion.
    pub max_evidence: usize,
}

impl Default for BuildLimits {
    fn default() -> Self {
        Self {
            source_timeout: Duration::from_secs(5),
            max_history_turns: 20,
            max_evidence: 10,
        }
    }
}

/// All inputs for a single build call.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Whose memory to recall.
    pub user_id: String,

    /// The latest user query — the retrieval key and the final context
    /// section.
    pub user_query: String,

    /// Prior turns in insertion order.
    pub conversation_history: Vec<ConversationTurn>,

    /// Fixed, non-evictable instructions segment.
    pub system_instructions: String,

    /// Budget configuration for this call.
    pub config: BuildConfig,
}

impl BuildRequest {
    pub fn new(user_id: impl Into<String>, user_query: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_query: user_query.into(),
            conversation_history: Vec::new(),
            system_instructions: String::new(),
            config: BuildConfig::default(),
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.system_instructions = instructions.into();
        self
    }

    pub fn with_config(mut self, config: BuildConfig) -> Self {
        self.config = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(BuildConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_max_tokens_rejected() {
        let cfg = BuildConfig {
            max_tokens: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn reserve_ratio_bounds() {
        let mut cfg = BuildConfig {
            reserve_ratio: 1.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        cfg.reserve_ratio = -0.1;
        assert!(cfg.validate().is_err());
        cfg.reserve_ratio = 0.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn min_relevance_bounds() {
        let cfg = BuildConfig {
            min_relevance: 1.2,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn effective_budget_applies_reserve() {
        let cfg = BuildConfig {
            max_tokens: 3000,
            reserve_ratio: 0.2,
            ..Default::default()
        };
        assert_eq!(cfg.effective_budget(), 2400);
    }

    #[test]
    fn request_builder_chain() {
        let req = BuildRequest::new("u1", "how do I reduce memory usage?")
            .with_instructions("You are a helpful data engineering advisor.")
            .with_history(vec![ConversationTurn::user("earlier question")]);
        assert_eq!(req.user_id, "u1");
        assert_eq!(req.conversation_history.len(), 1);
        assert!(!req.system_instructions.is_empty());
    }
}
