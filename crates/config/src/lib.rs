//! Configuration loading, validation, and management for contextloom.
//!
//! Loads configuration from `~/.contextloom/config.toml` with environment
//! variable overrides. Validates all settings at startup so a bad budget or
//! blend configuration is rejected before any build runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use contextloom_core::evidence::EvidenceOrigin;
use contextloom_core::memory::RecallWeights;
use contextloom_core::request::{BuildConfig, BuildLimits};

/// The root configuration structure.
///
/// Maps directly to `~/.contextloom/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Embedding provider configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Embedding cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Memory recall blend weights.
    #[serde(default)]
    pub recall: RecallWeights,

    /// Fusion/ranking configuration.
    #[serde(default)]
    pub fusion: FusionConfig,

    /// Default budget configuration for builds.
    #[serde(default)]
    pub build: BuildDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            cache: CacheConfig::default(),
            recall: RecallWeights::default(),
            fusion: FusionConfig::default(),
            build: BuildDefaults::default(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("embedding", &self.embedding)
            .field("cache", &self.cache)
            .field("recall", &self.recall)
            .field("fusion", &self.fusion)
            .field("build", &self.build)
            .finish()
    }
}

/// Embedding provider selection.
#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "hashed" (deterministic, offline) or "remote" (OpenAI-compatible
    /// endpoint with hashed fallback).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Model identifier for the remote provider.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Output dimension of the hashed fallback.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Base URL of the remote embeddings endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// API key for the remote endpoint (env override: CONTEXTLOOM_API_KEY).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_embedding_provider() -> String {
    "hashed".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_dimension() -> usize {
    256
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            api_url: None,
            api_key: None,
        }
    }
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

/// Embedding cache configuration. Eviction is explicit here, never implicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of vectors held in memory (least-recently-used
    /// eviction beyond this).
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Optional JSONL file for persisted vectors. None = memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_path: Option<PathBuf>,
}

fn default_cache_capacity() -> usize {
    4096
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            persist_path: None,
        }
    }
}

/// Fusion/ranking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Word-set Jaccard overlap at or above which two candidates are
    /// considered duplicates.
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f32,

    /// Which origin wins score ties.
    #[serde(default = "default_priority")]
    pub priority: EvidenceOrigin,
}

fn default_overlap_threshold() -> f32 {
    0.85
}
fn default_priority() -> EvidenceOrigin {
    EvidenceOrigin::Memory
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: default_overlap_threshold(),
            priority: default_priority(),
        }
    }
}

/// Default budget configuration applied when a build request does not carry
/// its own, plus operational limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildDefaults {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_reserve_ratio")]
    pub reserve_ratio: f32,

    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,

    #[serde(default)]
    pub enable_compression: bool,

    /// Per-source timeout in milliseconds.
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,

    /// Cap on conversation turns considered, newest first.
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    /// Candidates requested from each source before fusion.
    #[serde(default = "default_max_evidence")]
    pub max_evidence: usize,
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
fn default_source_timeout_ms() -> u64 {
    5000
}
fn default_max_history_turns() -> usize {
    20
}
fn default_max_evidence() -> usize {
    10
}

impl Default for BuildDefaults {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            reserve_ratio: default_reserve_ratio(),
            min_relevance: default_min_relevance(),
            enable_compression: false,
            source_timeout_ms: default_source_timeout_ms(),
            max_history_turns: default_max_history_turns(),
            max_evidence: default_max_evidence(),
        }
    }
}

impl BuildDefaults {
    /// Budget configuration for a build that did not specify one.
    pub fn to_build_config(&self) -> BuildConfig {
        BuildConfig {
            max_tokens: self.max_tokens,
            reserve_ratio: self.reserve_ratio,
            min_relevance: self.min_relevance,
            enable_compression: self.enable_compression,
        }
    }

    /// Operational limits for a build.
    pub fn to_build_limits(&self) -> BuildLimits {
        BuildLimits {
            source_timeout: Duration::from_millis(self.source_timeout_ms),
            max_history_turns: self.max_history_turns,
            max_evidence: self.max_evidence,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.contextloom/config.toml).
    ///
    /// Environment overrides:
    /// - `CONTEXTLOOM_API_KEY` — remote embedding endpoint key
    /// - `CONTEXTLOOM_EMBEDDING_PROVIDER` — "hashed" or "remote"
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.embedding.api_key.is_none() {
            config.embedding.api_key = std::env::var("CONTEXTLOOM_API_KEY").ok();
        }
        if let Ok(provider) = std::env::var("CONTEXTLOOM_EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".contextloom")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.build
            .to_build_config()
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if self.recall.semantic_weight < 0.0 || self.recall.importance_weight < 0.0 {
            return Err(ConfigError::ValidationError(
                "recall weights must be non-negative".into(),
            ));
        }
        if self.recall.semantic_weight + self.recall.importance_weight <= 0.0 {
            return Err(ConfigError::ValidationError(
                "semantic_weight + importance_weight must be > 0".into(),
            ));
        }
        if self.recall.half_life_days <= 0.0 {
            return Err(ConfigError::ValidationError(
                "half_life_days must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fusion.overlap_threshold) {
            return Err(ConfigError::ValidationError(
                "overlap_threshold must be in [0, 1]".into(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(ConfigError::ValidationError(
                "embedding dimension must be greater than 0".into(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "cache capacity must be greater than 0".into(),
            ));
        }

        match self.embedding.provider.as_str() {
            "hashed" | "remote" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown embedding provider '{other}' (expected \"hashed\" or \"remote\")"
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
