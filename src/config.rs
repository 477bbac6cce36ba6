//! TOML configuration parsing and validation.
//!
//! Every section is optional and falls back to defaults: 1000/100
//! character chunks, top-5 retrieval, 200 character source excerpts, the
//! offline hashing embedder and disabled generation. Validation runs once in
//! [`load_config`] / [`parse_config`] so that bad settings fail at startup
//! instead of on the first request.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    /// Added to the built-in `.git` / `node_modules` excludes.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_content_fields")]
    pub content_fields: Vec<String>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: default_corpus_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            content_fields: default_content_fields(),
        }
    }
}

fn default_corpus_root() -> PathBuf {
    PathBuf::from("./data")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.json".to_string(), "**/*.jsonl".to_string()]
}
fn default_content_fields() -> Vec<String> {
    vec![
        "content".to_string(),
        "text".to_string(),
        "body".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    #[serde(default = "default_keep_snapshots")]
    pub keep_snapshots: usize,
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            keep_snapshots: default_keep_snapshots(),
            build_timeout_secs: default_build_timeout_secs(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./db")
}
fn default_keep_snapshots() -> usize {
    2
}
fn default_build_timeout_secs() -> u64 {
    1800
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
    #[serde(default)]
    pub min_score: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_k: default_max_k(),
            min_score: None,
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_max_k() -> usize {
    50
}

impl RetrievalConfig {
    /// Resolve a caller-supplied K against the configured default and cap.
    pub fn effective_k(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_k)
            .clamp(1, self.max_k.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_deadline_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_output_tokens: None,
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout_secs(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_generation_retries() -> u32 {
    2
}
fn default_generation_timeout_secs() -> u64 {
    60
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SynthesisConfig {
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
    #[serde(default = "default_degrade_on_failure")]
    pub degrade_on_failure: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            context_budget_chars: default_context_budget_chars(),
            excerpt_chars: default_excerpt_chars(),
            degrade_on_failure: default_degrade_on_failure(),
        }
    }
}

fn default_context_budget_chars() -> usize {
    6000
}
fn default_excerpt_chars() -> usize {
    200
}
fn default_degrade_on_failure() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::new(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)
        .map_err(|e| ConfigError::new(format!("failed to parse config file: {}", e)))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.chunking.max_chars == 0 {
        return Err(ConfigError::new("chunking.max_chars must be > 0"));
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        return Err(ConfigError::new(format!(
            "chunking.overlap_chars ({}) must be smaller than chunking.max_chars ({})",
            config.chunking.overlap_chars, config.chunking.max_chars
        )));
    }

    if config.retrieval.max_k == 0 {
        return Err(ConfigError::new("retrieval.max_k must be >= 1"));
    }
    if config.retrieval.default_k == 0 || config.retrieval.default_k > config.retrieval.max_k {
        return Err(ConfigError::new(format!(
            "retrieval.default_k must be in [1, {}]",
            config.retrieval.max_k
        )));
    }

    if config.corpus.include_globs.is_empty() {
        return Err(ConfigError::new("corpus.include_globs must not be empty"));
    }
    if config.corpus.content_fields.is_empty() {
        return Err(ConfigError::new("corpus.content_fields must not be empty"));
    }

    if config.index.keep_snapshots == 0 {
        return Err(ConfigError::new("index.keep_snapshots must be >= 1"));
    }

    let emb = &config.embedding;
    if emb.batch_size == 0 {
        return Err(ConfigError::new("embedding.batch_size must be > 0"));
    }
    match emb.provider.as_str() {
        "hashing" => {
            if emb.dims == Some(0) {
                return Err(ConfigError::new("embedding.dims must be > 0"));
            }
        }
        "openai" | "ollama" => {
            if emb.dims.is_none() || emb.dims == Some(0) {
                return Err(ConfigError::new(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    emb.provider
                )));
            }
            if emb.model.is_none() {
                return Err(ConfigError::new(format!(
                    "embedding.model must be specified when provider is '{}'",
                    emb.provider
                )));
            }
        }
        other => {
            return Err(ConfigError::new(format!(
                "unknown embedding provider: '{}'. Must be hashing, openai, or ollama.",
                other
            )))
        }
    }

    let gen = &config.generation;
    match gen.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" | "gemini" => {
            if gen.model.is_none() {
                return Err(ConfigError::new(format!(
                    "generation.model must be specified when provider is '{}'",
                    gen.provider
                )));
            }
        }
        other => {
            return Err(ConfigError::new(format!(
                "unknown generation provider: '{}'. Must be disabled, openai, ollama, or gemini.",
                other
            )))
        }
    }
    if !(0.0..=2.0).contains(&gen.temperature) {
        return Err(ConfigError::new("generation.temperature must be in [0.0, 2.0]"));
    }

    if config.synthesis.context_budget_chars == 0 {
        return Err(ConfigError::new(
            "synthesis.context_budget_chars must be > 0",
        ));
    }

    Ok(())
}
