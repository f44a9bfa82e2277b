//! Configuration for the Engram memory system.
//!
//! Loaded from `~/.engram/config.json` with environment-variable overrides.
//! Every component receives its config section at construction; nothing
//! reads ambient global state, so tests can substitute fakes per adapter.
//!
//! # Environment Variable Mapping
//!
//! - `ENGRAM_GRAPH_DB_PATH` → graph.data_dir
//! - `ENGRAM_VECTOR_BACKEND` → vector.backend
//! - `ENGRAM_QDRANT_URL` → vector.url
//! - `ENGRAM_EMBEDDING_PROVIDER` → embedding.provider
//! - `OPENAI_API_KEY` → embedding.api_key
//! - `ENGRAM_LOG_LEVEL` → logging.level

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".engram"),
        |dirs| dirs.home_dir().join(".engram"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Top-level Engram configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngramConfig {
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Graph store configuration (embedded SQLite).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Directory holding the graph database file.
    #[serde(default = "default_graph_dir")]
    pub data_dir: PathBuf,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            data_dir: default_graph_dir(),
        }
    }
}

fn default_graph_dir() -> PathBuf {
    config_dir().join("graph")
}

/// Vector store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Backend selector: "qdrant" or "memory".
    #[serde(default = "default_vector_backend")]
    pub backend: String,
    /// Qdrant server URL.
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    /// Qdrant collection name.
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            url: default_qdrant_url(),
            collection: default_collection(),
        }
    }
}

fn default_vector_backend() -> String {
    "qdrant".into()
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

fn default_collection() -> String {
    "engram".into()
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider selector: "openai" or "noop".
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// API key for the provider.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL for OpenAI-compatible endpoints.
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    /// Model identifier.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Fixed output dimensionality of the configured model.
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".into()
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_embedding_dimensions() -> usize {
    1536
}

/// Ingestion pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Max chunk/table embedding requests in flight at once.
    #[serde(default = "default_max_concurrent_embeds")]
    pub max_concurrent_embeds: usize,
    /// Retry attempts per failed embedding before degrading to text-only.
    #[serde(default = "default_embed_retries")]
    pub embed_retries: usize,
    /// Retry attempts for store writes before surfacing the failure.
    #[serde(default = "default_store_retries")]
    pub store_retries: usize,
    /// Base delay for exponential backoff between retries.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_embeds: default_max_concurrent_embeds(),
            embed_retries: default_embed_retries(),
            store_retries: default_store_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

fn default_max_concurrent_embeds() -> usize {
    4
}

fn default_embed_retries() -> usize {
    2
}

fn default_store_retries() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

/// Hybrid retrieval tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Vector search fetches `k * fetch_multiplier` candidates for merging.
    #[serde(default = "default_fetch_multiplier")]
    pub fetch_multiplier: usize,
    /// Maximum relationship hops from a graph seed.
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,
    /// Per-source search timeout; a slow store must not stall the other.
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fetch_multiplier: default_fetch_multiplier(),
            max_hops: default_max_hops(),
            search_timeout_ms: default_search_timeout_ms(),
        }
    }
}

fn default_fetch_multiplier() -> usize {
    3
}

fn default_max_hops() -> u32 {
    2
}

fn default_search_timeout_ms() -> u64 {
    5_000
}

/// Reasoning loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Iteration ceiling for the tool-calling loop.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Retry attempts for the language-model collaborator per iteration.
    #[serde(default = "default_provider_retries")]
    pub provider_retries: usize,
    /// Consecutive store-unavailable tool failures tolerated before aborting.
    #[serde(default = "default_store_failure_budget")]
    pub store_failure_budget: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            provider_retries: default_provider_retries(),
            store_failure_budget: default_store_failure_budget(),
        }
    }
}

fn default_max_iterations() -> usize {
    8
}

fn default_provider_retries() -> usize {
    2
}

fn default_store_failure_budget() -> usize {
    2
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty".
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl EngramConfig {
    /// Load configuration: file values, then env overrides, then defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file(&config_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from an explicit path; missing file yields defaults.
    pub fn load_file(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing config at {}", path.display()))
    }

    /// Apply `ENGRAM_*` (and provider key) environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("ENGRAM_GRAPH_DB_PATH") {
            self.graph.data_dir = PathBuf::from(path);
        }
        if let Ok(backend) = std::env::var("ENGRAM_VECTOR_BACKEND") {
            self.vector.backend = backend;
        }
        if let Ok(url) = std::env::var("ENGRAM_QDRANT_URL") {
            self.vector.url = url;
        }
        if let Ok(provider) = std::env::var("ENGRAM_EMBEDDING_PROVIDER") {
            self.embedding.provider = provider;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if self.embedding.api_key.is_none() {
                self.embedding.api_key = Some(key);
            }
        }
        if let Ok(level) = std::env::var("ENGRAM_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Persist the configuration as pretty JSON.
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing config to {}", path.display()))
    }
}
