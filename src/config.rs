//! Configuration parsing and validation.
//!
//! askdocs is configured via a TOML file (default: `config/askdocs.toml`).
//! Only `[storage]` is required; every other section falls back to
//! offline-friendly defaults (hash embeddings, echo generation).
//!
//! # Example
//!
//! ```toml
//! [storage]
//! path = "./storage"
//!
//! [chunking]
//! max_tokens = 256
//! overlap_tokens = 32
//!
//! [retrieval]
//! top_k = 4
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "cohere"
//! model = "command-r"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! max_upload_bytes = 67108864
//! max_sessions = 256
//! session_ttl_secs = 3600
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Where the persisted index lives.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding `index.sqlite`; created on first rebuild.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    256
}
fn default_overlap() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> i64 {
    askdocs_core::index::DEFAULT_TOP_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    /// Base URL for self-hosted providers (ollama).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: Some(384),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            max_input_chars: default_max_input_chars(),
            url: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
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
fn default_max_input_chars() -> usize {
    askdocs_core::embedding::DEFAULT_MAX_INPUT_CHARS
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
            url: None,
            temperature: default_temperature(),
        }
    }
}

fn default_generation_provider() -> String {
    "echo".to_string()
}
fn default_generation_timeout() -> u64 {
    60
}
fn default_generation_retries() -> u32 {
    3
}
fn default_temperature() -> f32 {
    0.2
}

/// Filters applied when loading a directory.
#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Request body limit for upload endpoints. Files travel base64-encoded,
    /// so the largest accepted file is about three quarters of this.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Ephemeral sessions kept in memory; the least recently used one is
    /// evicted when a new session would exceed this.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Ephemeral sessions idle for longer than this are dropped.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
            max_sessions: default_max_sessions(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_max_upload_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_max_sessions() -> usize {
    256
}

fn default_session_ttl_secs() -> u64 {
    3600
}

impl Config {
    /// Defaults rooted at `storage`: hash embeddings, echo generation.
    pub fn minimal(storage: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                path: storage.into(),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            loader: LoaderConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate embedding
    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" => {}
        "hash" => {
            if embedding.dims.unwrap_or(0) == 0 {
                anyhow::bail!("embedding.dims must be > 0 when provider is 'hash'");
            }
        }
        "openai" | "ollama" | "local" => {
            if embedding.dims.unwrap_or(0) == 0 {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    embedding.provider
                );
            }
            if embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }
    if embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.generation.provider.as_str() {
        "disabled" | "echo" => {}
        "openai" | "ollama" | "cohere" => {
            if config.generation.model.is_none() {
                anyhow::bail!(
                    "generation.model must be specified when provider is '{}'",
                    config.generation.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, echo, openai, ollama, or cohere.",
            other
        ),
    }

    // Validate server
    if config.server.max_upload_bytes == 0 {
        anyhow::bail!("server.max_upload_bytes must be > 0");
    }
    if config.server.max_sessions == 0 {
        anyhow::bail!("server.max_sessions must be > 0");
    }
    if config.server.session_ttl_secs == 0 {
        anyhow::bail!("server.session_ttl_secs must be > 0");
    }

    Ok(())
}
