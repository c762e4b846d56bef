//! Embedding backends.
//!
//! Concrete implementations of [`askdocs_core::embedding::Embedder`]:
//! - **[`DisabledEmbedder`]**: always fails; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: runs a model in-process via fastembed (feature
//!   `local-embeddings-fastembed`); no network calls after the model download.
//! - **[`HashEmbedder`]**: deterministic feature hashing, fully offline.
//!
//! Every backend built by [`create_embedder`] is wrapped in [`Bounded`], so
//! each call is limited to `embedding.timeout_secs`.
//!
//! ```rust,no_run
//! # use askdocs::config::EmbeddingConfig;
//! # use askdocs::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "hash", dims = 384
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_id(), "hash-384");
//! ```

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;

pub use askdocs_core::embedding::{Embedder, HashEmbedder};
use askdocs_core::{QaError, Result};

use crate::backend::{bounded, http_client, post_json_with_retry};
use crate::config::EmbeddingConfig;

// ============ Disabled ============

/// Embedder that refuses every request.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_id(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(QaError::EmbeddingUnavailable(
            "embedding provider is disabled".to_string(),
        ))
    }
}

// ============ OpenAI ============

/// Embedder using `POST https://api.openai.com/v1/embeddings`.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    max_input_chars: usize,
    max_retries: u32,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = http_client(config.timeout_secs).map_err(anyhow::Error::msg)?;

        Ok(Self {
            model,
            dims,
            max_input_chars: config.max_input_chars,
            max_retries: config.max_retries,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let json = post_json_with_retry("OpenAI", self.max_retries, || {
            self.client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
        })
        .await
        .map_err(QaError::EmbeddingUnavailable)?;

        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| malformed("OpenAI", "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| malformed("OpenAI", "missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        indexed.push((index, to_f32_vec("OpenAI", embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedder using a local Ollama instance (`POST {url}/api/embed`).
///
/// Requires an embedding model to be pulled, e.g. `ollama pull nomic-embed-text`.
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_input_chars: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = http_client(config.timeout_secs).map_err(anyhow::Error::msg)?;

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            max_input_chars: config.max_input_chars,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/api/embed", self.url);

        let json = post_json_with_retry("Ollama", self.max_retries, || {
            self.client
                .post(&endpoint)
                .header("Content-Type", "application/json")
                .json(&body)
        })
        .await
        .map_err(|e| {
            QaError::EmbeddingUnavailable(format!("{} (is Ollama running at {}?)", e, self.url))
        })?;

        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| malformed("Ollama", "missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            let values = embedding
                .as_array()
                .ok_or_else(|| malformed("Ollama", "embedding is not an array"))?;
            to_f32_vec("Ollama", values)
        })
        .collect()
}

// ============ Local (fastembed) ============

/// In-process embedder backed by fastembed.
///
/// The model is downloaded from Hugging Face on first use, cached, and kept
/// loaded for the lifetime of the embedder.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    max_input_chars: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        // Fail on unknown names at startup rather than on first use.
        config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            dims,
            max_input_chars: config.max_input_chars,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_id(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let slot = Arc::clone(&self.model);
        let model_name = self.model_name.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| QaError::EmbeddingUnavailable("local model lock poisoned".into()))?;
            if guard.is_none() {
                let choice = config_to_fastembed_model(&model_name)
                    .map_err(|e| QaError::EmbeddingUnavailable(e.to_string()))?;
                let loaded = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(choice).with_show_download_progress(true),
                )
                .map_err(|e| {
                    QaError::EmbeddingUnavailable(format!(
                        "failed to initialize local embedding model: {}",
                        e
                    ))
                })?;
                *guard = Some(loaded);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| QaError::EmbeddingUnavailable("local model not loaded".into()))?;
            model.embed(texts, Some(batch_size)).map_err(|e| {
                QaError::EmbeddingUnavailable(format!("local embedding failed: {}", e))
            })
        })
        .await
        .map_err(|e| QaError::EmbeddingUnavailable(format!("embedding task failed: {}", e)))?
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| "all-minilm-l6-v2".to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "bge-base-en-v1.5" | "nomic-embed-text-v1.5" | "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    });

    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> anyhow::Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base, \
             multilingual-e5-large",
            other
        ),
    }
}

// ============ Time bound ============

/// Wraps an embedder so every [`Embedder::embed`] call is time-bounded.
pub struct Bounded<E> {
    inner: E,
    timeout_secs: u64,
}

impl<E: Embedder> Bounded<E> {
    pub fn new(inner: E, timeout_secs: u64) -> Self {
        Self {
            inner,
            timeout_secs,
        }
    }
}

#[async_trait]
impl<E: Embedder> Embedder for Bounded<E> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    fn max_input_chars(&self) -> usize {
        self.inner.max_input_chars()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bounded("embedding", self.timeout_secs, self.inner.embed(texts)).await
    }
}

/// Create the configured [`Embedder`].
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"hash"` | [`HashEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (feature `local-embeddings-fastembed`) |
///
/// # Errors
///
/// Unknown provider names, missing model/dims, missing API keys, or a
/// `local` provider without the fastembed feature.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    let secs = config.timeout_secs;
    let embedder: Arc<dyn Embedder> = match config.provider.as_str() {
        "disabled" => Arc::new(DisabledEmbedder),
        "hash" => Arc::new(Bounded::new(
            HashEmbedder::new(config.dims.unwrap_or(384)),
            secs,
        )),
        "openai" => Arc::new(Bounded::new(OpenAIEmbedder::new(config)?, secs)),
        "ollama" => Arc::new(Bounded::new(OllamaEmbedder::new(config)?, secs)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Arc::new(Bounded::new(LocalEmbedder::new(config)?, secs)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    };
    Ok(embedder)
}

fn to_f32_vec(backend: &str, values: &[serde_json::Value]) -> Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|x| x as f32)
                .ok_or_else(|| malformed(backend, &format!("non-numeric embedding value {}", v)))
        })
        .collect()
}

fn malformed(backend: &str, what: &str) -> QaError {
    QaError::EmbeddingUnavailable(format!("invalid {} response: {}", backend, what))
}
