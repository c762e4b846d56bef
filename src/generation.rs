//! Answer-generation backends.
//!
//! Concrete implementations of [`askdocs_core::generation::Generator`]:
//!
//! | Config Value | Backend | Endpoint |
//! |---|---|---|
//! | `"disabled"` | [`DisabledGenerator`] | none |
//! | `"echo"` | [`EchoGenerator`] | none (returns retrieved context) |
//! | `"openai"` | [`OpenAIGenerator`] | `POST /v1/chat/completions` |
//! | `"ollama"` | [`OllamaGenerator`] | `POST {url}/api/generate` |
//! | `"cohere"` | [`CohereGenerator`] | `POST /v1/chat` |
//!
//! HTTP backends share the retry policy in [`crate::backend`]; every
//! generator returned by [`create_generator`] is time-bounded by
//! `generation.timeout_secs`.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;

pub use askdocs_core::generation::{EchoGenerator, Generator};
use askdocs_core::{QaError, Result};

use crate::backend::{bounded, http_client, post_json_with_retry};
use crate::config::GenerationConfig;

/// Generator that refuses every request.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }
    fn model(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(QaError::GenerationUnavailable(
            "generation provider is disabled".to_string(),
        ))
    }
}

/// Settings shared by the HTTP generators.
struct HttpSettings {
    model: String,
    max_retries: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl HttpSettings {
    fn from_config(config: &GenerationConfig, provider: &str) -> anyhow::Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            anyhow::anyhow!("generation.model required for {} provider", provider)
        })?;
        Ok(Self {
            model,
            max_retries: config.max_retries,
            temperature: config.temperature,
            client: http_client(config.timeout_secs).map_err(anyhow::Error::msg)?,
        })
    }
}

// ============ OpenAI ============

/// Chat-completions generator. Requires `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    settings: HttpSettings,
    api_key: String,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let settings = HttpSettings::from_config(config, "OpenAI")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self { settings, api_key })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn name(&self) -> &str {
        "openai"
    }
    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.settings.model,
            "temperature": self.settings.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });

        let json = post_json_with_retry("OpenAI", self.settings.max_retries, || {
            self.settings
                .client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
        })
        .await
        .map_err(QaError::GenerationUnavailable)?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| malformed("OpenAI", "missing choices[0].message.content"))
    }
}

// ============ Ollama ============

/// Generator backed by a local Ollama instance.
pub struct OllamaGenerator {
    settings: HttpSettings,
    url: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let settings = HttpSettings::from_config(config, "Ollama")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            settings,
            url: url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }
    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.settings.model,
            "prompt": prompt,
            "stream": false,
            "options": {"temperature": self.settings.temperature},
        });
        let endpoint = format!("{}/api/generate", self.url);

        let json = post_json_with_retry("Ollama", self.settings.max_retries, || {
            self.settings.client.post(&endpoint).json(&body)
        })
        .await
        .map_err(|e| {
            QaError::GenerationUnavailable(format!("{} (is Ollama running at {}?)", e, self.url))
        })?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| malformed("Ollama", "missing response"))
    }
}

// ============ Cohere ============

/// Cohere chat generator. Requires `COHERE_API_KEY`.
pub struct CohereGenerator {
    settings: HttpSettings,
    api_key: String,
}

impl CohereGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let settings = HttpSettings::from_config(config, "Cohere")?;
        let api_key = std::env::var("COHERE_API_KEY")
            .map_err(|_| anyhow::anyhow!("COHERE_API_KEY environment variable not set"))?;
        Ok(Self { settings, api_key })
    }
}

#[async_trait]
impl Generator for CohereGenerator {
    fn name(&self) -> &str {
        "cohere"
    }
    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.settings.model,
            "message": prompt,
            "temperature": self.settings.temperature,
        });

        let json = post_json_with_retry("Cohere", self.settings.max_retries, || {
            self.settings
                .client
                .post("https://api.cohere.com/v1/chat")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
        })
        .await
        .map_err(QaError::GenerationUnavailable)?;

        json.get("text")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| malformed("Cohere", "missing text"))
    }
}

// ============ Time bound ============

/// Wraps a generator so every call is limited to `timeout_secs`.
pub struct BoundedGenerator<G> {
    inner: G,
    timeout_secs: u64,
}

impl<G: Generator> BoundedGenerator<G> {
    pub fn new(inner: G, timeout_secs: u64) -> Self {
        Self {
            inner,
            timeout_secs,
        }
    }
}

#[async_trait]
impl<G: Generator> Generator for BoundedGenerator<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }
    fn model(&self) -> &str {
        self.inner.model()
    }
    async fn generate(&self, prompt: &str) -> Result<String> {
        bounded("generation", self.timeout_secs, self.inner.generate(prompt)).await
    }
}

/// Create the configured [`Generator`].
///
/// # Errors
///
/// Unknown provider names, a missing `generation.model`, or a missing API key.
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    let secs = config.timeout_secs;
    let generator: Arc<dyn Generator> = match config.provider.as_str() {
        "disabled" => Arc::new(DisabledGenerator),
        "echo" => Arc::new(EchoGenerator),
        "openai" => Arc::new(BoundedGenerator::new(OpenAIGenerator::new(config)?, secs)),
        "ollama" => Arc::new(BoundedGenerator::new(OllamaGenerator::new(config)?, secs)),
        "cohere" => Arc::new(BoundedGenerator::new(CohereGenerator::new(config)?, secs)),
        other => bail!("Unknown generation provider: {}", other),
    };
    Ok(generator)
}

fn malformed(backend: &str, what: &str) -> QaError {
    QaError::GenerationUnavailable(format!("invalid {} response: {}", backend, what))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowGenerator;

    #[async_trait]
    impl Generator for SlowGenerator {
        fn name(&self) -> &str {
            "slow"
        }
        fn model(&self) -> &str {
            "slow"
        }
        async fn generate(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_bounded_generator_times_out() {
        let generator = BoundedGenerator::new(SlowGenerator, 1);
        let err = generator.generate("hi").await.unwrap_err();
        assert!(matches!(
            err,
            QaError::BackendTimeout {
                backend: "generation",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_disabled_generator() {
        let err = DisabledGenerator.generate("hi").await.unwrap_err();
        assert_eq!(err.code(), "generation_unavailable");
    }

    #[test]
    fn test_create_generator_offline_providers() {
        let config = GenerationConfig::default();
        assert_eq!(create_generator(&config).unwrap().name(), "echo");

        let ollama = GenerationConfig {
            provider: "ollama".to_string(),
            model: Some("llama3".to_string()),
            ..GenerationConfig::default()
        };
        let generator = create_generator(&ollama).unwrap();
        assert_eq!(generator.name(), "ollama");
        assert_eq!(generator.model(), "llama3");

        let missing_model = GenerationConfig {
            provider: "cohere".to_string(),
            ..GenerationConfig::default()
        };
        assert!(create_generator(&missing_model).is_err());
    }
}
