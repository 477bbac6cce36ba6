//! Text generation capability.
//!
//! Defines the [`Generator`] trait used by the answer synthesizer and its
//! implementations:
//! - **[`DisabledGenerator`]**: always fails; answers degrade to retrieved passages.
//! - **[`OpenAIGenerator`]**: OpenAI-compatible `/v1/chat/completions`.
//! - **[`OllamaGenerator`]**: local Ollama `/api/generate`.
//! - **[`GeminiGenerator`]**: Google Gemini `generateContent`.
//!
//! Remote generators share the retry strategy of [`crate::http`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::GenerationConfig;
use crate::error::{CapabilityError, ConfigError};
use crate::http::{api_key, JsonClient};

/// Produces text from a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Short provider name (e.g. `"gemini"`).
    fn provider(&self) -> &str;
    /// Returns the model identifier.
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError>;
}

// ============ Disabled Generator ============

/// A generator that always returns errors.
///
/// Used when `generation.provider = "disabled"`. With degraded mode on,
/// `ask` still returns the retrieved passages.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn provider(&self) -> &str {
        "disabled"
    }
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, CapabilityError> {
        Err(CapabilityError::fatal("disabled", "generation is disabled"))
    }
}

// ============ OpenAI Generator ============

/// Chat completions against the OpenAI API or any compatible server.
///
/// Requires `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    model: String,
    base_url: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: Option<u32>,
    client: JsonClient,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, ConfigError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| ConfigError::new("generation.model required for OpenAI provider"))?;
        let api_key = api_key("OPENAI_API_KEY")
            .ok_or_else(|| ConfigError::new("OPENAI_API_KEY environment variable not set"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            model,
            base_url,
            api_key,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            client: client("openai", config)?,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn provider(&self) -> &str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
        let mut body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
        });
        if let Some(max) = self.max_output_tokens {
            body["max_tokens"] = json!(max);
        }

        let json = self
            .client
            .post(
                &format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/')),
                &[("Authorization", format!("Bearer {}", self.api_key))],
                &body,
            )
            .await?;
        extract_text(
            "openai",
            &json,
            &["choices", "0", "message", "content"],
        )
    }
}

// ============ Ollama Generator ============

/// Non-streaming completions from a local Ollama instance.
pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: f32,
    max_output_tokens: Option<u32>,
    client: JsonClient,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, ConfigError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| ConfigError::new("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            url,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            client: client("ollama", config)?,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn provider(&self) -> &str {
        "ollama"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
        let mut options = json!({ "temperature": self.temperature });
        if let Some(max) = self.max_output_tokens {
            options["num_predict"] = json!(max);
        }
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": options,
        });

        let json = self
            .client
            .post(
                &format!("{}/api/generate", self.url.trim_end_matches('/')),
                &[],
                &body,
            )
            .await?;
        extract_text("ollama", &json, &["response"])
    }
}

// ============ Gemini Generator ============

/// Google Gemini `generateContent`. Requires `GOOGLE_API_KEY`.
pub struct GeminiGenerator {
    model: String,
    base_url: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: Option<u32>,
    client: JsonClient,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, ConfigError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| ConfigError::new("generation.model required for Gemini provider"))?;
        let api_key = api_key("GOOGLE_API_KEY")
            .ok_or_else(|| ConfigError::new("GOOGLE_API_KEY environment variable not set"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string());

        Ok(Self {
            model,
            base_url,
            api_key,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            client: client("gemini", config)?,
        })
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn provider(&self) -> &str {
        "gemini"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
        let mut generation_config = json!({ "temperature": self.temperature });
        if let Some(max) = self.max_output_tokens {
            generation_config["maxOutputTokens"] = json!(max);
        }
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": generation_config,
        });

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let json = self
            .client
            .post(&url, &[("x-goog-api-key", self.api_key.clone())], &body)
            .await?;
        extract_text(
            "gemini",
            &json,
            &["candidates", "0", "content", "parts", "0", "text"],
        )
    }
}

fn client(provider: &'static str, config: &GenerationConfig) -> Result<JsonClient, ConfigError> {
    JsonClient::new(provider, config.timeout_secs, config.max_retries)
        .map_err(|e| ConfigError::new(e.to_string()))
}

/// Follow `path` (object keys, or array indices as digits) to a string.
fn extract_text(provider: &str, json: &Value, path: &[&str]) -> Result<String, CapabilityError> {
    let mut current = json;
    for segment in path {
        let next = match segment.parse::<usize>() {
            Ok(i) => current.get(i),
            Err(_) => current.get(*segment),
        };
        current = next.ok_or_else(|| {
            CapabilityError::fatal(
                provider,
                format!("invalid response: missing '{}'", path.join(".")),
            )
        })?;
    }
    current
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CapabilityError::fatal(provider, "invalid response: text is not a string"))
}

/// Create the configured [`Generator`].
///
/// | Config Value | Generator |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledGenerator`] |
/// | `"openai"` | [`OpenAIGenerator`] |
/// | `"ollama"` | [`OllamaGenerator`] |
/// | `"gemini"` | [`GeminiGenerator`] |
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>, ConfigError> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        other => Err(ConfigError::new(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}
