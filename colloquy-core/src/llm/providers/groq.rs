//! Groq LLM provider implementation

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{ColloquyError, Result};
use crate::llm::chat_completions::ChatCompletionsClient;
use crate::llm::{LLMProvider, LLMRequest, LLMResponse, ModelInfo, TextStream};

/// Default Groq chat model.
pub const DEFAULT_GROQ_MODEL: &str = "llama3-8b-8192";

/// Default Groq API base URL.
pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Groq LLM provider (fast, cost-effective, recommended for most use cases).
pub struct GroqProvider {
    client: ChatCompletionsClient,
}

impl GroqProvider {
    /// Create a new Groq provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Groq API key
    /// * `model` - Model name (e.g., "llama3-8b-8192")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Self::with_options(api_key, model, DEFAULT_GROQ_BASE_URL, None)
    }

    /// Create with a custom base URL and request timeout.
    pub fn with_options(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let client = ChatCompletionsClient::new(
            "groq",
            api_key.into(),
            model.into(),
            base_url.into(),
            timeout,
        )?;
        Ok(Self { client })
    }

    /// Create from environment variables.
    ///
    /// Reads from:
    /// - `GROQ_API_KEY` - API key (required)
    /// - `GROQ_MODEL` - Model name (optional, defaults to "llama3-8b-8192")
    ///
    /// # Arguments
    ///
    /// * `model` - Model name (overrides GROQ_MODEL if provided)
    ///
    /// # Errors
    ///
    /// Returns an error if GROQ_API_KEY is not set.
    pub fn from_env(model: Option<impl Into<String>>) -> Result<Self> {
        Self::from_lookup(model, |key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        model: Option<impl Into<String>>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let api_key = lookup("GROQ_API_KEY").filter(|k| !k.is_empty()).ok_or_else(|| {
            ColloquyError::Configuration("GROQ_API_KEY environment variable not set".to_string())
        })?;

        // Use provided model, or GROQ_MODEL env var, or default
        let model = model
            .map(|m| m.into())
            .or_else(|| lookup("GROQ_MODEL"))
            .unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string());

        Self::new(api_key, model)
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }
}

#[async_trait]
impl LLMProvider for GroqProvider {
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse> {
        self.client.complete(request).await
    }

    async fn generate_stream(&self, request: &LLMRequest) -> Result<TextStream> {
        self.client.stream(request).await
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "groq".to_string(),
            model_name: self.model().to_string(),
        }
    }
}
