//! OpenAI LLM provider implementation

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{ColloquyError, Result};
use crate::llm::chat_completions::ChatCompletionsClient;
use crate::llm::{LLMProvider, LLMRequest, LLMResponse, ModelInfo, TextStream};

/// Default OpenAI chat model.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Default OpenAI API base URL.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI LLM provider (GPT-4o and compatible APIs).
pub struct OpenAIProvider {
    client: ChatCompletionsClient,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenAI API key
    /// * `model` - Model name (e.g., "gpt-4o", "gpt-4o-mini")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Self::with_options(api_key, model, DEFAULT_OPENAI_BASE_URL, None)
    }

    /// Create with a custom base URL (for Azure OpenAI or compatible APIs).
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenAI API key
    /// * `model` - Model name
    /// * `base_url` - Custom API base URL
    /// * `timeout` - Per-request timeout
    pub fn with_options(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let client = ChatCompletionsClient::new(
            "openai",
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
    /// - `OPENAI_API_KEY` - API key (required)
    /// - `OPENAI_MODEL` - Model name (optional, defaults to "gpt-4o")
    /// - `OPENAI_BASE_URL` - Custom base URL (optional)
    ///
    /// # Errors
    ///
    /// Returns an error if OPENAI_API_KEY is not set.
    pub fn from_env(model: Option<impl Into<String>>) -> Result<Self> {
        Self::from_lookup(model, |key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        model: Option<impl Into<String>>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ColloquyError::Configuration(
                    "OPENAI_API_KEY environment variable not set".to_string(),
                )
            })?;

        let model = model
            .map(|m| m.into())
            .or_else(|| lookup("OPENAI_MODEL"))
            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());

        let base_url =
            lookup("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());

        Self::with_options(api_key, model, base_url, None)
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
impl LLMProvider for OpenAIProvider {
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse> {
        self.client.complete(request).await
    }

    async fn generate_stream(&self, request: &LLMRequest) -> Result<TextStream> {
        self.client.stream(request).await
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "openai".to_string(),
            model_name: self.model().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_openai_provider_creation() {
        let provider = OpenAIProvider::new("test-key", "gpt-4o").unwrap();
        assert_eq!(provider.model(), "gpt-4o");
        assert_eq!(provider.base_url(), DEFAULT_OPENAI_BASE_URL);
    }

    #[test]
    fn test_openai_provider_custom_base_url() {
        let provider = OpenAIProvider::with_options(
            "test-key",
            "gpt-4",
            "https://custom.openai.azure.com",
            None,
        )
        .unwrap();
        assert_eq!(provider.model(), "gpt-4");
        assert_eq!(provider.base_url(), "https://custom.openai.azure.com");
    }

    #[test]
    fn test_openai_from_env_missing() {
        let result = OpenAIProvider::from_lookup(Some("test-model"), env(&[]));
        assert!(matches!(result, Err(ColloquyError::Configuration(_))));
    }

    #[test]
    fn test_openai_from_env_with_key() {
        let provider = OpenAIProvider::from_lookup(
            None::<String>,
            env(&[
                ("OPENAI_API_KEY", "test-key"),
                ("OPENAI_BASE_URL", "http://localhost:1234/v1"),
            ]),
        )
        .unwrap();
        assert_eq!(provider.model(), DEFAULT_OPENAI_MODEL);
        assert_eq!(provider.base_url(), "http://localhost:1234/v1");
    }

    #[test]
    fn test_openai_from_env_model_override() {
        let provider = OpenAIProvider::from_lookup(
            Some("override-model"),
            env(&[("OPENAI_API_KEY", "test-key"), ("OPENAI_MODEL", "env-model")]),
        )
        .unwrap();
        assert_eq!(provider.model(), "override-model");
    }

    #[test]
    fn test_model_info() {
        let provider = OpenAIProvider::new("test-key", "gpt-4o-mini").unwrap();
        let info = provider.model_info();
        assert_eq!(info.provider, "openai");
        assert_eq!(info.model_name, "gpt-4o-mini");
    }
}
