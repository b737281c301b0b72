//! Factory for creating LLM providers from configuration

use crate::config::{LLMProvider as LLMProviderType, LLMProviderConfig};
use crate::error::{ColloquyError, Result};
use crate::llm::LLMProvider;
use std::sync::Arc;

#[cfg(feature = "llm-groq")]
use crate::llm::providers::groq::{DEFAULT_GROQ_BASE_URL, DEFAULT_GROQ_MODEL, GroqProvider};

#[cfg(feature = "llm-openai")]
use crate::llm::providers::openai::{
    DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL, OpenAIProvider,
};

/// Factory for creating LLM providers
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    /// Create an LLM provider from configuration
    ///
    /// The configuration is expected to carry the API key already (see
    /// [`ColloquyConfig::load`](crate::config::ColloquyConfig::load)).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the API key is missing or the
    /// provider feature is not compiled in.
    pub fn create(config: &LLMProviderConfig) -> Result<Arc<dyn LLMProvider>> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ColloquyError::Configuration(format!(
                    "{} is required for the {:?} provider",
                    config.provider.api_key_var(),
                    config.provider
                ))
            })?;

        let model = if config.model.is_empty() {
            None
        } else {
            Some(config.model.clone())
        };

        match config.provider {
            #[cfg(feature = "llm-groq")]
            LLMProviderType::Groq => {
                let provider = GroqProvider::with_options(
                    api_key,
                    model.unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string()),
                    config
                        .base_url
                        .clone()
                        .unwrap_or_else(|| DEFAULT_GROQ_BASE_URL.to_string()),
                    Some(config.timeout),
                )?;
                tracing::debug!(model = provider.model(), "Created Groq provider");
                Ok(Arc::new(provider))
            }

            #[cfg(not(feature = "llm-groq"))]
            LLMProviderType::Groq => Err(ColloquyError::Configuration(
                "Groq provider requires 'llm-groq' feature".to_string(),
            )),

            #[cfg(feature = "llm-openai")]
            LLMProviderType::OpenAI => {
                let provider = OpenAIProvider::with_options(
                    api_key,
                    model.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                    config
                        .base_url
                        .clone()
                        .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                    Some(config.timeout),
                )?;
                tracing::debug!(model = provider.model(), "Created OpenAI provider");
                Ok(Arc::new(provider))
            }

            #[cfg(not(feature = "llm-openai"))]
            LLMProviderType::OpenAI => Err(ColloquyError::Configuration(
                "OpenAI provider requires 'llm-openai' feature".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_requires_api_key() {
        let config = LLMProviderConfig::default();
        let err = LLMProviderFactory::create(&config).err().unwrap();
        assert!(err.is_configuration());
    }

    #[cfg(feature = "llm-groq")]
    #[test]
    fn test_create_groq_with_default_model() {
        let config = LLMProviderConfig {
            api_key: Some("gsk-test".to_string()),
            ..Default::default()
        };
        let provider = LLMProviderFactory::create(&config).unwrap();
        let info = provider.model_info();
        assert_eq!(info.provider, "groq");
        assert_eq!(info.model_name, DEFAULT_GROQ_MODEL);
    }

    #[cfg(feature = "llm-openai")]
    #[test]
    fn test_create_openai_with_configured_model() {
        let config = LLMProviderConfig {
            provider: LLMProviderType::OpenAI,
            model: "gpt-4o-mini".to_string(),
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        let provider = LLMProviderFactory::create(&config).unwrap();
        assert_eq!(provider.model_info().model_name, "gpt-4o-mini");
    }
}
