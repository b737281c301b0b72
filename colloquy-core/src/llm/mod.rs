use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::conversation::{ApproxTokenCounter, TokenCounter};
use crate::error::{ColloquyError, Result};

/// Boxed stream of text fragments produced by a provider.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    #[serde(alias = "human")]
    User,
    #[serde(alias = "ai")]
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A single turn in a conversation.
///
/// Messages are immutable once created. `sequence_index` is zero until the
/// message is recorded by a [`SessionStore`](crate::conversation::SessionStore),
/// which assigns strictly increasing indices per session starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: MessageRole,
    content: String,
    #[serde(default)]
    sequence_index: u64,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            sequence_index: 0,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sequence_index(&self) -> u64 {
        self.sequence_index
    }

    pub fn is_system(&self) -> bool {
        self.role == MessageRole::System
    }

    /// Copy of this message with a different body, keeping role and index.
    pub(crate) fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            role: self.role,
            content: content.into(),
            sequence_index: self.sequence_index,
        }
    }

    pub(crate) fn indexed(mut self, sequence_index: u64) -> Self {
        self.sequence_index = sequence_index;
        self
    }
}

/// Request to an LLM provider
#[derive(Debug, Clone)]
pub struct LLMRequest {
    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// Temperature for generation (0.0-2.0)
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,

    /// Stop sequences
    pub stop_sequences: Vec<String>,
}

impl LLMRequest {
    /// Create a request from an ordered message list
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
            stop_sequences: Vec::new(),
        }
    }

    /// Create a simple request from a single prompt
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![Message::user(prompt)])
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature.map(|t| t.clamp(0.0, 2.0));
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct LLMResponse {
    /// Generated content
    pub content: String,

    /// Token usage information
    pub usage: Option<TokenUsage>,
}

/// Token usage information
#[derive(Debug, Clone)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// The text-generation collaborator.
///
/// Implementors wrap a hosted chat model. The conversation layer treats it as
/// a black box: an ordered message list goes in, an assistant reply (or a
/// stream of reply fragments) comes out. Token counting is part of the same
/// trait so that trimming reflects the tokenizer of the model in use.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion for a structured request.
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse>;

    /// Generate an assistant message from an ordered message list.
    async fn generate(&self, messages: &[Message]) -> Result<Message> {
        let response = self
            .generate_request(&LLMRequest::new(messages.to_vec()))
            .await?;
        Ok(Message::assistant(response.content))
    }

    /// Generate with a streaming response.
    ///
    /// Providers without native streaming yield the whole completion as a
    /// single fragment.
    async fn generate_stream(&self, request: &LLMRequest) -> Result<TextStream> {
        let response = self.generate_request(request).await?;
        Ok(Box::pin(futures::stream::once(async move {
            Ok(response.content)
        })))
    }

    /// Count the tokens a message sequence costs for this model.
    fn count_tokens(&self, messages: &[Message]) -> usize {
        ApproxTokenCounter::default().count(messages)
    }

    /// Get model information
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "unknown".to_string(),
            model_name: "unknown".to_string(),
        }
    }
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
}

/// Provider that always fails; stands in where no model is configured.
pub struct StubLLMProvider;

#[async_trait]
impl LLMProvider for StubLLMProvider {
    async fn generate_request(&self, _request: &LLMRequest) -> Result<LLMResponse> {
        Err(ColloquyError::Generation(
            "LLM provider not configured. Implement the LLMProvider trait for your LLM".to_string(),
        ))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "stub".to_string(),
            model_name: "none".to_string(),
        }
    }
}

pub mod factory;
pub mod providers;
mod chat_completions;

pub use factory::LLMProviderFactory;

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct FixedProvider;

    #[async_trait]
    impl LLMProvider for FixedProvider {
        async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse> {
            Ok(LLMResponse {
                content: format!("{} messages", request.messages.len()),
                usage: None,
            })
        }
    }

    #[test]
    fn test_message_roles_deserialize_aliases() {
        let human: Message =
            serde_json::from_str(r#"{"role": "human", "content": "hi"}"#).unwrap();
        assert_eq!(human.role(), MessageRole::User);
        assert_eq!(human.sequence_index(), 0);

        let ai: Message = serde_json::from_str(r#"{"role": "ai", "content": "hello"}"#).unwrap();
        assert_eq!(ai.role(), MessageRole::Assistant);
    }

    #[test]
    fn test_temperature_clamping() {
        let request = LLMRequest::from_prompt("hi").with_temperature(Some(5.0));
        assert_eq!(request.temperature, Some(2.0));

        let request = LLMRequest::from_prompt("hi").with_temperature(Some(-1.0));
        assert_eq!(request.temperature, Some(0.0));
    }

    #[tokio::test]
    async fn test_stub_provider() {
        let provider = StubLLMProvider;
        let result = provider.generate(&[Message::user("test")]).await;
        assert!(matches!(result, Err(ColloquyError::Generation(_))));
    }

    #[tokio::test]
    async fn test_default_stream_yields_single_fragment() {
        let provider = FixedProvider;
        let request = LLMRequest::new(vec![Message::system("s"), Message::user("u")]);
        let fragments: Vec<String> = provider
            .generate_stream(&request)
            .await
            .unwrap()
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(fragments, vec!["2 messages".to_string()]);
    }

    #[tokio::test]
    async fn test_generate_returns_assistant_message() {
        let reply = FixedProvider.generate(&[Message::user("u")]).await.unwrap();
        assert_eq!(reply.role(), MessageRole::Assistant);
        assert_eq!(reply.content(), "1 messages");
    }
}
