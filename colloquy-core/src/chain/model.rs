//! Model and output-parsing stages

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;

use super::{Stage, StageStream};
use crate::config::LLMProviderConfig;
use crate::error::Result;
use crate::llm::{LLMProvider, LLMRequest, Message};

/// Calls a model with the incoming message list.
///
/// Streams assistant message chunks, one per provider fragment.
#[derive(Clone)]
pub struct ModelStage {
    provider: Arc<dyn LLMProvider>,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
}

impl std::fmt::Debug for ModelStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStage")
            .field("model", &self.provider.model_info().model_name)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ModelStage {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Model stage carrying the `temperature` and `max_tokens` of `config`.
    pub fn from_config(provider: Arc<dyn LLMProvider>, config: &LLMProviderConfig) -> Self {
        Self::new(provider)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn request(&self, messages: Vec<Message>) -> LLMRequest {
        LLMRequest::new(messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }
}

#[async_trait]
impl Stage for ModelStage {
    type Input = Vec<Message>;
    type Output = Message;

    async fn invoke(&self, input: Vec<Message>) -> Result<Message> {
        let response = self.provider.generate_request(&self.request(input)).await?;
        Ok(Message::assistant(response.content))
    }

    fn stream<'a>(&'a self, input: Vec<Message>) -> StageStream<'a, Message> {
        Box::pin(async_stream::try_stream! {
            let request = self.request(input);
            let mut fragments = self.provider.generate_stream(&request).await?;
            while let Some(fragment) = fragments.next().await {
                yield Message::assistant(fragment?);
            }
        })
    }

    fn transform<'a>(&'a self, upstream: StageStream<'a, Vec<Message>>) -> StageStream<'a, Message> {
        Box::pin(upstream.map_ok(move |input| self.stream(input)).try_flatten())
    }

    fn name(&self) -> &str {
        "ModelStage"
    }
}

/// Extracts the text of a message.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrOutputParser;

#[async_trait]
impl Stage for StrOutputParser {
    type Input = Message;
    type Output = String;

    async fn invoke(&self, input: Message) -> Result<String> {
        Ok(input.content().to_string())
    }

    fn name(&self) -> &str {
        "StrOutputParser"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChatPromptTemplate, PromptInput, StageExt};
    use crate::error::ColloquyError;
    use crate::llm::{LLMResponse, MessageRole, TextStream};

    struct EchoProvider;

    #[async_trait]
    impl LLMProvider for EchoProvider {
        async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse> {
            let last = request.messages.last().map(|m| m.content()).unwrap_or("");
            Ok(LLMResponse {
                content: format!("echo: {last}"),
                usage: None,
            })
        }

        async fn generate_stream(&self, request: &LLMRequest) -> Result<TextStream> {
            let last = request
                .messages
                .last()
                .map(|m| m.content().to_string())
                .unwrap_or_default();
            let fragments: Vec<Result<String>> = last
                .split_inclusive(' ')
                .map(|w| Ok(w.to_string()))
                .collect();
            Ok(Box::pin(futures::stream::iter(fragments)))
        }
    }

    #[tokio::test]
    async fn test_model_stage_returns_assistant_message() {
        let stage = ModelStage::new(Arc::new(EchoProvider));
        let reply = stage.invoke(vec![Message::user("hi")]).await.unwrap();
        assert_eq!(reply.role(), MessageRole::Assistant);
        assert_eq!(reply.content(), "echo: hi");
    }

    #[tokio::test]
    async fn test_model_stage_propagates_failure() {
        let stage = ModelStage::new(Arc::new(crate::llm::StubLLMProvider));
        let err = stage.invoke(vec![Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, ColloquyError::Generation(_)));
    }

    #[tokio::test]
    async fn test_prompt_model_parser_streams_fragments() {
        let chain = ChatPromptTemplate::new()
            .user("{text}")
            .pipe(ModelStage::new(Arc::new(EchoProvider)))
            .pipe(StrOutputParser);

        let input = PromptInput::new().with_variable("text", "ciao a tutti");
        let fragments: Vec<String> = chain
            .stream(input.clone())
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(fragments, vec!["ciao ", "a ", "tutti"]);

        assert_eq!(chain.invoke(input).await.unwrap(), "echo: ciao a tutti");
    }
}
