//! Prebuilt chains: translation and stateless chat

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{
    ChatPromptTemplate, FnStage, ModelStage, Pipe, PromptInput, Stage, StageExt, StageStream,
    StrOutputParser,
};
use crate::conversation::Trimmer;
use crate::error::Result;
use crate::llm::{LLMProvider, Message};

/// System instruction of the translation chain
pub const TRANSLATION_SYSTEM_TEMPLATE: &str = "translate the following into {language}:";

/// Input of the translation chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranslationInput {
    pub language: String,
    pub text: String,
}

impl TranslationInput {
    pub fn new(language: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            text: text.into(),
        }
    }
}

type PromptPipe<I> = Pipe<Pipe<Pipe<FnStage<I, PromptInput>, ChatPromptTemplate>, ModelStage>, StrOutputParser>;

/// `prompt | model | parser` translating text into a target language.
#[derive(Debug, Clone)]
pub struct TranslationChain {
    inner: PromptPipe<TranslationInput>,
}

/// Build the translation chain over `provider` with default generation options.
pub fn translation_chain(provider: Arc<dyn LLMProvider>) -> TranslationChain {
    TranslationChain::new(ModelStage::new(provider))
}

impl TranslationChain {
    /// Build the translation chain around a configured model stage.
    pub fn new(model: ModelStage) -> Self {
        let prompt = ChatPromptTemplate::new()
            .system(TRANSLATION_SYSTEM_TEMPLATE)
            .user("{text}");

        let inputs = FnStage::new("translation_inputs", |input: TranslationInput| {
            Ok(PromptInput::new()
                .with_variable("language", input.language)
                .with_variable("text", input.text))
        });

        Self {
            inner: inputs.pipe(prompt).pipe(model).pipe(StrOutputParser),
        }
    }
}

#[async_trait]
impl Stage for TranslationChain {
    type Input = TranslationInput;
    type Output = String;

    async fn invoke(&self, input: TranslationInput) -> Result<String> {
        tracing::debug!(language = %input.language, "Translating");
        self.inner.invoke(input).await
    }

    fn stream<'a>(&'a self, input: TranslationInput) -> StageStream<'a, String> {
        self.inner.stream(input)
    }

    fn name(&self) -> &str {
        "TranslationChain"
    }
}

/// Input of the stateless chat chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInput {
    pub messages: Vec<Message>,
    pub language: String,
}

/// `trim | prompt | model | parser` answering a caller-supplied conversation.
///
/// Nothing is remembered between calls; the caller sends the full history.
#[derive(Debug, Clone)]
pub struct ChatChain {
    inner: PromptPipe<ChatInput>,
}

/// Build the chat chain over `provider` with default generation options.
///
/// `system_template` may reference `{language}`. When a trimmer is given the
/// incoming messages are trimmed before the system prompt is added.
pub fn chat_chain(
    provider: Arc<dyn LLMProvider>,
    system_template: impl Into<String>,
    trimmer: Option<Trimmer>,
) -> ChatChain {
    ChatChain::new(ModelStage::new(provider), system_template, trimmer)
}

impl ChatChain {
    /// Build the chat chain around a configured model stage.
    pub fn new(
        model: ModelStage,
        system_template: impl Into<String>,
        trimmer: Option<Trimmer>,
    ) -> Self {
        let prompt = ChatPromptTemplate::new()
            .system(system_template)
            .placeholder("messages");

        let inputs = FnStage::new("chat_inputs", move |input: ChatInput| {
            let messages = match &trimmer {
                Some(trimmer) => trimmer.trim(&input.messages)?,
                None => input.messages,
            };
            Ok(PromptInput::new()
                .with_variable("language", input.language)
                .with_messages("messages", messages))
        });

        Self {
            inner: inputs.pipe(prompt).pipe(model).pipe(StrOutputParser),
        }
    }
}

#[async_trait]
impl Stage for ChatChain {
    type Input = ChatInput;
    type Output = String;

    async fn invoke(&self, input: ChatInput) -> Result<String> {
        self.inner.invoke(input).await
    }

    fn stream<'a>(&'a self, input: ChatInput) -> StageStream<'a, String> {
        self.inner.stream(input)
    }

    fn name(&self) -> &str {
        "ChatChain"
    }
}
