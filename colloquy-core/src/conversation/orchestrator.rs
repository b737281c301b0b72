//! Conversation orchestration
//!
//! One exchange: read the session history, trim it to the context budget,
//! ask the model for a reply and record the exchange.

use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tracing::Instrument;

use super::history::{SessionHistory, SessionStore};
use super::trim::{TrimPolicy, trim_messages};
use crate::chain::render_template;
use crate::config::ColloquyConfig;
use crate::error::Result;
use crate::llm::{LLMProvider, LLMRequest, Message};

/// Named values substituted into the system prompt (e.g. `language`).
pub type ExtraParams = HashMap<String, String>;

/// Lazy stream of reply fragments.
///
/// Nothing is sent to the model until the stream is first polled. The
/// exchange is recorded only once the stream has been driven to completion.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Coordinates history, trimming and generation for session-scoped chat.
#[derive(Clone)]
pub struct ConversationOrchestrator {
    store: Arc<SessionStore>,
    provider: Arc<dyn LLMProvider>,
    policy: TrimPolicy,
    system_prompt: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
    project: String,
}

impl std::fmt::Debug for ConversationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationOrchestrator")
            .field("model", &self.provider.model_info().model_name)
            .field("policy", &self.policy)
            .field("system_prompt", &self.system_prompt)
            .field("project", &self.project)
            .finish()
    }
}

impl ConversationOrchestrator {
    /// Create an orchestrator over a shared store.
    ///
    /// # Errors
    ///
    /// Returns [`ColloquyError::TrimPolicy`](crate::error::ColloquyError::TrimPolicy)
    /// if the policy is invalid.
    pub fn new(
        store: Arc<SessionStore>,
        provider: Arc<dyn LLMProvider>,
        policy: TrimPolicy,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            store,
            provider,
            policy,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            project: "default".to_string(),
        })
    }

    /// Create an orchestrator from the `trim`, `chat`, `llm` and `tracing`
    /// sections of a loaded configuration.
    pub fn from_config(
        config: &ColloquyConfig,
        store: Arc<SessionStore>,
        provider: Arc<dyn LLMProvider>,
    ) -> Result<Self> {
        Ok(Self::new(store, provider, config.trim.clone())?
            .with_system_prompt(config.chat.system_prompt.clone())
            .with_generation_options(config.llm.temperature, config.llm.max_tokens)
            .with_project(config.tracing.project.clone()))
    }

    /// Prepend a system prompt rendered from the exchange's extra params.
    ///
    /// The rendered prompt is added after trimming and never stored. It is
    /// not counted against the trim policy's `max_tokens`, so the submitted
    /// request can exceed the budget by the prompt's own cost.
    pub fn with_system_prompt(mut self, template: impl Into<String>) -> Self {
        let template = template.into();
        self.system_prompt = if template.trim().is_empty() {
            None
        } else {
            Some(template)
        };
        self
    }

    pub fn with_generation_options(
        mut self,
        temperature: Option<f32>,
        max_tokens: Option<usize>,
    ) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Project name recorded on exchange spans
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn policy(&self) -> &TrimPolicy {
        &self.policy
    }

    /// Run one exchange with a single user message.
    ///
    /// # Errors
    ///
    /// Returns [`ColloquyError::Generation`](crate::error::ColloquyError::Generation)
    /// if the model fails; the session history is left unchanged.
    pub async fn invoke(
        &self,
        session_id: &str,
        user_message: impl Into<String>,
        extra: &ExtraParams,
    ) -> Result<Message> {
        self.invoke_messages(session_id, vec![Message::user(user_message)], extra)
            .await
    }

    /// Run one exchange with several input messages.
    ///
    /// The input messages and the reply are recorded together, only after
    /// the model has replied.
    pub async fn invoke_messages(
        &self,
        session_id: &str,
        messages: Vec<Message>,
        extra: &ExtraParams,
    ) -> Result<Message> {
        let span = tracing::info_span!(
            "exchange",
            session_id = %session_id,
            project = %self.project,
        );

        async move {
            let history = self.store.get_or_create(session_id);
            let _turn = history.lock_turn().await;

            let request = self.prepare(&history, &messages, extra)?;
            let reply = match self.provider.generate_request(&request).await {
                Ok(response) => Message::assistant(response.content),
                Err(e) => {
                    tracing::warn!(error = %e, "Generation failed, history unchanged");
                    return Err(e);
                }
            };

            let reply = history.record_exchange(messages, reply);
            tracing::info!(history_len = history.len(), "Exchange recorded");
            Ok(reply)
        }
        .instrument(span)
        .await
    }

    /// Stream the reply to a single user message.
    ///
    /// Fragments are yielded as they arrive. When the stream completes the
    /// user message and the concatenated reply are recorded; if it is
    /// dropped early or fails, nothing is recorded.
    pub fn stream(
        &self,
        session_id: &str,
        user_message: impl Into<String>,
        extra: &ExtraParams,
    ) -> ReplyStream {
        self.stream_messages(session_id, vec![Message::user(user_message)], extra)
    }

    /// Stream the reply to several input messages.
    pub fn stream_messages(
        &self,
        session_id: &str,
        messages: Vec<Message>,
        extra: &ExtraParams,
    ) -> ReplyStream {
        let this = self.clone();
        let session_id = session_id.to_string();
        let extra = extra.clone();

        let stream = async_stream::try_stream! {
            let history = this.store.get_or_create(&session_id);
            let _turn = history.lock_turn().await;

            let request = this.prepare(&history, &messages, &extra)?;
            let mut fragments = this
                .provider
                .generate_stream(&request)
                .await
                .inspect_err(|e| {
                    tracing::warn!(session_id = %session_id, error = %e, "Generation failed, history unchanged")
                })?;

            let mut reply = String::new();
            while let Some(fragment) = fragments.next().await {
                let fragment = fragment?;
                reply.push_str(&fragment);
                yield fragment;
            }

            history.record_exchange(messages, Message::assistant(reply));
            tracing::info!(
                session_id = %session_id,
                project = %this.project,
                history_len = history.len(),
                "Streamed exchange recorded"
            );
        };

        Box::pin(stream)
    }

    /// Build the generation request for `staged` on top of `history`.
    fn prepare(
        &self,
        history: &SessionHistory,
        staged: &[Message],
        extra: &ExtraParams,
    ) -> Result<LLMRequest> {
        let mut context = history.messages();
        context.extend_from_slice(staged);

        let provider = &self.provider;
        let counter = |messages: &[Message]| provider.count_tokens(messages);
        let trimmed = trim_messages(&context, &self.policy, &counter)?;

        let mut messages = Vec::with_capacity(trimmed.len() + 1);
        if let Some(template) = &self.system_prompt {
            messages.push(Message::system(render_template(template, extra)?));
        }
        messages.extend(trimmed);

        tracing::debug!(
            history = context.len(),
            submitted = messages.len(),
            "Prepared generation request"
        );

        Ok(LLMRequest::new(messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens))
    }
}
