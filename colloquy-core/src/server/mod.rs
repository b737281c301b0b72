//! HTTP surface for the chains
//!
//! Routes:
//! - `POST /chain/invoke` runs a chain and returns its output
//! - `POST /chain/stream` streams the output as Server-Sent Events
//! - `GET /health`
//!
//! A request carries `{"input": ..., "config": {"configurable": {"session_id": ...}}}`.
//! `{language, text}` inputs are translated statelessly. `{messages, language}`
//! inputs are answered by the chat chain, and with a `session_id` they are
//! recorded in the server's [`SessionStore`].

mod handlers;
mod remote;

pub use remote::RemoteChain;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use uuid::Uuid;

use crate::chain::{
    ChatChain, ChatInput, ModelStage, Stage, StageStream, TranslationChain, TranslationInput,
};
use crate::config::ColloquyConfig;
use crate::conversation::{ConversationOrchestrator, ExtraParams, SessionStore, Trimmer};
use crate::error::{ColloquyError, Result};
use crate::llm::{LLMProvider, LLMProviderFactory, Message};

/// Maximum request body size (64 KiB)
pub const MAX_BODY_SIZE: usize = 65_536;

/// Path prefix of the chain routes
pub const CHAIN_PATH: &str = "/chain";

/// Chain input accepted by the server
///
/// Both shapes reject unknown fields, so a body mixing `text` and
/// `messages` matches neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChainInput {
    Translate(TranslationInput),
    Chat(ConversationInput),
}

/// Conversation input; `language` falls back to the configured default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversationInput {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Per-run options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub configurable: Configurable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configurable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Body of `/chain/invoke` and `/chain/stream`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub input: ChainInput,
    #[serde(default)]
    pub config: RunConfig,
}

impl InvokeRequest {
    pub fn new(input: ChainInput, session_id: Option<String>) -> Self {
        Self {
            input,
            config: RunConfig {
                configurable: Configurable { session_id },
            },
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.config.configurable.session_id.as_deref()
    }
}

/// Body returned by `/chain/invoke`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub output: String,
    pub metadata: RunMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
}

/// Shared state of the HTTP surface
pub struct AppState {
    translation: TranslationChain,
    chat: ChatChain,
    orchestrator: ConversationOrchestrator,
    default_language: String,
    model: String,
}

impl AppState {
    /// Wire the chains and the orchestrator over one provider and store.
    pub fn new(
        config: &ColloquyConfig,
        provider: Arc<dyn LLMProvider>,
        store: Arc<SessionStore>,
    ) -> Result<Self> {
        let counter = Arc::clone(&provider);
        let trimmer = Trimmer::new(
            config.trim.clone(),
            Arc::new(move |messages: &[Message]| counter.count_tokens(messages)),
        )?;

        let model = ModelStage::from_config(Arc::clone(&provider), &config.llm);

        Ok(Self {
            translation: TranslationChain::new(model.clone()),
            chat: ChatChain::new(model, config.chat.system_prompt.clone(), Some(trimmer)),
            orchestrator: ConversationOrchestrator::from_config(
                config,
                store,
                Arc::clone(&provider),
            )?,
            default_language: config.chat.default_language.clone(),
            model: provider.model_info().model_name,
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        self.orchestrator.store()
    }

    fn language(&self, input: &ConversationInput) -> String {
        input
            .language
            .clone()
            .unwrap_or_else(|| self.default_language.clone())
    }

    /// Run the chain selected by `request`.
    pub async fn run(&self, request: InvokeRequest) -> Result<String> {
        let session_id = request.session_id().map(str::to_string);
        match request.input {
            ChainInput::Translate(input) => self.translation.invoke(input).await,
            ChainInput::Chat(input) => {
                let language = self.language(&input);
                match session_id {
                    Some(session_id) => {
                        let extra = ExtraParams::from([("language".to_string(), language)]);
                        let reply = self
                            .orchestrator
                            .invoke_messages(&session_id, input.messages, &extra)
                            .await?;
                        Ok(reply.content().to_string())
                    }
                    None => {
                        self.chat
                            .invoke(ChatInput {
                                messages: input.messages,
                                language,
                            })
                            .await
                    }
                }
            }
        }
    }

    /// Stream the output of the chain selected by `request`.
    pub fn stream(&self, request: InvokeRequest) -> StageStream<'_, String> {
        let session_id = request.session_id().map(str::to_string);
        match request.input {
            ChainInput::Translate(input) => self.translation.stream(input),
            ChainInput::Chat(input) => {
                let language = self.language(&input);
                match session_id {
                    Some(session_id) => {
                        let extra = ExtraParams::from([("language".to_string(), language)]);
                        self.orchestrator
                            .stream_messages(&session_id, input.messages, &extra)
                    }
                    None => self.chat.stream(ChatInput {
                        messages: input.messages,
                        language,
                    }),
                }
            }
        }
    }
}

/// Build the router with body-size and timeout limits.
pub fn router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(handlers::handle_health))
        .route(
            &format!("{CHAIN_PATH}/invoke"),
            post(handlers::handle_invoke),
        )
        .route(
            &format!("{CHAIN_PATH}/stream"),
            post(handlers::handle_stream),
        )
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    request_timeout: Duration,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Chain server listening");

    axum::serve(listener, router(state, request_timeout))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Chain server stopped");
    Ok(())
}

/// Build the provider and state from `config`, bind and serve.
pub async fn run_server(
    config: &ColloquyConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let provider = LLMProviderFactory::create(&config.llm)?;
    let state = Arc::new(AppState::new(
        config,
        provider,
        Arc::new(SessionStore::new()),
    )?);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        ColloquyError::Configuration(format!("Failed to bind {addr}: {e}"))
    })?;

    serve(listener, state, config.server.request_timeout, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_input_deserializes() {
        let request: InvokeRequest =
            serde_json::from_str(r#"{"input": {"language": "italian", "text": "hi"}}"#).unwrap();
        assert_eq!(
            request.input,
            ChainInput::Translate(TranslationInput::new("italian", "hi"))
        );
        assert_eq!(request.session_id(), None);
    }

    #[test]
    fn test_chat_input_with_session_deserializes() {
        let request: InvokeRequest = serde_json::from_str(
            r#"{
                "input": {"messages": [{"role": "human", "content": "hi! I'm Bob"}]},
                "config": {"configurable": {"session_id": "abc2"}}
            }"#,
        )
        .unwrap();

        let ChainInput::Chat(input) = &request.input else {
            panic!("expected chat input");
        };
        assert_eq!(input.messages[0].content(), "hi! I'm Bob");
        assert_eq!(input.language, None);
        assert_eq!(request.session_id(), Some("abc2"));
    }

    #[test]
    fn test_request_serializes_without_empty_session() {
        let request = InvokeRequest::new(
            ChainInput::Translate(TranslationInput::new("French", "hello")),
            None,
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["input"]["language"], "French");
        assert!(value["config"]["configurable"].get("session_id").is_none());
    }

    #[test]
    fn test_mixed_input_shapes_rejected() {
        let result = serde_json::from_str::<InvokeRequest>(
            r#"{"input": {
                "language": "italian",
                "text": "hi",
                "messages": [{"role": "user", "content": "hi! I'm Bob"}]
            }}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_input_shape_rejected() {
        let result = serde_json::from_str::<InvokeRequest>(r#"{"input": {"question": "hi"}}"#);
        assert!(result.is_err());
    }
}
