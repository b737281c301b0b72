//! # Colloquy
//!
//! Session-scoped conversations with hosted chat models:
//! - Per-session message history kept in memory
//! - Context-window trimming to a token budget
//! - An orchestrator that reads, trims, generates and records one exchange
//! - Typed prompt pipelines (translation, stateless chat)
//! - An HTTP surface and a client for it
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use colloquy_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ColloquyConfig::load()?;
//!     let provider = LLMProviderFactory::create(&config.llm)?;
//!     let chat = ConversationOrchestrator::from_config(
//!         &config,
//!         Arc::new(SessionStore::new()),
//!         provider,
//!     )?;
//!
//!     let params = ExtraParams::from([("language".to_string(), "English".to_string())]);
//!     chat.invoke("abc2", "hi! I'm Bob", &params).await?;
//!     let reply = chat.invoke("abc2", "what's my name?", &params).await?;
//!     println!("{}", reply.content());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `llm-groq` (default): Groq chat completions provider
//! - `llm-openai` (default): OpenAI chat completions provider

pub mod chain;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod server;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::chain::{
        ChatPromptTemplate, Stage, StageExt, StrOutputParser, TranslationInput,
        translation_chain,
    };
    pub use crate::config::{ColloquyConfig, ConfigBuilder};
    pub use crate::conversation::{
        ApproxTokenCounter, ConversationOrchestrator, ExtraParams, RequiredStartRole,
        SessionStore, TokenCounter, TrimPolicy, trim_messages,
    };
    pub use crate::error::{ColloquyError, Result};
    pub use crate::llm::{LLMProvider, LLMProviderFactory, Message, MessageRole};
    pub use crate::server::{ChainInput, RemoteChain};
}
