//! Session-scoped conversations
//!
//! Per-session message history, context-window trimming and the
//! orchestrator that combines them with a model.
//!
//! # Example
//!
//! ```rust,no_run
//! use colloquy_core::conversation::{ConversationOrchestrator, ExtraParams, SessionStore, TrimPolicy};
//! use colloquy_core::llm::providers::GroqProvider;
//! use std::sync::Arc;
//!
//! # async fn run() -> colloquy_core::error::Result<()> {
//! let provider = Arc::new(GroqProvider::from_env(None::<String>)?);
//! let chat = ConversationOrchestrator::new(
//!     Arc::new(SessionStore::new()),
//!     provider,
//!     TrimPolicy::keep_last(65)?,
//! )?;
//!
//! chat.invoke("abc2", "hi! I'm Bob", &ExtraParams::new()).await?;
//! let reply = chat.invoke("abc2", "what's my name?", &ExtraParams::new()).await?;
//! println!("{}", reply.content());
//! # Ok(())
//! # }
//! ```

mod history;
mod orchestrator;
mod trim;

pub use history::{SessionHistory, SessionInfo, SessionStore};
pub use orchestrator::{ConversationOrchestrator, ExtraParams, ReplyStream};
pub use trim::{
    ApproxTokenCounter, RequiredStartRole, TokenCounter, TrimPolicy, TrimStrategy, Trimmer,
    trim_messages,
};
