//! LLM provider implementations

#[cfg(feature = "llm-groq")]
pub mod groq;

#[cfg(feature = "llm-groq")]
pub use groq::GroqProvider;

#[cfg(feature = "llm-openai")]
pub mod openai;

#[cfg(feature = "llm-openai")]
pub use openai::OpenAIProvider;
