//! Explicit, typed pipelines
//!
//! A [`Stage`] turns one input into one output. Stages compose with
//! [`StageExt::pipe`] into a [`Pipe`], whose output type is checked against
//! the next stage's input at compile time.
//!
//! ```rust,no_run
//! use colloquy_core::chain::{translation_chain, Stage, TranslationInput};
//! use colloquy_core::llm::providers::GroqProvider;
//! use std::sync::Arc;
//!
//! # async fn run() -> colloquy_core::error::Result<()> {
//! let chain = translation_chain(Arc::new(GroqProvider::from_env(None::<String>)?));
//! let output = chain
//!     .invoke(TranslationInput::new("Italian", "hi"))
//!     .await?;
//! println!("{output}");
//! # Ok(())
//! # }
//! ```

mod model;
mod prompt;
mod translate;

pub use model::{ModelStage, StrOutputParser};
pub use prompt::{ChatPromptTemplate, PromptInput, PromptPart, render_template, template_variables};
pub use translate::{
    ChatChain, ChatInput, TRANSLATION_SYSTEM_TEMPLATE, TranslationChain, TranslationInput,
    chat_chain, translation_chain,
};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;

use crate::conversation::Trimmer;
use crate::error::Result;
use crate::llm::Message;

/// Boxed stream of stage outputs
pub type StageStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// One step of a pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Run the stage on a single input.
    async fn invoke(&self, input: Self::Input) -> Result<Self::Output>;

    /// Run the stage, yielding output in chunks.
    ///
    /// Stages that cannot produce partial output yield a single item.
    fn stream<'a>(&'a self, input: Self::Input) -> StageStream<'a, Self::Output> {
        Box::pin(futures::stream::once(self.invoke(input)))
    }

    /// Run the stage over a stream of input chunks.
    ///
    /// The default maps every chunk through [`Stage::invoke`].
    fn transform<'a>(
        &'a self,
        upstream: StageStream<'a, Self::Input>,
    ) -> StageStream<'a, Self::Output> {
        Box::pin(upstream.then(move |input| async move { self.invoke(input?).await }))
    }

    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Composition helpers for [`Stage`]
pub trait StageExt: Stage + Sized {
    /// Feed this stage's output into `next`.
    fn pipe<B>(self, next: B) -> Pipe<Self, B>
    where
        B: Stage<Input = Self::Output>,
    {
        Pipe {
            first: self,
            second: next,
        }
    }
}

impl<S: Stage + Sized> StageExt for S {}

/// Two stages run in sequence
#[derive(Debug, Clone)]
pub struct Pipe<A, B> {
    first: A,
    second: B,
}

#[async_trait]
impl<A, B> Stage for Pipe<A, B>
where
    A: Stage,
    B: Stage<Input = A::Output>,
{
    type Input = A::Input;
    type Output = B::Output;

    async fn invoke(&self, input: Self::Input) -> Result<Self::Output> {
        let intermediate = self.first.invoke(input).await?;
        tracing::trace!(from = self.first.name(), to = self.second.name(), "Pipe step");
        self.second.invoke(intermediate).await
    }

    fn stream<'a>(&'a self, input: Self::Input) -> StageStream<'a, Self::Output> {
        self.second.transform(self.first.stream(input))
    }

    fn transform<'a>(
        &'a self,
        upstream: StageStream<'a, Self::Input>,
    ) -> StageStream<'a, Self::Output> {
        self.second.transform(self.first.transform(upstream))
    }

    fn name(&self) -> &str {
        "Pipe"
    }
}

type StageFn<I, O> = Arc<dyn Fn(I) -> Result<O> + Send + Sync>;

/// Stage backed by a plain function
#[derive(Clone)]
pub struct FnStage<I, O> {
    name: String,
    f: StageFn<I, O>,
}

impl<I, O> std::fmt::Debug for FnStage<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

impl<I, O> FnStage<I, O> {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(I) -> Result<O> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }
}

#[async_trait]
impl<I, O> Stage for FnStage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    async fn invoke(&self, input: I) -> Result<O> {
        (self.f)(input)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Stage for Trimmer {
    type Input = Vec<Message>;
    type Output = Vec<Message>;

    async fn invoke(&self, input: Vec<Message>) -> Result<Vec<Message>> {
        self.trim(&input)
    }

    fn name(&self) -> &str {
        "Trimmer"
    }
}
