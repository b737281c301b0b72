//! Context-window trimming
//!
//! Selects a token-bounded subsequence of a conversation for submission to a
//! model. Counting is delegated to a [`TokenCounter`]; the trimmer only
//! assumes it is deterministic.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ColloquyError, Result};
use crate::llm::{Message, MessageRole};

/// Trimming strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrimStrategy {
    /// Keep the most recent messages that fit
    #[default]
    #[serde(alias = "last")]
    KeepLast,
}

/// Role the first non-system message of a trimmed sequence must have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequiredStartRole {
    #[default]
    #[serde(alias = "human")]
    User,
    Any,
}

/// Trim policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimPolicy {
    /// Token budget for the whole trimmed sequence, system messages included
    pub max_tokens: usize,
    pub strategy: TrimStrategy,
    /// Always keep the leading run of system messages
    pub include_system: bool,
    /// Allow the boundary message to be cut down to a tail that fits
    pub allow_partial_message: bool,
    pub required_start_role: RequiredStartRole,
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            strategy: TrimStrategy::KeepLast,
            include_system: true,
            allow_partial_message: false,
            required_start_role: RequiredStartRole::User,
        }
    }
}

impl TrimPolicy {
    /// Keep-last policy with the given budget and default options.
    ///
    /// # Errors
    ///
    /// Returns [`ColloquyError::TrimPolicy`] if `max_tokens` is zero.
    pub fn keep_last(max_tokens: usize) -> Result<Self> {
        let policy = Self {
            max_tokens,
            ..Self::default()
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn with_include_system(mut self, include_system: bool) -> Self {
        self.include_system = include_system;
        self
    }

    pub fn with_partial_messages(mut self, allow: bool) -> Self {
        self.allow_partial_message = allow;
        self
    }

    pub fn with_required_start_role(mut self, role: RequiredStartRole) -> Self {
        self.required_start_role = role;
        self
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(ColloquyError::TrimPolicy(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counts the tokens a message sequence costs.
///
/// Any `Fn(&[Message]) -> usize` closure is a counter.
pub trait TokenCounter: Send + Sync {
    fn count(&self, messages: &[Message]) -> usize;
}

impl<F> TokenCounter for F
where
    F: Fn(&[Message]) -> usize + Send + Sync,
{
    fn count(&self, messages: &[Message]) -> usize {
        self(messages)
    }
}

/// Heuristic counter: a fixed overhead per message plus one token per
/// `chars_per_token` characters of content (rounded up).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApproxTokenCounter {
    pub tokens_per_message: usize,
    pub chars_per_token: usize,
}

impl Default for ApproxTokenCounter {
    fn default() -> Self {
        Self {
            tokens_per_message: 3,
            chars_per_token: 4,
        }
    }
}

impl TokenCounter for ApproxTokenCounter {
    fn count(&self, messages: &[Message]) -> usize {
        let chars_per_token = self.chars_per_token.max(1);
        messages
            .iter()
            .map(|m| self.tokens_per_message + m.content().chars().count().div_ceil(chars_per_token))
            .sum()
    }
}

/// Trim `messages` to fit `policy`.
///
/// The result is the retained leading system messages (when
/// `include_system` is set) followed by the longest suffix of the rest that
/// fits the budget, with leading messages dropped until the first one
/// satisfies `required_start_role`. Order is never changed.
///
/// If the retained system messages alone exceed the budget, they are still
/// returned and no other message is kept.
///
/// # Errors
///
/// Returns [`ColloquyError::TrimPolicy`] if the policy is invalid.
pub fn trim_messages<C>(messages: &[Message], policy: &TrimPolicy, counter: &C) -> Result<Vec<Message>>
where
    C: TokenCounter + ?Sized,
{
    policy.validate()?;

    if messages.is_empty() {
        return Ok(Vec::new());
    }

    let system_len = if policy.include_system {
        messages.iter().take_while(|m| m.is_system()).count()
    } else {
        0
    };
    let (system, remainder) = messages.split_at(system_len);

    let mut tail = match policy.strategy {
        TrimStrategy::KeepLast => keep_last(system, remainder, policy, counter),
    };

    if policy.required_start_role == RequiredStartRole::User {
        let first_user = tail
            .iter()
            .position(|m| m.role() == MessageRole::User)
            .unwrap_or(tail.len());
        tail.drain(..first_user);
    }

    tracing::debug!(
        input = messages.len(),
        system = system.len(),
        kept = tail.len(),
        max_tokens = policy.max_tokens,
        "Trimmed conversation"
    );

    let mut trimmed = Vec::with_capacity(system.len() + tail.len());
    trimmed.extend_from_slice(system);
    trimmed.extend(tail);
    Ok(trimmed)
}

fn keep_last<C>(
    system: &[Message],
    remainder: &[Message],
    policy: &TrimPolicy,
    counter: &C,
) -> Vec<Message>
where
    C: TokenCounter + ?Sized,
{
    // candidate = system ++ remainder[start..]
    let mut candidate: Vec<Message> = system.to_vec();
    let mut start = remainder.len();

    while start > 0 {
        candidate.insert(system.len(), remainder[start - 1].clone());
        if counter.count(&candidate) > policy.max_tokens {
            candidate.remove(system.len());
            break;
        }
        start -= 1;
    }

    let mut tail = candidate.split_off(system.len());

    if policy.allow_partial_message && start > 0 {
        if let Some(partial) = partial_tail(&remainder[start - 1], system, &tail, policy, counter) {
            tail.insert(0, partial);
        }
    }

    tail
}

/// Longest word-aligned tail of `boundary` that still fits in front of `tail`.
fn partial_tail<C>(
    boundary: &Message,
    system: &[Message],
    tail: &[Message],
    policy: &TrimPolicy,
    counter: &C,
) -> Option<Message>
where
    C: TokenCounter + ?Sized,
{
    let pieces: Vec<&str> = boundary
        .content()
        .split_inclusive(char::is_whitespace)
        .collect();

    for skip in 1..pieces.len() {
        let text = pieces[skip..].concat();
        if text.trim().is_empty() {
            return None;
        }

        let partial = boundary.with_content(text);
        let mut candidate = Vec::with_capacity(system.len() + tail.len() + 1);
        candidate.extend_from_slice(system);
        candidate.push(partial.clone());
        candidate.extend_from_slice(tail);

        if counter.count(&candidate) <= policy.max_tokens {
            return Some(partial);
        }
    }

    None
}

/// A trim policy bound to a token counter.
#[derive(Clone)]
pub struct Trimmer {
    policy: TrimPolicy,
    counter: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for Trimmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trimmer")
            .field("policy", &self.policy)
            .finish()
    }
}

impl Trimmer {
    /// # Errors
    ///
    /// Returns [`ColloquyError::TrimPolicy`] if the policy is invalid.
    pub fn new(policy: TrimPolicy, counter: Arc<dyn TokenCounter>) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy, counter })
    }

    pub fn policy(&self) -> &TrimPolicy {
        &self.policy
    }

    pub fn trim(&self, messages: &[Message]) -> Result<Vec<Message>> {
        trim_messages(messages, &self.policy, self.counter.as_ref())
    }
}
