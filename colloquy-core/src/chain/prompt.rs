//! Chat prompt templates
//!
//! Templates substitute `{name}` with a named value. There is no escaping,
//! formatting or expression syntax; text that is not a `{identifier}` is
//! copied as-is.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

use super::Stage;
use crate::error::{ColloquyError, Result};
use crate::llm::{Message, MessageRole};

static VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid variable pattern"));

/// Substitute every `{name}` in `template` with `variables[name]`.
///
/// # Errors
///
/// Returns [`ColloquyError::Template`] naming the first variable without a value.
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> Result<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;

    for captures in VARIABLE.captures_iter(template) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = variables.get(name.as_str()).ok_or_else(|| {
            ColloquyError::Template(format!("missing value for variable '{}'", name.as_str()))
        })?;
        rendered.push_str(&template[last..whole.start()]);
        rendered.push_str(value);
        last = whole.end();
    }

    rendered.push_str(&template[last..]);
    Ok(rendered)
}

/// Names of the `{variables}` used in `template`, sorted and deduplicated.
pub fn template_variables(template: &str) -> Vec<String> {
    VARIABLE
        .captures_iter(template)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Values for rendering a [`ChatPromptTemplate`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptInput {
    pub variables: HashMap<String, String>,
    pub messages: HashMap<String, Vec<Message>>,
}

impl PromptInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Messages for a [`PromptPart::Placeholder`]
    pub fn with_messages(mut self, name: impl Into<String>, messages: Vec<Message>) -> Self {
        self.messages.insert(name.into(), messages);
        self
    }
}

/// One entry of a chat prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPart {
    /// A message whose content is a template
    Message { role: MessageRole, template: String },
    /// A named list of messages inserted verbatim
    Placeholder(String),
}

/// Ordered list of message templates and placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatPromptTemplate {
    parts: Vec<PromptPart>,
}

impl ChatPromptTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(mut self, role: MessageRole, template: impl Into<String>) -> Self {
        self.parts.push(PromptPart::Message {
            role,
            template: template.into(),
        });
        self
    }

    pub fn system(self, template: impl Into<String>) -> Self {
        self.message(MessageRole::System, template)
    }

    pub fn user(self, template: impl Into<String>) -> Self {
        self.message(MessageRole::User, template)
    }

    pub fn assistant(self, template: impl Into<String>) -> Self {
        self.message(MessageRole::Assistant, template)
    }

    pub fn placeholder(mut self, name: impl Into<String>) -> Self {
        self.parts.push(PromptPart::Placeholder(name.into()));
        self
    }

    pub fn parts(&self) -> &[PromptPart] {
        &self.parts
    }

    /// Variables referenced by the message templates
    pub fn input_variables(&self) -> Vec<String> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                PromptPart::Message { template, .. } => Some(template_variables(template)),
                PromptPart::Placeholder(_) => None,
            })
            .flatten()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Render into an ordered message list.
    pub fn format(&self, input: &PromptInput) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        for part in &self.parts {
            match part {
                PromptPart::Message { role, template } => {
                    messages.push(Message::new(*role, render_template(template, &input.variables)?));
                }
                PromptPart::Placeholder(name) => {
                    let inserted = input.messages.get(name).ok_or_else(|| {
                        ColloquyError::Template(format!("missing messages for placeholder '{name}'"))
                    })?;
                    messages.extend(inserted.iter().cloned());
                }
            }
        }
        Ok(messages)
    }
}

#[async_trait]
impl Stage for ChatPromptTemplate {
    type Input = PromptInput;
    type Output = Vec<Message>;

    async fn invoke(&self, input: PromptInput) -> Result<Vec<Message>> {
        self.format(&input)
    }

    fn name(&self) -> &str {
        "ChatPromptTemplate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_variables() {
        let rendered = render_template(
            "translate the following into {language}: {text}",
            &vars(&[("language", "Italian"), ("text", "hi")]),
        )
        .unwrap();
        assert_eq!(rendered, "translate the following into Italian: hi");
    }

    #[test]
    fn test_render_repeated_and_literal_braces() {
        let rendered =
            render_template("{a}-{a} {not a var} {}", &vars(&[("a", "x")])).unwrap();
        assert_eq!(rendered, "x-x {not a var} {}");
    }

    #[test]
    fn test_render_missing_variable() {
        let err = render_template("in {language}.", &HashMap::new()).unwrap_err();
        assert!(matches!(err, ColloquyError::Template(msg) if msg.contains("language")));
    }

    #[test]
    fn test_values_are_not_rendered_again() {
        let rendered =
            render_template("{text}", &vars(&[("text", "{language}")])).unwrap();
        assert_eq!(rendered, "{language}");
    }

    #[test]
    fn test_format_with_placeholder() {
        let prompt = ChatPromptTemplate::new()
            .system("Answer all questions to the best of your ability in {language}.")
            .placeholder("messages");

        let input = PromptInput::new()
            .with_variable("language", "Spanish")
            .with_messages(
                "messages",
                vec![Message::user("hi! I'm bob"), Message::assistant("hola")],
            );

        let messages = prompt.format(&input).unwrap();
        assert_eq!(messages.len(), 3);
        assert!(messages[0].content().ends_with("in Spanish."));
        assert_eq!(messages[2].content(), "hola");
        assert_eq!(prompt.input_variables(), vec!["language"]);
    }

    #[test]
    fn test_missing_placeholder_is_error() {
        let prompt = ChatPromptTemplate::new().placeholder("messages");
        let err = prompt.format(&PromptInput::new()).unwrap_err();
        assert!(matches!(err, ColloquyError::Template(_)));
    }

    #[test]
    fn test_input_variables_sorted_unique() {
        let prompt = ChatPromptTemplate::new()
            .system("translate the following into {language}:")
            .user("{text}")
            .assistant("{language}");
        assert_eq!(prompt.input_variables(), vec!["language", "text"]);
    }
}
