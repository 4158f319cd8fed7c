//! Common types for LLM chat completions.

use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Why a message sequence is not a valid conversation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("conversation must contain at least one message")]
    Empty,

    #[error("system message at index {index}; only the first message may be a system message")]
    MisplacedSystemMessage { index: usize },
}

/// An ordered, non-empty list of messages.
///
/// At most one system message is allowed and it must come first. The
/// invariant is checked on construction and on deserialization, so a
/// `Conversation` value is always valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Message>", into = "Vec<Message>")]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(messages: Vec<Message>) -> Result<Self, ConversationError> {
        if messages.is_empty() {
            return Err(ConversationError::Empty);
        }
        if let Some(index) = messages
            .iter()
            .skip(1)
            .position(|m| m.role == Role::System)
        {
            return Err(ConversationError::MisplacedSystemMessage { index: index + 1 });
        }
        Ok(Self { messages })
    }

    /// A single user turn, optionally preceded by a system prompt.
    pub fn prompt(system: Option<&str>, user: impl Into<String>) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(user));
        Self { messages }
    }

    /// Append a user or assistant turn.
    pub fn push(&mut self, message: Message) -> Result<(), ConversationError> {
        if message.role == Role::System {
            return Err(ConversationError::MisplacedSystemMessage {
                index: self.messages.len(),
            });
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl TryFrom<Vec<Message>> for Conversation {
    type Error = ConversationError;

    fn try_from(messages: Vec<Message>) -> Result<Self, Self::Error> {
        Self::new(messages)
    }
}

impl From<Conversation> for Vec<Message> {
    fn from(conversation: Conversation) -> Self {
        conversation.messages
    }
}

/// One completion call against a named provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Registry key of the provider; resolved at call time.
    pub provider: String,
    pub model: String,
    pub conversation: Conversation,
    pub max_output_tokens: Option<NonZeroU32>,
}

impl CompletionRequest {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        conversation: Conversation,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            conversation,
            max_output_tokens: None,
        }
    }

    #[must_use]
    pub fn with_max_output_tokens(mut self, max: NonZeroU32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }
}

/// Token usage statistics as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Normalized result of a completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    /// Content of the first choice; may be empty.
    pub text: String,
    /// `None` when the backend sent no usage telemetry.
    pub usage: Option<TokenUsage>,
    /// Model name echoed by the backend.
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

// ============================================================================
// Wire format (OpenAI-compatible)
// ============================================================================

/// A chat completion request body.
#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl<'a> From<&'a CompletionRequest> for ChatRequest<'a> {
    fn from(request: &'a CompletionRequest) -> Self {
        Self {
            model: &request.model,
            messages: request.conversation.messages(),
            max_tokens: request.max_output_tokens.map(NonZeroU32::get),
        }
    }
}

/// A chat completion response body. Every field is optional so that shape
/// problems are reported by [`ChatResponse::into_result`] rather than as
/// opaque JSON errors.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    pub model: Option<String>,
    pub choices: Option<Vec<Choice>>,
    /// Kept untyped; see [`normalize_usage`].
    pub usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    pub message: Option<ChoiceMessage>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChoiceMessage {
    pub content: Option<Content>,
}

/// Message content: a plain string, or a list of typed parts.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContentPart {
    #[serde(rename = "type")]
    pub part_type: Option<String>,
    pub text: Option<String>,
}

/// Read a usage block. Counters may be spelled `prompt_tokens`/`completion_tokens`
/// or `input_tokens`/`output_tokens`; the first numeric spelling wins. Usage is
/// only reported when both counters are present and fit in `u32`. A missing
/// total is the sum of the two; a reported total is kept as-is.
pub(crate) fn normalize_usage(usage: &Value) -> Option<TokenUsage> {
    let prompt_tokens = counter(usage, &["prompt_tokens", "input_tokens"])?;
    let completion_tokens = counter(usage, &["completion_tokens", "output_tokens"])?;
    let total_tokens = counter(usage, &["total_tokens"])
        .unwrap_or_else(|| prompt_tokens.saturating_add(completion_tokens));
    Some(TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    })
}

fn counter(usage: &Value, keys: &[&str]) -> Option<u32> {
    keys.iter()
        .find_map(|key| usage.get(*key).and_then(Value::as_u64))
        .and_then(|n| u32::try_from(n).ok())
}

impl Content {
    pub(crate) fn into_text(self) -> String {
        match self {
            Content::Text(text) => text,
            Content::Parts(parts) => parts
                .into_iter()
                .filter(|p| p.part_type.as_deref().is_none_or(|t| t == "text"))
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl ChatResponse {
    /// Extract the first choice's text and any reported usage.
    pub fn into_result(self) -> Result<CompletionResult, String> {
        let choices = self
            .choices
            .ok_or_else(|| "response has no 'choices' field".to_string())?;
        let first = choices
            .into_iter()
            .next()
            .ok_or_else(|| "response 'choices' is empty".to_string())?;
        let message = first
            .message
            .ok_or_else(|| "first choice has no 'message'".to_string())?;

        Ok(CompletionResult {
            text: message.content.map(Content::into_text).unwrap_or_default(),
            usage: self.usage.as_ref().and_then(normalize_usage),
            model: self.model,
            finish_reason: first.finish_reason,
        })
    }
}
