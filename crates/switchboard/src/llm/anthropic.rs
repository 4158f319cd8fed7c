//! Anthropic Messages API wire format.
//!
//! The system prompt travels in a top-level `system` field, `max_tokens` is
//! mandatory, and the reply is a list of typed content blocks.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{
    CompletionRequest, CompletionResult, Content, ContentPart, Message, Role, normalize_usage,
};

/// Value of the `anthropic-version` header.
pub(crate) const API_VERSION: &str = "2023-06-01";

/// Used when the request sets no output limit.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [Message],
}

impl<'a> From<&'a CompletionRequest> for MessagesRequest<'a> {
    fn from(request: &'a CompletionRequest) -> Self {
        let messages = request.conversation.messages();
        // A conversation holds at most one system message, always first.
        let (system, messages) = match messages.split_first() {
            Some((first, rest)) if first.role == Role::System => (Some(first), rest),
            _ => (None, messages),
        };

        Self {
            model: &request.model,
            max_tokens: request
                .max_output_tokens
                .map_or(DEFAULT_MAX_TOKENS, NonZeroU32::get),
            system: system
                .map(|m| m.content.as_str())
                .filter(|s| !s.is_empty()),
            messages,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesResponse {
    model: Option<String>,
    content: Option<Vec<ContentPart>>,
    stop_reason: Option<String>,
    usage: Option<Value>,
}

// ============================================================================
// Conversions
// ============================================================================

impl MessagesResponse {
    /// Join the text blocks and map `stop_reason` and usage onto the common result.
    pub fn into_result(self) -> Result<CompletionResult, String> {
        let blocks = self
            .content
            .ok_or_else(|| "response has no 'content' field".to_string())?;

        Ok(CompletionResult {
            text: Content::Parts(blocks).into_text(),
            usage: self.usage.as_ref().and_then(normalize_usage),
            model: self.model,
            finish_reason: self.stop_reason,
        })
    }
}
