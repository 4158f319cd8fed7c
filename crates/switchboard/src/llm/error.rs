//! LLM error types.

use std::time::Duration;

use thiserror::Error;

/// Number of characters of a backend error body kept in the display message.
const BODY_EXCERPT_CHARS: usize = 512;

/// Parse a numeric `Retry-After` header from a backend response.
pub fn retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Errors that can occur when resolving a provider or making a completion call.
#[derive(Debug, Error)]
pub enum LLMError {
    /// The provider name was never registered.
    #[error("unknown provider: {name}")]
    UnknownProvider { name: String },

    /// The provider requires a credential and the secret is unset or empty.
    #[error("missing credential for provider '{provider}': {env_var} is not set")]
    MissingCredential { provider: String, env_var: String },

    /// The request was rejected before anything was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request never produced an HTTP response.
    #[error("transport error for provider '{provider}': {failure}")]
    Transport {
        provider: String,
        #[source]
        failure: TransportFailure,
    },

    /// The backend answered with a non-success status.
    #[error("backend error from provider '{provider}' (status {status}): {}", excerpt(.body))]
    Backend {
        provider: String,
        status: u16,
        body: String,
        retry_after: Option<u64>,
    },

    /// The backend answered 2xx but the body is not a chat completion.
    #[error("malformed response from provider '{provider}': {reason}")]
    MalformedResponse { provider: String, reason: String },
}

impl LLMError {
    /// HTTP status carried by a `Backend` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            LLMError::Backend { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            LLMError::Transport {
                failure: TransportFailure::Timeout(_),
                ..
            }
        )
    }

    /// Provider name the error relates to, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            LLMError::UnknownProvider { name } => Some(name),
            LLMError::MissingCredential { provider, .. }
            | LLMError::Transport { provider, .. }
            | LLMError::Backend { provider, .. }
            | LLMError::MalformedResponse { provider, .. } => Some(provider),
            LLMError::InvalidRequest(_) => None,
        }
    }
}

/// Why a request failed below the HTTP layer.
#[derive(Debug, Error)]
pub enum TransportFailure {
    /// Network, DNS, or TLS failure
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    /// No response within the configured timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the request
    #[error("cancelled")]
    Cancelled,
}

fn excerpt(body: &str) -> String {
    match body.char_indices().nth(BODY_EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_display_truncates_body() {
        let err = LLMError::Backend {
            provider: "openai".to_string(),
            status: 500,
            body: "x".repeat(2000),
            retry_after: None,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("backend error from provider 'openai' (status 500): "));
        assert!(msg.ends_with("..."));
        assert!(msg.len() < 600);
        if let LLMError::Backend { body, .. } = &err {
            assert_eq!(body.len(), 2000);
        }
    }

    #[test]
    fn backend_error_display_keeps_short_body() {
        let err = LLMError::Backend {
            provider: "groq".to_string(),
            status: 429,
            body: r#"{"error":"slow down"}"#.to_string(),
            retry_after: Some(3),
        };
        assert_eq!(
            err.to_string(),
            r#"backend error from provider 'groq' (status 429): {"error":"slow down"}"#
        );
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let body = "é".repeat(BODY_EXCERPT_CHARS + 1);
        let cut = excerpt(&body);
        assert_eq!(cut.chars().count(), BODY_EXCERPT_CHARS + 3);
    }

    #[test]
    fn timeout_predicate() {
        let err = LLMError::Transport {
            provider: "ollama".to_string(),
            failure: TransportFailure::Timeout(Duration::from_secs(5)),
        };
        assert!(err.is_timeout());
        assert_eq!(err.provider(), Some("ollama"));

        let err = LLMError::Transport {
            provider: "ollama".to_string(),
            failure: TransportFailure::Cancelled,
        };
        assert!(!err.is_timeout());
    }

    #[test]
    fn missing_credential_names_env_var() {
        let err = LLMError::MissingCredential {
            provider: "openai".to_string(),
            env_var: "OPENAI_API_KEY".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "missing credential for provider 'openai': OPENAI_API_KEY is not set"
        );
    }
}
