//! Completion invoker.
//!
//! Works with OpenAI, Anthropic, Gemini, DeepSeek, Groq, Grok, OpenRouter,
//! Ollama, and anything else that serves `POST {base_url}/chat/completions`.
//! Providers configured with [`ApiFormat::AnthropicMessages`] are spoken to
//! through Anthropic's native `POST {base_url}/messages` instead.

use std::time::{Duration, Instant};

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};
use ulid::Ulid;

use super::anthropic::{self, MessagesRequest, MessagesResponse};
use super::error::{LLMError, TransportFailure, retry_after};
use super::provider::ApiFormat;
use super::registry::ProviderRegistry;
use super::types::{ChatRequest, ChatResponse, CompletionRequest, CompletionResult};

/// Per-call knobs for [`CompletionInvoker::complete_with`].
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    /// Overrides the invoker's default timeout.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

/// Sends one completion request per call to a provider resolved from the registry.
///
/// No retries are attempted; every error goes straight back to the caller.
#[derive(Clone)]
pub struct CompletionInvoker {
    client: Client,
    registry: ProviderRegistry,
    timeout: Option<Duration>,
}

struct Exchange {
    status: StatusCode,
    retry_after: Option<u64>,
    body: String,
}

impl CompletionInvoker {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self::with_client(Client::new(), registry)
    }

    pub fn with_client(client: Client, registry: ProviderRegistry) -> Self {
        Self {
            client,
            registry,
            timeout: None,
        }
    }

    /// Default timeout applied to every call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Make a chat completion request.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, LLMError> {
        self.complete_with(request, &CompletionOptions::default()).await
    }

    /// Make a chat completion request with a per-call timeout or cancellation token.
    pub async fn complete_with(
        &self,
        request: &CompletionRequest,
        options: &CompletionOptions,
    ) -> Result<CompletionResult, LLMError> {
        let span = info_span!(
            "complete",
            request_id = %Ulid::new(),
            provider = %request.provider,
            model = %request.model,
        );
        self.execute(request, options).instrument(span).await
    }

    async fn execute(
        &self,
        request: &CompletionRequest,
        options: &CompletionOptions,
    ) -> Result<CompletionResult, LLMError> {
        if request.model.trim().is_empty() {
            return Err(LLMError::InvalidRequest(
                "model must not be empty".to_string(),
            ));
        }

        let provider = self.registry.resolve(&request.provider)?;
        let url = provider.endpoint_url();

        let builder = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json");
        let mut builder = match provider.api {
            ApiFormat::OpenaiChat => builder.json(&ChatRequest::from(request)),
            ApiFormat::AnthropicMessages => builder
                .header("anthropic-version", anthropic::API_VERSION)
                .json(&MessagesRequest::from(request)),
        };
        if let Some((name, value)) = provider.auth_header() {
            builder = builder.header(name, value);
        }

        debug!(%url, messages = request.conversation.len(), "Sending completion request");
        let started = Instant::now();

        let timeout = options.timeout.or(self.timeout);
        let exchange = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, send(builder)).await {
                    Ok(result) => result.map_err(TransportFailure::Network),
                    Err(_) => Err(TransportFailure::Timeout(limit)),
                },
                None => send(builder).await.map_err(TransportFailure::Network),
            }
        };
        let outcome = match &options.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(TransportFailure::Cancelled),
                    result = exchange => result,
                }
            }
            None => exchange.await,
        };

        let Exchange {
            status,
            retry_after,
            body,
        } = outcome.map_err(|failure| {
            warn!(error = %failure, "Completion request failed");
            LLMError::Transport {
                provider: provider.name.clone(),
                failure,
            }
        })?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Backend returned error status");
            return Err(LLMError::Backend {
                provider: provider.name,
                status: status.as_u16(),
                body,
                retry_after,
            });
        }

        let malformed = |reason: String| {
            warn!(%reason, "Malformed completion response");
            LLMError::MalformedResponse {
                provider: provider.name.clone(),
                reason,
            }
        };
        let result = parse_reply(provider.api, &body).map_err(malformed)?;

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            prompt_tokens = result.usage.map(|u| u.prompt_tokens),
            completion_tokens = result.usage.map(|u| u.completion_tokens),
            "Completion finished"
        );
        Ok(result)
    }
}

/// Decode a success body in the provider's wire format.
fn parse_reply(api: ApiFormat, body: &str) -> Result<CompletionResult, String> {
    let invalid = |e: serde_json::Error| format!("invalid JSON body: {e}");
    match api {
        ApiFormat::OpenaiChat => serde_json::from_str::<ChatResponse>(body)
            .map_err(invalid)?
            .into_result(),
        ApiFormat::AnthropicMessages => serde_json::from_str::<MessagesResponse>(body)
            .map_err(invalid)?
            .into_result(),
    }
}

/// One HTTP round trip: send the request and read the whole body.
async fn send(builder: RequestBuilder) -> Result<Exchange, reqwest::Error> {
    let response = builder.send().await?;
    let status = response.status();
    let retry_after = retry_after(&response);
    let body = response.text().await?;
    Ok(Exchange {
        status,
        retry_after,
        body,
    })
}
