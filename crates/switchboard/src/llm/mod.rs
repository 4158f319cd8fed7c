//! Provider registry and completion invoker for OpenAI-compatible chat APIs
//! and Anthropic's native Messages API.

mod anthropic;
mod error;
mod invoker;
mod provider;
mod registry;
mod types;

pub use error::{LLMError, TransportFailure};
pub use invoker::{CompletionInvoker, CompletionOptions};
pub use provider::{
    ApiFormat, AuthMode, EnvSecrets, PLACEHOLDER_TOKEN, ProviderConfig, ResolvedProvider,
    SecretSource, StaticSecrets,
};
pub use registry::{CredentialStatus, ProviderRegistry, default_providers};
pub use types::{
    CompletionRequest, CompletionResult, Conversation, ConversationError, Message, Role,
    TokenUsage,
};
