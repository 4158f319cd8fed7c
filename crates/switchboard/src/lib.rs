//! Switchboard - one request/response contract over many LLM backends.
//!
//! ```no_run
//! use switchboard::llm::{CompletionInvoker, CompletionRequest, Conversation, ProviderRegistry};
//!
//! # async fn run() -> Result<(), switchboard::llm::LLMError> {
//! let invoker = CompletionInvoker::new(ProviderRegistry::with_defaults());
//! let request = CompletionRequest::new(
//!     "groq",
//!     "openai/gpt-oss-120b",
//!     Conversation::prompt(None, "Tell a joke"),
//! );
//! let result = invoker.complete(&request).await?;
//! println!("{}", result.text);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod llm;
pub mod tokens;
