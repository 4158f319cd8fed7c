//! Approximate token counting.
//!
//! Counts are for budgeting and display. They are not what a backend bills:
//! providers tokenize with their own, versioned schemes and wrap messages in
//! formatting this module does not reproduce. Use [`CompletionResult::usage`]
//! when an exact number matters.
//!
//! [`CompletionResult::usage`]: crate::llm::CompletionResult::usage

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::llm::Conversation;

/// Characters per token assumed by [`TokenizerId::Heuristic`].
const HEURISTIC_CHARS_PER_TOKEN: usize = 4;

/// Errors from the token estimator.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("unknown tokenizer: {0}")]
    UnknownTokenizer(String),

    #[error("failed to load tokenizer {tokenizer}: {message}")]
    Load {
        tokenizer: TokenizerId,
        message: String,
    },
}

/// A token-counting scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenizerId {
    O200kBase,
    Cl100kBase,
    P50kBase,
    R50kBase,
    /// One token per four characters, rounded up.
    Heuristic,
}

impl TokenizerId {
    pub const ALL: [TokenizerId; 5] = [
        TokenizerId::O200kBase,
        TokenizerId::Cl100kBase,
        TokenizerId::P50kBase,
        TokenizerId::R50kBase,
        TokenizerId::Heuristic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenizerId::O200kBase => "o200k_base",
            TokenizerId::Cl100kBase => "cl100k_base",
            TokenizerId::P50kBase => "p50k_base",
            TokenizerId::R50kBase => "r50k_base",
            TokenizerId::Heuristic => "heuristic",
        }
    }

    /// Tokenizer for a model family. Provider prefixes such as `openai/` are
    /// ignored; models outside the OpenAI families fall back to the heuristic.
    pub fn for_model(model: &str) -> Self {
        let model = model.rsplit('/').next().unwrap_or(model).to_ascii_lowercase();
        let starts = |prefixes: &[&str]| prefixes.iter().any(|p| model.starts_with(p));

        const O200K: &[&str] = &[
            "gpt-4o", "gpt-4.1", "gpt-4.5", "gpt-5", "chatgpt-4o", "gpt-oss", "o1", "o3", "o4",
        ];
        const CL100K: &[&str] = &["gpt-4", "gpt-3.5", "text-embedding-3", "text-embedding-ada-002"];
        const P50K: &[&str] = &["text-davinci-002", "text-davinci-003", "code-"];
        const R50K: &[&str] = &["davinci", "curie", "babbage", "ada"];

        if starts(O200K) {
            TokenizerId::O200kBase
        } else if starts(CL100K) {
            TokenizerId::Cl100kBase
        } else if starts(P50K) {
            TokenizerId::P50kBase
        } else if starts(R50K) {
            TokenizerId::R50kBase
        } else {
            TokenizerId::Heuristic
        }
    }

    fn load(self) -> anyhow::Result<Option<CoreBPE>> {
        let bpe = match self {
            TokenizerId::O200kBase => tiktoken_rs::o200k_base()?,
            TokenizerId::Cl100kBase => tiktoken_rs::cl100k_base()?,
            TokenizerId::P50kBase => tiktoken_rs::p50k_base()?,
            TokenizerId::R50kBase => tiktoken_rs::r50k_base()?,
            TokenizerId::Heuristic => return Ok(None),
        };
        Ok(Some(bpe))
    }
}

impl fmt::Display for TokenizerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenizerId {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| TokenError::UnknownTokenizer(s.to_string()))
    }
}

/// A token count and the scheme that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimate {
    pub count: usize,
    pub tokenizer: TokenizerId,
}

impl TokenEstimate {
    /// `reported - estimated`; positive when the backend counted more.
    pub fn drift(&self, reported: u32) -> i64 {
        i64::from(reported) - self.count as i64
    }
}

/// Flatten a conversation into `"role: content\n"` lines, in order.
pub fn flatten_conversation(conversation: &Conversation) -> String {
    conversation
        .messages()
        .iter()
        .map(|m| format!("{}: {}\n", m.role, m.content))
        .collect()
}

/// Counts tokens with lazily loaded, cached BPE tables.
#[derive(Clone, Default)]
pub struct TokenEstimator {
    encoders: Arc<DashMap<TokenizerId, Arc<CoreBPE>>>,
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the tokens in `text` using the tokenizer named `tokenizer_id`.
    pub fn estimate(&self, text: &str, tokenizer_id: &str) -> Result<TokenEstimate, TokenError> {
        self.estimate_with(text, tokenizer_id.parse()?)
    }

    pub fn estimate_with(
        &self,
        text: &str,
        tokenizer: TokenizerId,
    ) -> Result<TokenEstimate, TokenError> {
        let count = match self.encoder(tokenizer)? {
            Some(bpe) => bpe.encode_ordinary(text).len(),
            None => text.chars().count().div_ceil(HEURISTIC_CHARS_PER_TOKEN),
        };
        Ok(TokenEstimate { count, tokenizer })
    }

    /// Estimate the prompt size of a conversation from its flattened form.
    ///
    /// Backends add their own per-message framing, so this undercounts by a
    /// few tokens per message.
    pub fn estimate_conversation(
        &self,
        conversation: &Conversation,
        tokenizer_id: &str,
    ) -> Result<TokenEstimate, TokenError> {
        self.estimate(&flatten_conversation(conversation), tokenizer_id)
    }

    /// The text of each token, in order.
    pub fn pieces(&self, text: &str, tokenizer_id: &str) -> Result<Vec<String>, TokenError> {
        let tokenizer: TokenizerId = tokenizer_id.parse()?;
        let Some(bpe) = self.encoder(tokenizer)? else {
            let chars: Vec<char> = text.chars().collect();
            return Ok(chars
                .chunks(HEURISTIC_CHARS_PER_TOKEN)
                .map(|c| c.iter().collect())
                .collect());
        };

        Ok(bpe
            .encode_ordinary(text)
            .into_iter()
            // A single token can hold part of a multi-byte character.
            .map(|token| {
                bpe.decode(vec![token])
                    .unwrap_or_else(|_| char::REPLACEMENT_CHARACTER.to_string())
            })
            .collect())
    }

    fn encoder(&self, tokenizer: TokenizerId) -> Result<Option<Arc<CoreBPE>>, TokenError> {
        if let Some(bpe) = self.encoders.get(&tokenizer) {
            return Ok(Some(Arc::clone(bpe.value())));
        }
        let Some(bpe) = tokenizer.load().map_err(|e| TokenError::Load {
            tokenizer,
            message: e.to_string(),
        })?
        else {
            return Ok(None);
        };

        debug!(%tokenizer, "Loaded tokenizer");
        let bpe = Arc::clone(
            self.encoders
                .entry(tokenizer)
                .or_insert_with(|| Arc::new(bpe))
                .value(),
        );
        Ok(Some(bpe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    fn three_turns() -> Conversation {
        Conversation::new(vec![
            Message::system("You are a helpful assistant"),
            Message::user("Hi! I'm Mkay!"),
            Message::assistant("Hi Mkay! How can I assist you today?"),
        ])
        .unwrap()
    }

    #[test]
    fn flatten_matches_role_prefixed_lines() {
        let conversation =
            Conversation::new(vec![Message::system("S"), Message::user("Hi")]).unwrap();
        assert_eq!(flatten_conversation(&conversation), "system: S\nuser: Hi\n");
    }

    #[test]
    fn conversation_estimate_equals_flattened_estimate() {
        let estimator = TokenEstimator::new();
        let conversation = three_turns();
        let flat = "system: You are a helpful assistant\n\
                    user: Hi! I'm Mkay!\n\
                    assistant: Hi Mkay! How can I assist you today?\n";
        assert_eq!(flatten_conversation(&conversation), flat);

        for id in TokenizerId::ALL {
            let by_conversation = estimator
                .estimate_conversation(&conversation, id.as_str())
                .unwrap();
            let by_text = estimator.estimate(flat, id.as_str()).unwrap();
            assert_eq!(by_conversation, by_text, "{id}");
        }
    }

    #[test]
    fn estimate_is_deterministic() {
        let estimator = TokenEstimator::new();
        let first = estimator.estimate("Testing Tokenomies", "o200k_base").unwrap();
        for _ in 0..5 {
            assert_eq!(
                estimator.estimate("Testing Tokenomies", "o200k_base").unwrap(),
                first
            );
        }
        let fresh = TokenEstimator::new()
            .estimate("Testing Tokenomies", "o200k_base")
            .unwrap();
        assert_eq!(fresh, first);
        assert!(first.count > 0);
    }

    #[test]
    fn cl100k_counts_known_text() {
        let estimator = TokenEstimator::new();
        let estimate = estimator.estimate("hello world", "cl100k_base").unwrap();
        assert_eq!(estimate.count, 2);
        assert_eq!(estimate.tokenizer, TokenizerId::Cl100kBase);
    }

    #[test]
    fn empty_text_has_no_tokens() {
        let estimator = TokenEstimator::new();
        for id in TokenizerId::ALL {
            assert_eq!(estimator.estimate("", id.as_str()).unwrap().count, 0);
        }
    }

    #[test]
    fn heuristic_rounds_up() {
        let estimator = TokenEstimator::new();
        assert_eq!(estimator.estimate("abcd", "heuristic").unwrap().count, 1);
        assert_eq!(estimator.estimate("abcde", "heuristic").unwrap().count, 2);
        assert_eq!(estimator.estimate("ééééé", "heuristic").unwrap().count, 2);
    }

    #[test]
    fn unknown_tokenizer_is_rejected() {
        let estimator = TokenEstimator::new();
        match estimator.estimate("text", "gpt2-bogus") {
            Err(TokenError::UnknownTokenizer(id)) => assert_eq!(id, "gpt2-bogus"),
            other => panic!("expected UnknownTokenizer, got {other:?}"),
        }
        assert!(
            estimator
                .estimate_conversation(&three_turns(), "nope")
                .is_err()
        );
    }

    #[test]
    fn pieces_reassemble_text() {
        let estimator = TokenEstimator::new();
        let text = "Testing Tokenomies";
        let pieces = estimator.pieces(text, "o200k_base").unwrap();
        assert_eq!(
            pieces.len(),
            estimator.estimate(text, "o200k_base").unwrap().count
        );
        assert_eq!(pieces.concat(), text);

        let pieces = estimator.pieces("abcdefghij", "heuristic").unwrap();
        assert_eq!(pieces, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn tokenizer_for_model_family() {
        assert_eq!(TokenizerId::for_model("gpt-4o-mini"), TokenizerId::O200kBase);
        assert_eq!(TokenizerId::for_model("gpt-4.1-mini"), TokenizerId::O200kBase);
        assert_eq!(
            TokenizerId::for_model("openai/gpt-oss-120b"),
            TokenizerId::O200kBase
        );
        assert_eq!(TokenizerId::for_model("gpt-4"), TokenizerId::Cl100kBase);
        assert_eq!(
            TokenizerId::for_model("gpt-3.5-turbo"),
            TokenizerId::Cl100kBase
        );
        assert_eq!(
            TokenizerId::for_model("text-davinci-003"),
            TokenizerId::P50kBase
        );
        assert_eq!(TokenizerId::for_model("davinci"), TokenizerId::R50kBase);
        assert_eq!(TokenizerId::for_model("llama3.2"), TokenizerId::Heuristic);
        assert_eq!(
            TokenizerId::for_model("claude-sonnet-4-5-20250929"),
            TokenizerId::Heuristic
        );
    }

    #[test]
    fn tokenizer_id_round_trips_through_str() {
        for id in TokenizerId::ALL {
            assert_eq!(id.as_str().parse::<TokenizerId>().unwrap(), id);
        }
    }

    #[test]
    fn drift_against_reported_usage() {
        let estimate = TokenEstimate {
            count: 20,
            tokenizer: TokenizerId::O200kBase,
        };
        assert_eq!(estimate.drift(27), 7);
        assert_eq!(estimate.drift(15), -5);
    }
}
