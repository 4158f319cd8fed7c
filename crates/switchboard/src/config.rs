use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::llm::ProviderConfig;
use crate::tokens::TokenizerId;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_tokenizer")]
    pub default_tokenizer: String,
    /// Register the built-in provider table before `providers`.
    #[serde(default = "default_true")]
    pub include_default_providers: bool,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            default_tokenizer: default_tokenizer(),
            include_default_providers: true,
            providers: Vec::new(),
        }
    }
}

impl Config {
    /// Load and validate a config file. A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let config: Self = serde_saphyr::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_tokenizer
            .parse::<TokenizerId>()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        for provider in &self.providers {
            provider.validate()?;
        }
        Ok(())
    }

    /// `None` when the timeout is disabled (`0`).
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.request_timeout_seconds))
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("switchboard.yaml")
}

fn default_request_timeout() -> u64 {
    120
}

fn default_tokenizer() -> String {
    TokenizerId::O200kBase.as_str().to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("invalid provider '{name}': {reason}")]
    InvalidProvider { name: String, reason: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// Tests
// ============================================================================
