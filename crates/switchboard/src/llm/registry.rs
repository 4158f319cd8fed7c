//! Provider registry: maps provider names to endpoint configuration and
//! resolves credentials at call time.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::error::LLMError;
use super::provider::{
    ApiFormat, AuthMode, EnvSecrets, PLACEHOLDER_TOKEN, ProviderConfig, ResolvedProvider,
    SecretSource,
};
use crate::config::Config;

/// Whether a provider's credential is available right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Present,
    Missing,
    NotRequired,
}

/// Registry of provider configurations, keyed by name.
///
/// Entries can be replaced at any time; each entry is swapped atomically so a
/// concurrent `resolve` sees either the old or the new configuration.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Arc<DashMap<String, Arc<ProviderConfig>>>,
    secrets: Arc<dyn SecretSource>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Empty registry reading secrets from the process environment.
    pub fn new() -> Self {
        Self::with_secrets(Arc::new(EnvSecrets))
    }

    pub fn with_secrets(secrets: Arc<dyn SecretSource>) -> Self {
        Self {
            providers: Arc::new(DashMap::new()),
            secrets,
        }
    }

    /// Registry holding the built-in provider table.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register_defaults();
        registry
    }

    /// Build from configuration: built-in providers (unless disabled), then
    /// the configured ones, which override built-ins of the same name.
    pub fn from_config(config: &Config, secrets: Arc<dyn SecretSource>) -> Self {
        let registry = Self::with_secrets(secrets);
        if config.include_default_providers {
            registry.register_defaults();
        }
        for provider in &config.providers {
            registry.register(provider.clone());
        }

        if registry.is_empty() {
            warn!("No LLM providers configured");
        }
        registry
    }

    fn register_defaults(&self) {
        for provider in default_providers() {
            self.register(provider);
        }
    }

    /// Add or replace the entry for `config.name`.
    pub fn register(&self, config: ProviderConfig) {
        let name = config.name.clone();
        if self
            .providers
            .insert(name.clone(), Arc::new(config))
            .is_some()
        {
            info!(provider = %name, "Replaced provider");
        } else {
            debug!(provider = %name, "Registered provider");
        }
    }

    /// Look up a provider's configuration.
    pub fn get(&self, name: &str) -> Option<Arc<ProviderConfig>> {
        self.providers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolve a provider name into an endpoint and credential.
    ///
    /// The secret is read on every call, so a rotated or removed key is
    /// noticed without rebuilding the registry.
    pub fn resolve(&self, name: &str) -> Result<ResolvedProvider, LLMError> {
        let config = self.get(name).ok_or_else(|| LLMError::UnknownProvider {
            name: name.to_string(),
        })?;

        let auth_token = match config.auth {
            AuthMode::None => None,
            AuthMode::BearerToken | AuthMode::ApiKeyHeader => {
                let env_var = config.credential_env.as_deref().unwrap_or_default();
                let secret = self
                    .lookup(config.credential_env.as_deref())
                    .ok_or_else(|| LLMError::MissingCredential {
                        provider: config.name.clone(),
                        env_var: if env_var.is_empty() {
                            "<no credential_env configured>".to_string()
                        } else {
                            env_var.to_string()
                        },
                    })?;
                Some(secret)
            }
            AuthMode::SyntheticPlaceholderToken => Some(
                self.lookup(config.credential_env.as_deref())
                    .unwrap_or_else(|| PLACEHOLDER_TOKEN.to_string()),
            ),
        };

        Ok(ResolvedProvider {
            name: config.name.clone(),
            base_url: config.base_url.clone(),
            auth: config.auth,
            api: config.api,
            auth_token,
        })
    }

    /// The credential for `name` in its current state; `None` for an unknown provider.
    pub fn credential_status(&self, name: &str) -> Option<CredentialStatus> {
        let config = self.get(name)?;
        let status = if !config.auth.requires_credential() {
            CredentialStatus::NotRequired
        } else if self.lookup(config.credential_env.as_deref()).is_some() {
            CredentialStatus::Present
        } else {
            CredentialStatus::Missing
        };
        Some(status)
    }

    /// The raw secret for `name`, if its provider names one and it is set.
    pub fn credential(&self, name: &str) -> Option<String> {
        let config = self.get(name)?;
        self.lookup(config.credential_env.as_deref())
    }

    fn lookup(&self, key: Option<&str>) -> Option<String> {
        let key = key.filter(|k| !k.is_empty())?;
        self.secrets.get(key).filter(|v| !v.trim().is_empty())
    }
}

/// The built-in provider table.
pub fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::bearer("openai", "https://api.openai.com/v1", "OPENAI_API_KEY")
            .with_default_model("gpt-4.1-mini"),
        ProviderConfig::bearer(
            "anthropic",
            "https://api.anthropic.com/v1/",
            "ANTHROPIC_API_KEY",
        )
        .with_default_model("claude-sonnet-4-5-20250929"),
        ProviderConfig::new(
            "anthropic-native",
            "https://api.anthropic.com/v1",
            AuthMode::ApiKeyHeader,
        )
        .with_credential_env("ANTHROPIC_API_KEY")
        .with_api(ApiFormat::AnthropicMessages)
        .with_default_model("claude-sonnet-4-5-20250929"),
        ProviderConfig::bearer(
            "gemini",
            "https://generativelanguage.googleapis.com/v1beta/openai/",
            "GOOGLE_API_KEY",
        )
        .with_default_model("gemini-2.5-pro"),
        ProviderConfig::bearer("deepseek", "https://api.deepseek.com", "DEEPSEEK_API_KEY")
            .with_default_model("deepseek-reasoner"),
        ProviderConfig::bearer("groq", "https://api.groq.com/openai/v1", "GROQ_API_KEY")
            .with_default_model("openai/gpt-oss-120b"),
        ProviderConfig::bearer("grok", "https://api.x.ai/v1", "GROK_API_KEY")
            .with_default_model("grok-4"),
        ProviderConfig::bearer(
            "openrouter",
            "https://openrouter.ai/api/v1",
            "OPENROUTER_API_KEY",
        ),
        ProviderConfig::new(
            "ollama",
            "http://localhost:11434/v1",
            AuthMode::SyntheticPlaceholderToken,
        )
        .with_default_model("llama3.2"),
    ]
}
