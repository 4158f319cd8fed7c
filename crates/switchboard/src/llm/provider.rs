//! Provider configuration, credential sources, and resolved endpoints.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ConfigError;

/// Token sent to backends that want a non-empty but arbitrary bearer token.
pub const PLACEHOLDER_TOKEN: &str = "ollama";

/// How a provider authenticates requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// `Authorization: Bearer <secret>`; the secret is required.
    BearerToken,
    /// No authorization header.
    None,
    /// `Authorization: Bearer <anything>`; a placeholder is used when no secret is set.
    SyntheticPlaceholderToken,
    /// `x-api-key: <secret>`; the secret is required.
    ApiKeyHeader,
}

impl AuthMode {
    pub fn requires_credential(&self) -> bool {
        matches!(self, AuthMode::BearerToken | AuthMode::ApiKeyHeader)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            AuthMode::BearerToken => "bearer-token",
            AuthMode::None => "none",
            AuthMode::SyntheticPlaceholderToken => "synthetic-placeholder-token",
            AuthMode::ApiKeyHeader => "api-key-header",
        })
    }
}

/// Request and response format spoken by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiFormat {
    /// `POST {base_url}/chat/completions`.
    #[default]
    OpenaiChat,
    /// Anthropic's native `POST {base_url}/messages`.
    AnthropicMessages,
}

impl fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            ApiFormat::OpenaiChat => "openai-chat",
            ApiFormat::AnthropicMessages => "anthropic-messages",
        })
    }
}

/// Static description of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub auth: AuthMode,
    #[serde(default)]
    pub api: ApiFormat,
    /// Name of the secret holding the API key.
    #[serde(default)]
    pub credential_env: Option<String>,
    /// Model used when the caller does not pick one.
    #[serde(default)]
    pub default_model: Option<String>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, auth: AuthMode) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            auth,
            api: ApiFormat::default(),
            credential_env: None,
            default_model: None,
        }
    }

    /// Bearer-token provider reading its key from `env_var`.
    pub fn bearer(
        name: impl Into<String>,
        base_url: impl Into<String>,
        env_var: impl Into<String>,
    ) -> Self {
        Self::new(name, base_url, AuthMode::BearerToken).with_credential_env(env_var)
    }

    #[must_use]
    pub fn with_credential_env(mut self, env_var: impl Into<String>) -> Self {
        self.credential_env = Some(env_var.into());
        self
    }

    #[must_use]
    pub fn with_api(mut self, api: ApiFormat) -> Self {
        self.api = api;
        self
    }

    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidProvider {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("provider name must not be empty".to_string()));
        }
        let url = Url::parse(&self.base_url)
            .map_err(|e| invalid(format!("invalid base_url '{}': {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "base_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.auth.requires_credential()
            && self
                .credential_env
                .as_deref()
                .is_none_or(|v| v.trim().is_empty())
        {
            return Err(invalid(format!("{} providers must set credential_env", self.auth)));
        }
        Ok(())
    }
}

/// Endpoint and credential for one call, produced by the registry.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedProvider {
    pub name: String,
    pub base_url: String,
    pub auth: AuthMode,
    pub api: ApiFormat,
    /// Secret or placeholder, absent for `AuthMode::None`.
    pub auth_token: Option<String>,
}

impl ResolvedProvider {
    /// Endpoint for the provider's API format, tolerating a trailing slash on the base.
    pub fn endpoint_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        match self.api {
            ApiFormat::OpenaiChat => format!("{base}/chat/completions"),
            ApiFormat::AnthropicMessages => format!("{base}/messages"),
        }
    }

    /// Name and value of the authentication header, if any.
    pub fn auth_header(&self) -> Option<(&'static str, String)> {
        let token = self.auth_token.as_ref()?;
        match self.auth {
            AuthMode::ApiKeyHeader => Some(("x-api-key", token.clone())),
            AuthMode::BearerToken | AuthMode::SyntheticPlaceholderToken => {
                Some(("authorization", format!("Bearer {token}")))
            }
            AuthMode::None => None,
        }
    }
}

impl fmt::Debug for ResolvedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("auth", &self.auth)
            .field("api", &self.api)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Looks up secrets by name.
pub trait SecretSource: Send + Sync {
    /// The secret value, or `None` when it is unset.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads secrets from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// In-memory secrets.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl SecretSource for StaticSecrets {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StaticSecrets {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(
        base_url: &str,
        auth: AuthMode,
        api: ApiFormat,
        token: Option<&str>,
    ) -> ResolvedProvider {
        ResolvedProvider {
            name: "test".to_string(),
            base_url: base_url.to_string(),
            auth,
            api,
            auth_token: token.map(str::to_string),
        }
    }

    #[test]
    fn endpoint_url_strips_trailing_slash() {
        let openai = resolved(
            "https://api.anthropic.com/v1/",
            AuthMode::BearerToken,
            ApiFormat::OpenaiChat,
            None,
        );
        assert_eq!(
            openai.endpoint_url(),
            "https://api.anthropic.com/v1/chat/completions"
        );

        let bare = resolved(
            "https://api.deepseek.com",
            AuthMode::BearerToken,
            ApiFormat::OpenaiChat,
            None,
        );
        assert_eq!(bare.endpoint_url(), "https://api.deepseek.com/chat/completions");
    }

    #[test]
    fn endpoint_url_for_anthropic_messages() {
        let native = resolved(
            "https://api.anthropic.com/v1/",
            AuthMode::ApiKeyHeader,
            ApiFormat::AnthropicMessages,
            None,
        );
        assert_eq!(native.endpoint_url(), "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn auth_header_follows_auth_mode() {
        let bearer = resolved("http://x", AuthMode::BearerToken, ApiFormat::OpenaiChat, Some("k"));
        assert_eq!(
            bearer.auth_header(),
            Some(("authorization", "Bearer k".to_string()))
        );

        let api_key = resolved(
            "http://x",
            AuthMode::ApiKeyHeader,
            ApiFormat::AnthropicMessages,
            Some("k"),
        );
        assert_eq!(api_key.auth_header(), Some(("x-api-key", "k".to_string())));

        let open = resolved("http://x", AuthMode::None, ApiFormat::OpenaiChat, None);
        assert_eq!(open.auth_header(), None);
    }

    #[test]
    fn debug_redacts_token() {
        let resolved = resolved(
            "https://api.openai.com/v1",
            AuthMode::BearerToken,
            ApiFormat::OpenaiChat,
            Some("sk-secret-value"),
        );
        let debug = format!("{resolved:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("<redacted>"));
        assert_eq!(
            resolved.auth_header(),
            Some(("authorization", "Bearer sk-secret-value".to_string()))
        );
    }

    #[test]
    fn validate_accepts_loopback_http() {
        let config = ProviderConfig::new(
            "ollama",
            "http://localhost:11434/v1",
            AuthMode::SyntheticPlaceholderToken,
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_relative_url() {
        let config = ProviderConfig::bearer("openai", "/v1", "OPENAI_API_KEY");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid base_url"));
    }

    #[test]
    fn validate_rejects_non_http_scheme() {
        let config = ProviderConfig::new("ftp", "ftp://example.com", AuthMode::None);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_env_var_for_bearer() {
        let config =
            ProviderConfig::new("openai", "https://api.openai.com/v1", AuthMode::BearerToken);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("credential_env"));
    }

    #[test]
    fn validate_requires_env_var_for_api_key_header() {
        let config = ProviderConfig::new(
            "anthropic-native",
            "https://api.anthropic.com/v1",
            AuthMode::ApiKeyHeader,
        )
        .with_api(ApiFormat::AnthropicMessages);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("api-key-header providers must set credential_env"));
    }

    #[test]
    fn validate_rejects_empty_name() {
        let config = ProviderConfig::new(" ", "https://api.openai.com/v1", AuthMode::None);
        assert!(config.validate().is_err());
    }

    #[test]
    fn auth_mode_serde_is_kebab_case() {
        assert_eq!(
            serde_json::to_string(&AuthMode::SyntheticPlaceholderToken).unwrap(),
            "\"synthetic-placeholder-token\""
        );
        assert_eq!(
            serde_json::from_str::<AuthMode>("\"bearer-token\"").unwrap(),
            AuthMode::BearerToken
        );
        assert_eq!(AuthMode::None.to_string(), "none");
        assert_eq!(AuthMode::ApiKeyHeader.to_string(), "api-key-header");
    }

    #[test]
    fn api_format_defaults_to_openai_chat() {
        let config: ProviderConfig = serde_json::from_str(
            r#"{"name":"x","base_url":"http://localhost:1/v1","auth":"none"}"#,
        )
        .unwrap();
        assert_eq!(config.api, ApiFormat::OpenaiChat);
        assert_eq!(format!("{:<12}|", ApiFormat::OpenaiChat), "openai-chat |");

        assert_eq!(
            serde_json::from_str::<ApiFormat>("\"anthropic-messages\"").unwrap(),
            ApiFormat::AnthropicMessages
        );
    }

    #[test]
    fn static_secrets_lookup() {
        let secrets: StaticSecrets = [("OPENAI_API_KEY", "sk-test")].into_iter().collect();
        assert_eq!(secrets.get("OPENAI_API_KEY").as_deref(), Some("sk-test"));
        assert!(secrets.get("GROQ_API_KEY").is_none());
    }

    #[test]
    fn env_secrets_unset_variable() {
        assert!(
            EnvSecrets
                .get("SWITCHBOARD_TEST_VARIABLE_THAT_IS_NEVER_SET")
                .is_none()
        );
    }
}
