// Server Configuration
// Defaults, optional TOML file and SOCIALGATE_* environment variables, in that order

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::auth::error::AuthError;
use crate::auth::providers::{OAuth2ProviderConfig, SUPPORTED_PROVIDERS};

pub const ENV_PREFIX: &str = "SOCIALGATE_";

const MIN_SESSION_TTL_SECS: u64 = 60;
const MAX_SESSION_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Configuration for the socialgate server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub auth: AuthFlowConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Public base URL, used to derive provider callback URLs
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Session cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Secret the cookie encryption key is derived from (minimum 32 characters).
    /// A random one is generated at startup when left empty.
    #[serde(default)]
    pub secret: String,

    /// Session lifetime in seconds
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Secure flag (HTTPS only) - should be true in production
    #[serde(default)]
    pub secure: bool,

    #[serde(default = "default_same_site")]
    pub same_site: SameSitePolicy,

    /// Keep the authenticated identity in the session so later visits resume
    /// without a new provider round-trip. When false every visit re-authenticates.
    #[serde(default = "default_true")]
    pub persist_identity: bool,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.secret.len() < 32 {
            return Err(AuthError::InvalidConfig {
                key: "session.secret".to_string(),
                reason: "must be at least 32 characters".to_string(),
            });
        }

        if !(MIN_SESSION_TTL_SECS..=MAX_SESSION_TTL_SECS).contains(&self.ttl_seconds) {
            return Err(AuthError::InvalidConfig {
                key: "session.ttl_seconds".to_string(),
                reason: format!(
                    "must be between {} and {} seconds",
                    MIN_SESSION_TTL_SECS, MAX_SESSION_TTL_SECS
                ),
            });
        }

        if self.cookie_name.is_empty()
            || !self
                .cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AuthError::InvalidConfig {
                key: "session.cookie_name".to_string(),
                reason: "must be non-empty and only contain [A-Za-z0-9_-]".to_string(),
            });
        }

        if self.same_site == SameSitePolicy::None && !self.secure {
            return Err(AuthError::InvalidConfig {
                key: "session.same_site".to_string(),
                reason: "SameSite=None requires secure cookies".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl_seconds: default_session_ttl(),
            cookie_name: default_cookie_name(),
            secure: false, // Development default
            same_site: default_same_site(),
            persist_identity: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    Lax,
    None,
}

/// Timeouts for the provider handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFlowConfig {
    /// Upper bound for code exchange plus profile fetch, in seconds
    pub exchange_timeout_secs: u64,

    /// Timeout of each individual HTTP call to a provider, in seconds
    pub http_timeout_secs: u64,
}

impl AuthFlowConfig {
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for AuthFlowConfig {
    fn default() -> Self {
        Self {
            exchange_timeout_secs: 10,
            http_timeout_secs: 10,
        }
    }
}

/// OAuth2 providers configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apple: Option<ProviderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<ProviderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub google: Option<ProviderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter: Option<ProviderConfig>,
}

impl ProvidersConfig {
    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        match name {
            "apple" => self.apple.as_ref(),
            "github" => self.github.as_ref(),
            "google" => self.google.as_ref(),
            "twitter" => self.twitter.as_ref(),
            _ => None,
        }
    }

    fn slot(&mut self, name: &str) -> Option<&mut Option<ProviderConfig>> {
        match name {
            "apple" => Some(&mut self.apple),
            "github" => Some(&mut self.github),
            "google" => Some(&mut self.google),
            "twitter" => Some(&mut self.twitter),
            _ => None,
        }
    }

    /// Get list of enabled provider names
    pub fn enabled_providers(&self) -> Vec<&'static str> {
        SUPPORTED_PROVIDERS
            .into_iter()
            .filter(|name| self.get(name).is_some())
            .collect()
    }
}

/// OAuth2 provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Callback URL; defaults to `{base_url}/auth/{provider}/callback`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_url: Option<String>,

    /// Provider-specific: Apple team ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,

    /// Provider-specific: Apple key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,

    /// Provider-specific: Apple private key (PEM format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    /// Extra query parameters added to the authorization request
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra_params: HashMap<String, String>,
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, AuthError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Config = figment
            .extract()
            .map_err(|e| AuthError::ConfigError(e.to_string()))?;

        config.apply_provider_env(|key| std::env::var(key).ok());
        config.ensure_session_secret();
        config.validate()?;

        Ok(config)
    }

    /// Fill unconfigured providers from `GITHUB_KEY` / `GITHUB_SECRET` style variables
    pub fn apply_provider_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for name in SUPPORTED_PROVIDERS {
            let prefix = name.to_uppercase();
            let Some(client_id) = lookup(&format!("{}_KEY", prefix)).filter(|v| !v.is_empty())
            else {
                continue;
            };

            if let Some(slot) = self.providers.slot(name)
                && slot.is_none()
            {
                *slot = Some(ProviderConfig {
                    client_id,
                    client_secret: lookup(&format!("{}_SECRET", prefix)).unwrap_or_default(),
                    ..Default::default()
                });
            }
        }
    }

    fn ensure_session_secret(&mut self) {
        if self.session.secret.is_empty() {
            warn!("No session secret configured; sessions will not survive a restart");
            let random_bytes: [u8; 32] = rand::random();
            self.session.secret = URL_SAFE_NO_PAD.encode(random_bytes);
        }
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        url::Url::parse(&self.server.base_url).map_err(|e| AuthError::InvalidConfig {
            key: "server.base_url".to_string(),
            reason: e.to_string(),
        })?;

        self.session.validate()?;
        self.validate_cookie_policy()?;

        if self.auth.exchange_timeout_secs == 0 || self.auth.http_timeout_secs == 0 {
            return Err(AuthError::InvalidConfig {
                key: "auth".to_string(),
                reason: "timeouts must be at least 1 second".to_string(),
            });
        }

        for (name, config) in self.provider_configs() {
            config.validate().map_err(|e| AuthError::InvalidConfig {
                key: format!("providers.{}", name),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }

    /// Reject cookie policies under which the browser would not send the
    /// session back to the callback route.
    fn validate_cookie_policy(&self) -> Result<(), AuthError> {
        let enabled = self.providers.enabled_providers();
        if enabled.is_empty() {
            return Ok(());
        }

        // Strict cookies are dropped on the redirect back from any provider
        if self.session.same_site == SameSitePolicy::Strict {
            return Err(AuthError::InvalidConfig {
                key: "session.same_site".to_string(),
                reason: format!(
                    "SameSite=Strict drops the session on provider callbacks ({})",
                    enabled.join(", ")
                ),
            });
        }

        // Apple calls back with a cross-site form POST
        if enabled.contains(&"apple") && self.session.same_site != SameSitePolicy::None {
            return Err(AuthError::InvalidConfig {
                key: "session.same_site".to_string(),
                reason: "Sign in with Apple posts its callback cross-site; \
                         set same_site = \"none\" and secure = true"
                    .to_string(),
            });
        }

        Ok(())
    }

    /// Runtime configuration for each enabled provider
    pub fn provider_configs(&self) -> Vec<(&'static str, OAuth2ProviderConfig)> {
        self.providers
            .enabled_providers()
            .into_iter()
            .filter_map(|name| {
                let provider = self.providers.get(name)?;
                Some((name, self.runtime_provider_config(name, provider)))
            })
            .collect()
    }

    fn runtime_provider_config(
        &self,
        name: &str,
        provider: &ProviderConfig,
    ) -> OAuth2ProviderConfig {
        let redirect_uri = provider.redirect_uri.clone().unwrap_or_else(|| {
            format!(
                "{}/auth/{}/callback",
                self.server.base_url.trim_end_matches('/'),
                name
            )
        });

        OAuth2ProviderConfig {
            scopes: provider.scopes.clone(),
            auth_url: provider.auth_url.clone(),
            token_url: provider.token_url.clone(),
            userinfo_url: provider.userinfo_url.clone(),
            jwks_url: provider.jwks_url.clone(),
            team_id: provider.team_id.clone(),
            key_id: provider.key_id.clone(),
            private_key: provider.private_key.clone(),
            extra_params: provider.extra_params.clone(),
            http_timeout: self.auth.http_timeout(),
            ..OAuth2ProviderConfig::new(
                provider.client_id.clone(),
                provider.client_secret.clone(),
                redirect_uri,
            )
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn default_session_ttl() -> u64 {
    1800 // 30 minutes
}

fn default_cookie_name() -> String {
    "_socialgate_session".to_string()
}

fn default_same_site() -> SameSitePolicy {
    SameSitePolicy::Lax
}

fn default_true() -> bool {
    true
}
