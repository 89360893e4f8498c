use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::providers::{OAuth2TokenResponse, OAuth2UserInfo};

/// Result of a completed provider handshake.
///
/// Cached in the session cookie so a returning browser can be shown its
/// profile without contacting the provider again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedIdentity {
    pub provider: String,
    pub user_id: String,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub nickname: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub avatar_url: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Access token expiry, when the provider reports one
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthenticatedIdentity {
    pub fn new(
        provider: &str,
        user: OAuth2UserInfo,
        tokens: OAuth2TokenResponse,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = tokens
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| now + Duration::seconds(secs));

        Self {
            provider: provider.to_string(),
            user_id: user.user_id,
            name: user.name,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            nickname: user.nickname,
            description: user.description,
            location: user.location,
            avatar_url: user.avatar_url,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Display names for the providers this server offers, keyed by provider id.
///
/// Built once at startup and shared read-only; iteration is sorted by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderIndex {
    providers: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ProviderEntry<'a> {
    pub id: &'a str,
    pub display_name: &'a str,
}

impl ProviderIndex {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let providers = ids
            .into_iter()
            .map(|id| {
                let id = id.into().to_lowercase();
                let display_name = display_name(&id);
                (id, display_name)
            })
            .collect();

        Self { providers }
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }

    pub fn display_name(&self, provider: &str) -> Option<&str> {
        self.providers.get(provider).map(String::as_str)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn entries(&self) -> Vec<ProviderEntry<'_>> {
        self.providers
            .iter()
            .map(|(id, display_name)| ProviderEntry { id, display_name })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

fn display_name(id: &str) -> String {
    match id {
        "github" => "Github".to_string(),
        "google" => "Google".to_string(),
        "twitter" => "Twitter".to_string(),
        "apple" => "Apple".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}
