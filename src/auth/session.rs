// Cookie-backed Session Store
// The whole session record travels in one AES-256-GCM encrypted cookie

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use axum::http::{HeaderMap, HeaderValue, header};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use super::error::AuthError;
use super::identity::AuthenticatedIdentity;
use crate::config::{SameSitePolicy, SessionConfig};

/// Browsers drop cookies above this size
const MAX_COOKIE_BYTES: usize = 4096;
const NONCE_LEN: usize = 12;

/// A login that was started and is waiting for the provider callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingLogin {
    pub state: String,
    pub nonce: String,
    pub pkce_verifier: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderSession {
    Pending(PendingLogin),
    Authenticated {
        identity: AuthenticatedIdentity,
        authenticated_at: DateTime<Utc>,
    },
}

/// Per-browser session state, keyed by provider id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    id: Uuid,
    providers: BTreeMap<String, ProviderSession>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn anonymous(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            providers: BTreeMap::new(),
            issued_at: now,
            expires_at: now + ttl,
        }
    }

    /// Stable for the lifetime of the cookie; only used to correlate log lines
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Cached identity for `provider`, if the session and its token are still valid
    pub fn identity(&self, provider: &str, now: DateTime<Utc>) -> Option<&AuthenticatedIdentity> {
        if self.is_expired(now) {
            return None;
        }

        match self.providers.get(provider) {
            Some(ProviderSession::Authenticated { identity, .. }) if !identity.is_expired(now) => {
                Some(identity)
            }
            _ => None,
        }
    }

    pub fn is_authenticated(&self, provider: &str, now: DateTime<Utc>) -> bool {
        self.identity(provider, now).is_some()
    }

    pub fn pending(&self, provider: &str) -> Option<&PendingLogin> {
        match self.providers.get(provider) {
            Some(ProviderSession::Pending(pending)) => Some(pending),
            _ => None,
        }
    }

    pub fn set_pending(&mut self, provider: &str, pending: PendingLogin) {
        self.providers
            .insert(provider.to_string(), ProviderSession::Pending(pending));
    }

    /// Remove and return the pending login; an authenticated entry is left alone
    pub fn take_pending(&mut self, provider: &str) -> Option<PendingLogin> {
        match self.providers.remove(provider) {
            Some(ProviderSession::Pending(pending)) => Some(pending),
            Some(other) => {
                self.providers.insert(provider.to_string(), other);
                None
            }
            None => None,
        }
    }

    pub fn set_authenticated(
        &mut self,
        provider: &str,
        identity: AuthenticatedIdentity,
        now: DateTime<Utc>,
    ) {
        self.providers.insert(
            provider.to_string(),
            ProviderSession::Authenticated {
                identity,
                authenticated_at: now,
            },
        );
    }

    pub fn clear(&mut self) {
        self.providers.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.expires_at = now + ttl;
    }
}

/// Encrypts session records into cookies and back
pub struct SessionStore {
    cipher: Aes256Gcm,
    cookie_name: String,
    ttl: Duration,
    secure: bool,
    same_site: SameSitePolicy,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Result<Self, AuthError> {
        config.validate()?;

        // AES-256 key derived from the configured secret
        let key = Sha256::digest(config.secret.as_bytes());
        let cipher = Aes256Gcm::new(&key);

        let ttl = i64::try_from(config.ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| AuthError::InvalidConfig {
                key: "session.ttl_seconds".to_string(),
                reason: "out of range".to_string(),
            })?;

        Ok(Self {
            cipher,
            cookie_name: config.cookie_name.clone(),
            ttl,
            secure: config.secure,
            same_site: config.same_site.clone(),
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Session of the requesting browser; anything unreadable counts as anonymous
    pub fn load(&self, headers: &HeaderMap) -> SessionRecord {
        let now = Utc::now();

        let record = cookie_value(headers, &self.cookie_name).and_then(|value| {
            let record = self.decode(value);
            if record.is_none() {
                debug!("Discarding unreadable session cookie");
            }
            record
        });

        match record {
            Some(record) if !record.is_expired(now) => record,
            Some(_) => {
                debug!("Session cookie expired, starting anonymous session");
                SessionRecord::anonymous(now, self.ttl)
            }
            None => SessionRecord::anonymous(now, self.ttl),
        }
    }

    pub fn encode(&self, record: &SessionRecord) -> Result<String, AuthError> {
        let plaintext = serde_json::to_vec(record)
            .map_err(|e| AuthError::SessionWriteFailed(format!("serialization failed: {}", e)))?;

        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(&Nonce::from(nonce_bytes), plaintext.as_slice())
            .map_err(|e| AuthError::SessionWriteFailed(format!("encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    pub fn decode(&self, value: &str) -> Option<SessionRecord> {
        let sealed = URL_SAFE_NO_PAD.decode(value).ok()?;
        if sealed.len() <= NONCE_LEN {
            return None;
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .ok()?;

        serde_json::from_slice(&plaintext).ok()
    }

    /// `Set-Cookie` value persisting `record`, or expiring the cookie once
    /// nothing is left in it. Writing slides the expiry forward.
    pub fn cookie_header(&self, record: &mut SessionRecord) -> Result<HeaderValue, AuthError> {
        if record.is_empty() {
            return Ok(self.clear_cookie());
        }

        record.touch(Utc::now(), self.ttl);
        let value = self.encode(record)?;
        let cookie = format!(
            "{}={}; {}",
            self.cookie_name,
            value,
            self.attributes(self.ttl.num_seconds())
        );

        if cookie.len() > MAX_COOKIE_BYTES {
            return Err(AuthError::SessionWriteFailed(format!(
                "session cookie is {} bytes, limit is {}",
                cookie.len(),
                MAX_COOKIE_BYTES
            )));
        }

        HeaderValue::from_str(&cookie)
            .map_err(|e| AuthError::SessionWriteFailed(format!("invalid cookie header: {}", e)))
    }

    /// `Set-Cookie` value telling the browser to drop the session
    pub fn clear_cookie(&self) -> HeaderValue {
        let cookie = format!("{}=; {}", self.cookie_name, self.attributes(0));
        HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static("Max-Age=0"))
    }

    fn attributes(&self, max_age: i64) -> String {
        let same_site = match self.same_site {
            SameSitePolicy::Strict => "Strict",
            SameSitePolicy::Lax => "Lax",
            SameSitePolicy::None => "None",
        };

        format!(
            "Path=/; Max-Age={}; HttpOnly; SameSite={}{}",
            max_age,
            same_site,
            if self.secure { "; Secure" } else { "" }
        )
    }
}

/// Find a cookie by name in the request's `Cookie` headers
fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .find_map(|cookie| {
            let (cookie_name, value) = cookie.trim().split_once('=')?;
            (cookie_name == name).then_some(value)
        })
}
