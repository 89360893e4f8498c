/// Twitter (X) OAuth 2.0 Provider Implementation
///
/// Twitter requires PKCE on every authorization request and authenticates
/// confidential clients with HTTP Basic at the token endpoint.
use super::{
    CallbackContext, OAuth2Provider, OAuth2ProviderConfig, OAuth2TokenResponse, OAuth2UserInfo,
    RawTokenResponse, read_json,
};
use crate::auth::error::AuthError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const TWITTER_AUTH_URL: &str = "https://twitter.com/i/oauth2/authorize";
const TWITTER_TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
const TWITTER_USER_URL: &str = "https://api.twitter.com/2/users/me";
const USER_FIELDS: &str = "description,location,profile_image_url";
const DEFAULT_SCOPES: &[&str] = &["users.read", "tweet.read", "offline.access"];

#[derive(Debug, Serialize)]
struct TwitterTokenRequest<'a> {
    code: &'a str,
    grant_type: &'a str,
    client_id: &'a str,
    redirect_uri: &'a str,
    code_verifier: &'a str,
}

#[derive(Debug, Deserialize)]
struct TwitterUserEnvelope {
    data: TwitterUser,
}

#[derive(Debug, Deserialize)]
struct TwitterUser {
    id: String,
    name: Option<String>,
    username: String,
    description: Option<String>,
    location: Option<String>,
    profile_image_url: Option<String>,
}

pub struct TwitterProvider {
    config: OAuth2ProviderConfig,
    http_client: reqwest::Client,
}

impl TwitterProvider {
    pub fn new(config: OAuth2ProviderConfig) -> Result<Self, AuthError> {
        let http_client = config.http_client()?;
        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl OAuth2Provider for TwitterProvider {
    fn name(&self) -> &str {
        "twitter"
    }

    fn uses_pkce(&self) -> bool {
        true
    }

    fn authorization_url(
        &self,
        state: &str,
        _nonce: &str,
        pkce_challenge: Option<&str>,
    ) -> Result<String, AuthError> {
        let challenge = pkce_challenge.ok_or_else(|| {
            AuthError::ConfigError("twitter authorization requires a PKCE challenge".to_string())
        })?;

        let auth_url = self.config.auth_url.as_deref().unwrap_or(TWITTER_AUTH_URL);
        let mut url = url::Url::parse(auth_url)
            .map_err(|e| AuthError::ConfigError(format!("Invalid auth URL: {}", e)))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("redirect_uri", &self.config.redirect_uri);
            query.append_pair("scope", &self.config.scopes_or(DEFAULT_SCOPES).join(" "));
            query.append_pair("state", state);
            query.append_pair("code_challenge", challenge);
            query.append_pair("code_challenge_method", "S256");

            for (key, value) in &self.config.extra_params {
                query.append_pair(key, value);
            }
        }

        Ok(url.to_string())
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<OAuth2TokenResponse, AuthError> {
        let code_verifier = pkce_verifier
            .ok_or_else(|| AuthError::invalid_response(self.name(), "PKCE verifier missing"))?;
        let token_url = self.config.token_url.as_deref().unwrap_or(TWITTER_TOKEN_URL);

        let request = TwitterTokenRequest {
            code,
            grant_type: "authorization_code",
            client_id: &self.config.client_id,
            redirect_uri: &self.config.redirect_uri,
            code_verifier,
        };

        let response = self
            .http_client
            .post(token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&request)
            .send()
            .await
            .map_err(|e| AuthError::http(self.name(), e))?;

        let raw: RawTokenResponse = read_json(self.name(), "token request", response).await?;
        raw.into_tokens(self.name())
    }

    async fn fetch_user(
        &self,
        tokens: &OAuth2TokenResponse,
        _callback: &CallbackContext,
    ) -> Result<OAuth2UserInfo, AuthError> {
        let user_url = self.config.userinfo_url.as_deref().unwrap_or(TWITTER_USER_URL);

        let response = self
            .http_client
            .get(user_url)
            .query(&[("user.fields", USER_FIELDS)])
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|e| AuthError::http(self.name(), e))?;

        let envelope: TwitterUserEnvelope = read_json(self.name(), "user request", response).await?;
        let user = envelope.data;

        Ok(OAuth2UserInfo {
            user_id: user.id,
            name: user.name,
            first_name: None,
            last_name: None,
            email: None,
            nickname: Some(user.username),
            description: user.description,
            location: user.location,
            avatar_url: user.profile_image_url,
        })
    }
}
