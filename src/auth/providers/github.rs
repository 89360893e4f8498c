/// GitHub OAuth2 Provider Implementation
///
/// GitHub is plain OAuth2 (no OIDC). The profile comes from the REST API and
/// the email falls back to `/user/emails` when the user keeps it private.
use super::{
    CallbackContext, OAuth2Provider, OAuth2ProviderConfig, OAuth2TokenResponse, OAuth2UserInfo,
    RawTokenResponse, read_json,
};
use crate::auth::error::AuthError;
use async_trait::async_trait;
use reqwest::header;
use serde::{Deserialize, Serialize};

const GITHUB_AUTH_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const DEFAULT_SCOPES: &[&str] = &["user:email"];

#[derive(Debug, Serialize)]
struct GitHubTokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_verifier: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: u64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    bio: Option<String>,
    location: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

pub struct GitHubProvider {
    config: OAuth2ProviderConfig,
    http_client: reqwest::Client,
}

impl GitHubProvider {
    pub fn new(config: OAuth2ProviderConfig) -> Result<Self, AuthError> {
        let http_client = config.http_client()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn user_url(&self) -> &str {
        self.config.userinfo_url.as_deref().unwrap_or(GITHUB_USER_URL)
    }

    async fn primary_email(&self, access_token: &str) -> Result<Option<String>, AuthError> {
        let url = format!("{}/emails", self.user_url().trim_end_matches('/'));
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| AuthError::http(self.name(), e))?;

        let emails: Vec<GitHubEmail> = read_json(self.name(), "email request", response).await?;

        Ok(emails
            .into_iter()
            .find(|e| e.primary && e.verified)
            .map(|e| e.email))
    }
}

#[async_trait]
impl OAuth2Provider for GitHubProvider {
    fn name(&self) -> &str {
        "github"
    }

    fn authorization_url(
        &self,
        state: &str,
        _nonce: &str,
        pkce_challenge: Option<&str>,
    ) -> Result<String, AuthError> {
        let auth_url = self.config.auth_url.as_deref().unwrap_or(GITHUB_AUTH_URL);

        let mut url = url::Url::parse(auth_url)
            .map_err(|e| AuthError::ConfigError(format!("Invalid auth URL: {}", e)))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("redirect_uri", &self.config.redirect_uri);
            query.append_pair("scope", &self.config.scopes_or(DEFAULT_SCOPES).join(" "));
            query.append_pair("state", state);

            if let Some(challenge) = pkce_challenge {
                query.append_pair("code_challenge", challenge);
                query.append_pair("code_challenge_method", "S256");
            }

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
        let token_url = self.config.token_url.as_deref().unwrap_or(GITHUB_TOKEN_URL);

        let request = GitHubTokenRequest {
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
            code,
            redirect_uri: &self.config.redirect_uri,
            code_verifier: pkce_verifier,
        };

        let response = self
            .http_client
            .post(token_url)
            .header(header::ACCEPT, "application/json")
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
        let response = self
            .http_client
            .get(self.user_url())
            .bearer_auth(&tokens.access_token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| AuthError::http(self.name(), e))?;

        let user: GitHubUser = read_json(self.name(), "user request", response).await?;

        let email = match user.email {
            Some(email) if !email.is_empty() => Some(email),
            _ => self.primary_email(&tokens.access_token).await?,
        };

        Ok(OAuth2UserInfo {
            user_id: user.id.to_string(),
            name: user.name,
            first_name: None,
            last_name: None,
            email,
            nickname: Some(user.login),
            description: user.bio,
            location: user.location,
            avatar_url: user.avatar_url,
        })
    }
}
