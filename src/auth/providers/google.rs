/// Google OAuth2/OIDC Provider Implementation
///
/// Implements OAuth2 authentication with Google using OpenID Connect.
/// The profile is read from the userinfo endpoint with the access token.
use super::{
    CallbackContext, OAuth2Provider, OAuth2ProviderConfig, OAuth2TokenResponse, OAuth2UserInfo,
    RawTokenResponse, read_json,
};
use crate::auth::error::AuthError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const DEFAULT_SCOPES: &[&str] = &["openid", "email", "profile"];

/// Google userinfo response
#[derive(Debug, Deserialize)]
struct GoogleUserInfoResponse {
    sub: String,
    email: Option<String>,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
    locale: Option<String>,
}

/// Google OAuth2 token request
#[derive(Debug, Serialize)]
struct GoogleTokenRequest<'a> {
    code: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    redirect_uri: &'a str,
    grant_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_verifier: Option<&'a str>,
}

/// Google OAuth2/OIDC Provider
pub struct GoogleProvider {
    config: OAuth2ProviderConfig,
    http_client: reqwest::Client,
}

impl GoogleProvider {
    /// Create a new Google OAuth2 provider
    pub fn new(config: OAuth2ProviderConfig) -> Result<Self, AuthError> {
        let mut config = config;
        config.scopes = config.scopes_or(DEFAULT_SCOPES);

        // Ensure openid scope is included for OIDC
        if !config.scopes.iter().any(|s| s == "openid") {
            config.scopes.push("openid".to_string());
        }

        let http_client = config.http_client()?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn convert_userinfo(&self, info: GoogleUserInfoResponse) -> OAuth2UserInfo {
        OAuth2UserInfo {
            user_id: info.sub,
            name: info.name,
            first_name: info.given_name,
            last_name: info.family_name,
            email: info.email,
            nickname: None,
            description: None,
            location: info.locale,
            avatar_url: info.picture,
        }
    }
}

#[async_trait]
impl OAuth2Provider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn authorization_url(
        &self,
        state: &str,
        nonce: &str,
        pkce_challenge: Option<&str>,
    ) -> Result<String, AuthError> {
        let auth_url = self.config.auth_url.as_deref().unwrap_or(GOOGLE_AUTH_URL);

        let mut url = url::Url::parse(auth_url)
            .map_err(|e| AuthError::ConfigError(format!("Invalid auth URL: {}", e)))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("redirect_uri", &self.config.redirect_uri);
            query.append_pair("response_type", "code");
            query.append_pair("scope", &self.config.scopes.join(" "));
            query.append_pair("state", state);
            query.append_pair("nonce", nonce);
            query.append_pair("access_type", "offline"); // Request refresh token

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
        let token_url = self.config.token_url.as_deref().unwrap_or(GOOGLE_TOKEN_URL);

        let token_request = GoogleTokenRequest {
            code,
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
            redirect_uri: &self.config.redirect_uri,
            grant_type: "authorization_code",
            code_verifier: pkce_verifier,
        };

        let response = self
            .http_client
            .post(token_url)
            .form(&token_request)
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
        let userinfo_url = self
            .config
            .userinfo_url
            .as_deref()
            .unwrap_or(GOOGLE_USERINFO_URL);

        let response = self
            .http_client
            .get(userinfo_url)
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|e| AuthError::http(self.name(), e))?;

        let userinfo: GoogleUserInfoResponse =
            read_json(self.name(), "userinfo request", response).await?;

        Ok(self.convert_userinfo(userinfo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> OAuth2ProviderConfig {
        OAuth2ProviderConfig::new(
            "test-client-id",
            "test-client-secret",
            "http://localhost:3000/auth/google/callback",
        )
    }

    #[test]
    fn test_google_provider_creation() {
        let provider = GoogleProvider::new(create_test_config()).unwrap();
        assert_eq!(provider.config.scopes, vec!["openid", "email", "profile"]);
    }

    #[test]
    fn test_openid_scope_always_requested() {
        let config = OAuth2ProviderConfig {
            scopes: vec!["email".to_string()],
            ..create_test_config()
        };
        let provider = GoogleProvider::new(config).unwrap();
        assert_eq!(provider.config.scopes, vec!["email", "openid"]);
    }

    #[test]
    fn test_authorization_url_generation() {
        let provider = GoogleProvider::new(create_test_config()).unwrap();

        let auth_url = provider
            .authorization_url("test-state", "test-nonce", None)
            .unwrap();

        assert!(auth_url.contains("client_id=test-client-id"));
        assert!(auth_url.contains("state=test-state"));
        assert!(auth_url.contains("nonce=test-nonce"));
        assert!(auth_url.contains("scope=openid+email+profile"));
        assert!(auth_url.contains("response_type=code"));
        assert!(auth_url.contains("access_type=offline"));
    }

    #[test]
    fn test_userinfo_conversion() {
        let provider = GoogleProvider::new(create_test_config()).unwrap();
        let info: GoogleUserInfoResponse = serde_json::from_str(
            r#"{"sub":"1087","email":"ada@example.com","name":"Ada Lovelace",
                "given_name":"Ada","family_name":"Lovelace",
                "picture":"https://lh3.example/a.png"}"#,
        )
        .unwrap();

        let user = provider.convert_userinfo(info);
        assert_eq!(user.user_id, "1087");
        assert_eq!(user.first_name.as_deref(), Some("Ada"));
        assert_eq!(user.last_name.as_deref(), Some("Lovelace"));
        assert_eq!(user.avatar_url.as_deref(), Some("https://lh3.example/a.png"));
    }
}
