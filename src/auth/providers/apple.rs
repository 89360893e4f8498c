/// Sign in with Apple Provider Implementation
///
/// Apple answers the authorization request with a `form_post` callback, only
/// reports the user's name on the very first login, and expects the client
/// secret to be an ES256-signed JWT. The identity comes from the ID token,
/// which is verified against Apple's published keys.
use super::{
    CallbackContext, OAuth2Provider, OAuth2ProviderConfig, OAuth2TokenResponse, OAuth2UserInfo,
    RawTokenResponse, read_json,
};
use crate::auth::error::{AuthError, ExchangeFailure};
use async_trait::async_trait;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use serde::{Deserialize, Serialize};

const APPLE_AUTH_URL: &str = "https://appleid.apple.com/auth/authorize";
const APPLE_TOKEN_URL: &str = "https://appleid.apple.com/auth/token";
const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";
const APPLE_ISSUER: &str = "https://appleid.apple.com";
const DEFAULT_SCOPES: &[&str] = &["name", "email"];

/// Apple allows client secrets to live at most six months
const CLIENT_SECRET_LIFETIME_SECS: i64 = 15_777_000;

/// Apple ID token claims
#[derive(Debug, Deserialize)]
struct AppleIdTokenClaims {
    /// Subject (user ID)
    sub: String,

    nonce: Option<String>,

    email: Option<String>,
}

/// Apple client secret JWT claims
#[derive(Debug, Serialize)]
struct AppleClientSecretClaims<'a> {
    iss: &'a str, // Team ID
    iat: i64,
    exp: i64,
    aud: &'a str,
    sub: &'a str, // Client ID (Service ID)
}

#[derive(Debug, Serialize)]
struct AppleTokenRequest<'a> {
    code: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    redirect_uri: &'a str,
    grant_type: &'a str,
}

/// Posted as the `user` form field on the first login only
#[derive(Debug, Deserialize)]
struct AppleUserHint {
    name: Option<AppleUserName>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AppleUserName {
    #[serde(rename = "firstName")]
    first_name: Option<String>,
    #[serde(rename = "lastName")]
    last_name: Option<String>,
}

/// Key material for signing the client secret ourselves
struct SigningKey {
    team_id: String,
    key_id: String,
    encoding_key: EncodingKey,
}

pub struct AppleProvider {
    config: OAuth2ProviderConfig,
    http_client: reqwest::Client,
    signing: Option<SigningKey>,
}

impl AppleProvider {
    /// Create a new Apple provider.
    ///
    /// When `team_id`, `key_id` and `private_key` are all configured the
    /// client secret is generated per token request; otherwise the configured
    /// `client_secret` is sent as-is (a pre-generated JWT). The private key is
    /// parsed here so a bad key fails at startup.
    pub fn new(config: OAuth2ProviderConfig) -> Result<Self, AuthError> {
        let mut config = config;
        config.scopes = config.scopes_or(DEFAULT_SCOPES);

        let signing = match (&config.team_id, &config.key_id, &config.private_key) {
            (Some(team_id), Some(key_id), Some(private_key)) => {
                let encoding_key =
                    EncodingKey::from_ec_pem(private_key.as_bytes()).map_err(|e| {
                        AuthError::ConfigError(format!("Failed to parse Apple private key: {}", e))
                    })?;

                Some(SigningKey {
                    team_id: team_id.clone(),
                    key_id: key_id.clone(),
                    encoding_key,
                })
            }
            (None, None, None) => None,
            _ => {
                return Err(AuthError::ConfigError(
                    "Apple provider needs team_id, key_id and private_key together".to_string(),
                ));
            }
        };

        let http_client = config.http_client()?;

        Ok(Self {
            config,
            http_client,
            signing,
        })
    }

    fn client_secret(&self) -> Result<String, AuthError> {
        let Some(signing) = &self.signing else {
            return Ok(self.config.client_secret.clone());
        };

        let now = chrono::Utc::now().timestamp();
        let claims = AppleClientSecretClaims {
            iss: &signing.team_id,
            iat: now,
            exp: now + CLIENT_SECRET_LIFETIME_SECS,
            aud: APPLE_ISSUER,
            sub: &self.config.client_id,
        };

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(signing.key_id.clone());

        encode(&header, &claims, &signing.encoding_key)
            .map_err(|e| AuthError::ConfigError(format!("Failed to sign client secret: {}", e)))
    }

    fn id_token_error(&self, message: impl Into<String>) -> AuthError {
        AuthError::exchange(self.name(), ExchangeFailure::IdToken(message.into()))
    }

    async fn verify_id_token(
        &self,
        id_token: &str,
        expected_nonce: &str,
    ) -> Result<AppleIdTokenClaims, AuthError> {
        let jwks_url = self.config.jwks_url.as_deref().unwrap_or(APPLE_JWKS_URL);
        let response = self
            .http_client
            .get(jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::http(self.name(), e))?;
        let jwks: serde_json::Value = read_json(self.name(), "JWKS request", response).await?;

        self.validate_id_token(id_token, &jwks, expected_nonce)
    }

    /// Check signature, audience, issuer, expiry and nonce against a key set
    fn validate_id_token(
        &self,
        id_token: &str,
        jwks: &serde_json::Value,
        expected_nonce: &str,
    ) -> Result<AppleIdTokenClaims, AuthError> {
        let header = decode_header(id_token)
            .map_err(|e| self.id_token_error(format!("bad header: {}", e)))?;

        let kid = header
            .kid
            .ok_or_else(|| self.id_token_error("missing key ID (kid)"))?;

        let matching_key = jwks["keys"]
            .as_array()
            .and_then(|keys| keys.iter().find(|k| k["kid"].as_str() == Some(kid.as_str())))
            .ok_or_else(|| self.id_token_error(format!("key {} not found in JWKS", kid)))?;

        // Apple signs with RS256
        let (Some(n), Some(e)) = (matching_key["n"].as_str(), matching_key["e"].as_str()) else {
            return Err(self.id_token_error("JWK without RSA components"));
        };
        let decoding_key = DecodingKey::from_rsa_components(n, e)
            .map_err(|e| self.id_token_error(format!("unusable JWK: {}", e)))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.config.client_id]);
        validation.set_issuer(&[APPLE_ISSUER]);

        let claims = decode::<AppleIdTokenClaims>(id_token, &decoding_key, &validation)
            .map_err(|e| self.id_token_error(e.to_string()))?
            .claims;

        if claims.nonce.as_deref() != Some(expected_nonce) {
            return Err(self.id_token_error("nonce mismatch"));
        }

        Ok(claims)
    }
}

/// Merge the verified ID token with the optional first-login user hint
fn build_user(claims: AppleIdTokenClaims, hint: Option<&str>) -> OAuth2UserInfo {
    let hint = hint.and_then(|raw| match serde_json::from_str::<AppleUserHint>(raw) {
        Ok(hint) => Some(hint),
        Err(e) => {
            tracing::debug!("Ignoring malformed Apple user payload: {}", e);
            None
        }
    });

    let (first_name, last_name, hinted_email) = match hint {
        Some(AppleUserHint { name, email }) => {
            let (first, last) = name
                .map(|n| (n.first_name, n.last_name))
                .unwrap_or((None, None));
            (first, last, email)
        }
        None => (None, None, None),
    };

    let name = match (&first_name, &last_name) {
        (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
        (Some(only), None) | (None, Some(only)) => Some(only.clone()),
        (None, None) => None,
    };

    OAuth2UserInfo {
        user_id: claims.sub,
        name,
        first_name,
        last_name,
        email: claims.email.or(hinted_email),
        nickname: None,
        description: None,
        location: None,
        avatar_url: None,
    }
}

#[async_trait]
impl OAuth2Provider for AppleProvider {
    fn name(&self) -> &str {
        "apple"
    }

    fn authorization_url(
        &self,
        state: &str,
        nonce: &str,
        _pkce_challenge: Option<&str>,
    ) -> Result<String, AuthError> {
        let auth_url = self.config.auth_url.as_deref().unwrap_or(APPLE_AUTH_URL);

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
            // Apple requires form_post whenever name or email is requested
            query.append_pair("response_mode", "form_post");

            for (key, value) in &self.config.extra_params {
                query.append_pair(key, value);
            }
        }

        Ok(url.to_string())
    }

    async fn exchange_code(
        &self,
        code: &str,
        _pkce_verifier: Option<&str>,
    ) -> Result<OAuth2TokenResponse, AuthError> {
        let token_url = self.config.token_url.as_deref().unwrap_or(APPLE_TOKEN_URL);
        let client_secret = self.client_secret()?;

        let request = AppleTokenRequest {
            code,
            client_id: &self.config.client_id,
            client_secret: &client_secret,
            redirect_uri: &self.config.redirect_uri,
            grant_type: "authorization_code",
        };

        let response = self
            .http_client
            .post(token_url)
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
        callback: &CallbackContext,
    ) -> Result<OAuth2UserInfo, AuthError> {
        let id_token = tokens
            .id_token
            .as_deref()
            .ok_or_else(|| self.id_token_error("token response without id_token"))?;

        let claims = self.verify_id_token(id_token, &callback.nonce).await?;
        Ok(build_user(claims, callback.user.as_deref()))
    }
}
