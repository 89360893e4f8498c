#![allow(dead_code)]

use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderMap, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use socialgate::config::{Config, ProviderConfig, SameSitePolicy};
use socialgate::start_server_with_config;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// The only authorization code the mock provider accepts
pub const GOOD_CODE: &str = "abc";
pub const MOCK_ACCESS_TOKEN: &str = "gho_mock_access_token";
pub const APPLE_CLIENT_ID: &str = "com.example.socialgate";
pub const APPLE_USER_ID: &str = "001234.abcd";

const ID_TOKEN_KEY_PEM: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/id_token_rsa.pem"));
const ID_TOKEN_JWKS: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/id_token_jwks.json"));

/// socialgate server on an ephemeral port with shutdown support
pub struct TestServer {
    port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start(mut config: Config) -> anyhow::Result<Self> {
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let port = start_server_with_config(config, shutdown_rx).await?;

        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Default)]
struct MockCounters {
    token_requests: AtomicUsize,
    user_requests: AtomicUsize,
    /// Nonce the next Apple ID token is issued for
    apple_nonce: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenForm {
    code: String,
    client_id: String,
}

/// Identity provider double: GitHub-shaped token, `/user` and `/user/emails`
/// endpoints, plus an Apple token endpoint issuing signed ID tokens and its JWKS
pub struct MockProvider {
    pub port: u16,
    counters: Arc<MockCounters>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockProvider {
    pub async fn start() -> anyhow::Result<Self> {
        let counters = Arc::new(MockCounters::default());

        let app = Router::new()
            .route("/login/oauth/access_token", post(handle_token))
            .route("/user", get(handle_user))
            .route("/user/emails", get(handle_emails))
            .route("/apple/auth/token", post(handle_apple_token))
            .route("/apple/auth/keys", get(handle_apple_keys))
            .with_state(counters.clone());

        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        Ok(Self {
            port,
            counters,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/login/oauth/authorize", self.base_url())
    }

    pub fn token_requests(&self) -> usize {
        self.counters.token_requests.load(Ordering::SeqCst)
    }

    pub fn user_requests(&self) -> usize {
        self.counters.user_requests.load(Ordering::SeqCst)
    }

    /// Nonce the mock puts into the next Apple ID token
    pub fn issue_apple_nonce(&self, nonce: &str) {
        if let Ok(mut slot) = self.counters.apple_nonce.lock() {
            *slot = Some(nonce.to_string());
        }
    }

    /// Provider entry pointing the apple adapter at this mock
    pub fn apple_config(&self) -> ProviderConfig {
        ProviderConfig {
            client_id: APPLE_CLIENT_ID.to_string(),
            client_secret: "pregenerated-client-secret".to_string(),
            auth_url: Some(format!("{}/apple/auth/authorize", self.base_url())),
            token_url: Some(format!("{}/apple/auth/token", self.base_url())),
            jwks_url: Some(format!("{}/apple/auth/keys", self.base_url())),
            ..Default::default()
        }
    }

    /// Provider entry pointing the github adapter at this mock
    pub fn github_config(&self) -> ProviderConfig {
        ProviderConfig {
            client_id: "mock-client-id".to_string(),
            client_secret: "mock-client-secret".to_string(),
            auth_url: Some(self.authorize_url()),
            token_url: Some(format!("{}/login/oauth/access_token", self.base_url())),
            userinfo_url: Some(format!("{}/user", self.base_url())),
            ..Default::default()
        }
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle_token(
    State(counters): State<Arc<MockCounters>>,
    Form(form): Form<TokenForm>,
) -> impl IntoResponse {
    counters.token_requests.fetch_add(1, Ordering::SeqCst);

    // GitHub reports a bad code with a 200 and an error body
    if form.code != GOOD_CODE || form.client_id != "mock-client-id" {
        return Json(json!({
            "error": "bad_verification_code",
            "error_description": "The code passed is incorrect or expired."
        }));
    }

    Json(json!({
        "access_token": MOCK_ACCESS_TOKEN,
        "token_type": "bearer",
        "scope": "user:email"
    }))
}

async fn handle_apple_token(
    State(counters): State<Arc<MockCounters>>,
    Form(form): Form<TokenForm>,
) -> axum::response::Response {
    counters.token_requests.fetch_add(1, Ordering::SeqCst);

    if form.code != GOOD_CODE || form.client_id != APPLE_CLIENT_ID {
        return (
            axum::http::StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant" })),
        )
            .into_response();
    }

    let nonce = counters.apple_nonce.lock().ok().and_then(|n| n.clone());
    let now = chrono::Utc::now().timestamp();
    let claims = json!({
        "iss": "https://appleid.apple.com",
        "aud": APPLE_CLIENT_ID,
        "sub": APPLE_USER_ID,
        "iat": now,
        "exp": now + 600,
        "nonce": nonce,
        "email": "relay@privaterelay.appleid.com",
    });

    let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = Some("test-key-1".to_string());
    let key = jsonwebtoken::EncodingKey::from_rsa_pem(ID_TOKEN_KEY_PEM.as_bytes())
        .expect("fixture key");
    let id_token = jsonwebtoken::encode(&header, &claims, &key).expect("sign id token");

    Json(json!({
        "access_token": "apple-access-token",
        "token_type": "Bearer",
        "expires_in": 3600,
        "id_token": id_token
    }))
    .into_response()
}

async fn handle_apple_keys() -> Json<serde_json::Value> {
    Json(serde_json::from_str(ID_TOKEN_JWKS).expect("fixture jwks"))
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", MOCK_ACCESS_TOKEN))
}

async fn handle_user(
    State(counters): State<Arc<MockCounters>>,
    headers: HeaderMap,
) -> axum::response::Response {
    counters.user_requests.fetch_add(1, Ordering::SeqCst);

    if !authorized(&headers) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Bad credentials" })),
        )
            .into_response();
    }

    Json(json!({
        "id": 583231,
        "login": "octocat",
        "name": "The Octocat",
        "email": null,
        "bio": "There once was...",
        "location": "San Francisco",
        "avatar_url": "https://avatars.githubusercontent.com/u/583231?v=4"
    }))
    .into_response()
}

async fn handle_emails(headers: HeaderMap) -> axum::response::Response {
    if !authorized(&headers) {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }

    Json(json!([
        { "email": "octocat@users.noreply.github.com", "primary": false, "verified": true },
        { "email": "octocat@github.com", "primary": true, "verified": true }
    ]))
    .into_response()
}

/// Server configuration with only the mock github provider enabled
pub fn test_config(mock: &MockProvider) -> Config {
    let mut config = Config::default();
    config.session.secret = "integration-test-secret-0123456789abcdef".to_string();
    config.providers.github = Some(mock.github_config());
    config
}

/// Server configuration with only the mock apple provider enabled.
///
/// Apple posts its callback cross-site, so the cookie must be `SameSite=None`.
pub fn apple_test_config(mock: &MockProvider) -> Config {
    let mut config = Config::default();
    config.session.secret = "integration-test-secret-0123456789abcdef".to_string();
    config.session.same_site = SameSitePolicy::None;
    config.session.secure = true;
    config.providers.apple = Some(mock.apple_config());
    config
}

/// Named query parameter of a provider redirect
pub fn query_param(location: &str, name: &str) -> Option<String> {
    url::Url::parse(location)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// HTTP client that surfaces redirects instead of following them
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client")
}

/// `name=value` part of the session cookie set on a response
pub fn session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("_socialgate_session="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// `state` query parameter of a provider redirect
pub fn state_param(location: &str) -> String {
    url::Url::parse(location)
        .expect("redirect url")
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("state parameter")
}
