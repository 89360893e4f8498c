mod common;

use common::{
    APPLE_USER_ID, GOOD_CODE, MockProvider, TestServer, apple_test_config, client, location,
    query_param, session_cookie,
};
use reqwest::StatusCode;
use reqwest::header::{COOKIE, SET_COOKIE};
use serde_json::Value;

const FIRST_LOGIN_USER: &str = r#"{"name":{"firstName":"Grace","lastName":"Hopper"}}"#;

/// Starts an Apple login; returns the session cookie, the state and the nonce
async fn begin_apple(server: &TestServer, mock: &MockProvider) -> (String, String, String) {
    let response = client().get(server.url("/auth/apple")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let raw_cookie = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
    assert!(raw_cookie.contains("SameSite=None"));
    assert!(raw_cookie.contains("Secure"));

    let redirect = location(&response);
    assert!(redirect.starts_with(&format!("{}/apple/auth/authorize", mock.base_url())));
    assert_eq!(
        query_param(&redirect, "response_mode").as_deref(),
        Some("form_post")
    );

    (
        session_cookie(&response).expect("session cookie"),
        query_param(&redirect, "state").expect("state"),
        query_param(&redirect, "nonce").expect("nonce"),
    )
}

#[tokio::test]
async fn test_apple_form_post_callback() {
    let mock = MockProvider::start().await.unwrap();
    let server = TestServer::start(apple_test_config(&mock)).await.unwrap();

    let (cookie, state, nonce) = begin_apple(&server, &mock).await;
    mock.issue_apple_nonce(&nonce);

    let response = client()
        .post(server.url("/auth/apple/callback"))
        .header(COOKIE, &cookie)
        .form(&[
            ("code", GOOD_CODE),
            ("state", state.as_str()),
            ("user", FIRST_LOGIN_USER),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response).expect("authenticated cookie");
    let body = response.text().await.unwrap();
    assert!(body.contains(&format!("<p>UserID: {}</p>", APPLE_USER_ID)));
    assert!(body.contains("Grace Hopper"));
    assert!(body.contains("<p>Email: relay@privaterelay.appleid.com</p>"));
    assert_eq!(mock.token_requests(), 1);

    // Identity was cached, the next visit does not go back to Apple
    let response = client()
        .get(server.url("/auth/apple"))
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(mock.token_requests(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_apple_id_token_for_another_login_is_rejected() {
    let mock = MockProvider::start().await.unwrap();
    let server = TestServer::start(apple_test_config(&mock)).await.unwrap();

    let (cookie, state, _) = begin_apple(&server, &mock).await;
    mock.issue_apple_nonce("nonce-of-a-different-login");

    let response = client()
        .post(server.url("/auth/apple/callback"))
        .header(COOKIE, &cookie)
        .form(&[("code", GOOD_CODE), ("state", state.as_str())])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "auth_exchange_failed");
    assert!(body["message"].as_str().unwrap().contains("nonce mismatch"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_apple_callback_without_session_cookie() {
    let mock = MockProvider::start().await.unwrap();
    let server = TestServer::start(apple_test_config(&mock)).await.unwrap();

    let (_, state, nonce) = begin_apple(&server, &mock).await;
    mock.issue_apple_nonce(&nonce);

    let response = client()
        .post(server.url("/auth/apple/callback"))
        .form(&[("code", GOOD_CODE), ("state", state.as_str())])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(mock.token_requests(), 0);

    server.shutdown().await;
}
