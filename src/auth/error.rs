// Authentication Error Types
// Error taxonomy for the login flow, provider exchanges and session cookies

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Why a provider handshake could not be completed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeFailure {
    #[error("provider returned error '{error}': {description}")]
    ProviderDenied { error: String, description: String },

    #[error("no login in progress for this session")]
    NoPendingLogin,

    #[error("state parameter missing or does not match")]
    InvalidState,

    #[error("authorization code missing from callback")]
    MissingCode,

    #[error("provider did not answer in time")]
    Timeout,

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("ID token rejected: {0}")]
    IdToken(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Authentication with {provider} failed: {reason}")]
    AuthExchangeFailed {
        provider: String,
        reason: ExchangeFailure,
    },

    #[error("Session could not be written: {0}")]
    SessionWriteFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("Rendering failed: {0}")]
    Render(String),
}

impl AuthError {
    pub fn exchange(provider: impl Into<String>, reason: ExchangeFailure) -> Self {
        AuthError::AuthExchangeFailed {
            provider: provider.into(),
            reason,
        }
    }

    /// Map a transport error from a provider call
    pub fn http(provider: &str, err: reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            ExchangeFailure::Timeout
        } else {
            ExchangeFailure::Http(err.to_string())
        };
        Self::exchange(provider, reason)
    }

    pub fn invalid_response(provider: &str, message: impl Into<String>) -> Self {
        Self::exchange(provider, ExchangeFailure::InvalidResponse(message.into()))
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::UnknownProvider(_) => 404,

            AuthError::AuthExchangeFailed { reason, .. } => match reason {
                ExchangeFailure::ProviderDenied { .. }
                | ExchangeFailure::NoPendingLogin
                | ExchangeFailure::InvalidState
                | ExchangeFailure::MissingCode => 400,
                ExchangeFailure::Timeout => 504,
                _ => 502,
            },

            AuthError::SessionWriteFailed(_)
            | AuthError::ConfigError(_)
            | AuthError::InvalidConfig { .. }
            | AuthError::Render(_) => 500,
        }
    }

    /// Stable machine-readable code used in error bodies
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::UnknownProvider(_) => "unknown_provider",
            AuthError::AuthExchangeFailed { .. } => "auth_exchange_failed",
            AuthError::SessionWriteFailed(_) => "session_write_failed",
            AuthError::ConfigError(_) | AuthError::InvalidConfig { .. } => "configuration_error",
            AuthError::Render(_) => "render_failed",
        }
    }
}

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }

        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(AuthError::UnknownProvider("myspace".into()).status_code(), 404);
        assert_eq!(
            AuthError::exchange("github", ExchangeFailure::InvalidState).status_code(),
            400
        );
        assert_eq!(
            AuthError::exchange("github", ExchangeFailure::Timeout).status_code(),
            504
        );
        assert_eq!(
            AuthError::exchange("google", ExchangeFailure::Http("refused".into())).status_code(),
            502
        );
        assert_eq!(
            AuthError::SessionWriteFailed("too large".into()).status_code(),
            500
        );
    }

    #[test]
    fn test_error_display() {
        let err = AuthError::exchange(
            "github",
            ExchangeFailure::ProviderDenied {
                error: "access_denied".into(),
                description: "The user has denied your application access.".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "Authentication with github failed: provider returned error 'access_denied': \
             The user has denied your application access."
        );

        let err = AuthError::InvalidConfig {
            key: "session.secret".to_string(),
            reason: "too short".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration value for session.secret: too short"
        );
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let response = AuthError::UnknownProvider("myspace".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "unknown_provider");
        assert_eq!(body["message"], "Unknown provider: myspace");
    }
}
