/// Authentication Routes
///
/// HTTP handlers for the provider index, login initiation, provider
/// callback and logout.
use axum::{
    Form, Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{
    AuthError, AuthFlowController, BeginOutcome, CallbackParams, ProviderIndex, SessionStore,
};
use crate::views::Views;

/// Shared, read-only state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<AuthFlowController>,
    pub index: Arc<ProviderIndex>,
    pub sessions: Arc<SessionStore>,
    pub views: Arc<Views>,
}

impl AppState {
    pub fn new(controller: AuthFlowController, sessions: SessionStore, views: Views) -> Self {
        let index = controller.index();
        Self {
            controller: Arc::new(controller),
            index,
            sessions: Arc::new(sessions),
            views: Arc::new(views),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub git_sha: Option<&'static str>,
    pub providers: Vec<String>,
}

fn with_cookie(response: impl IntoResponse, cookie: HeaderValue) -> Response {
    let mut response = response.into_response();
    response.headers_mut().append(header::SET_COOKIE, cookie);
    response
}

/// Index page - lists the configured providers
async fn index_page(State(state): State<AppState>) -> Result<Html<String>, AuthError> {
    state.views.render_index(&state.index).map(Html)
}

/// Show the profile of a live session or redirect to the provider
async fn begin_auth(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    let mut session = state.sessions.load(&headers);

    let response = match state.controller.begin_or_resume(&provider, &mut session)? {
        BeginOutcome::Redirect(url) => Redirect::temporary(&url).into_response(),
        BeginOutcome::Resumed(identity) => {
            Html(state.views.render_profile(&identity)?).into_response()
        }
    };

    let cookie = state.sessions.cookie_header(&mut session)?;
    Ok(with_cookie(response, cookie))
}

async fn complete_auth(
    state: AppState,
    provider: String,
    params: CallbackParams,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    let mut session = state.sessions.load(&headers);

    let result = state
        .controller
        .complete_callback(&provider, &params, &mut session)
        .await;

    // Written on failure too, so the consumed login does not linger
    let cookie = state.sessions.cookie_header(&mut session)?;

    let response = match result {
        Ok(identity) => Html(state.views.render_profile(&identity)?).into_response(),
        Err(e) => e.into_response(),
    };

    Ok(with_cookie(response, cookie))
}

/// Provider callback delivered as a query string
async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    complete_auth(state, provider, params, headers).await
}

/// Provider callback delivered as a form post (Apple's `form_post` mode)
async fn oauth_callback_form(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Form(params): Form<CallbackParams>,
) -> Result<Response, AuthError> {
    complete_auth(state, provider, params, headers).await
}

/// Logout handler - destroys the session and returns to the index
async fn logout(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut session = state.sessions.load(&headers);
    state.controller.logout(&provider, &mut session);

    with_cookie(Redirect::temporary("/"), state.sessions.clear_cookie())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        git_sha: option_env!("VERGEN_GIT_SHA"),
        providers: state.index.ids().map(str::to_string).collect(),
    })
}

/// Create the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/auth/{provider}", get(begin_auth))
        .route(
            "/auth/{provider}/callback",
            get(oauth_callback).post(oauth_callback_form),
        )
        .route("/logout/{provider}", get(logout))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
