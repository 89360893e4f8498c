/// Auth Flow Controller
///
/// Decides per request which transition of the login state machine applies
/// for a (browser, provider) pair:
///
/// * `Anonymous --begin--> PendingRedirect` (redirect to the provider)
/// * `PendingRedirect --callback ok--> Authenticated`
/// * `PendingRedirect --callback failed--> Anonymous`
/// * `Authenticated --begin--> Authenticated` (resume, no provider call)
/// * `Authenticated --logout--> Anonymous`
///
/// The controller holds no per-request state; everything it learns is
/// written into the caller's [`SessionRecord`].
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use super::error::{AuthError, ExchangeFailure};
use super::identity::{AuthenticatedIdentity, ProviderIndex};
use super::pkce::PkcePair;
use super::providers::{CallbackContext, OAuth2Provider, ProviderFactory};
use super::session::{PendingLogin, SessionRecord};
use crate::config::Config;

/// Parameters the provider sends back to the callback URL
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    /// Apple only: JSON with the user's name, sent on first login
    pub user: Option<String>,
}

/// What `begin_or_resume` decided
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// Send the browser to this provider URL
    Redirect(String),
    /// The session already holds a valid identity
    Resumed(AuthenticatedIdentity),
}

#[derive(Debug, Clone)]
pub struct FlowOptions {
    /// Cache the identity in the session after a successful callback
    pub persist_identity: bool,
    /// Bound for token exchange plus profile fetch
    pub exchange_timeout: Duration,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            persist_identity: true,
            exchange_timeout: Duration::from_secs(10),
        }
    }
}

pub struct AuthFlowController {
    index: Arc<ProviderIndex>,
    providers: HashMap<String, Arc<dyn OAuth2Provider>>,
    options: FlowOptions,
}

impl AuthFlowController {
    pub fn new(providers: Vec<Arc<dyn OAuth2Provider>>, options: FlowOptions) -> Self {
        let providers: HashMap<String, Arc<dyn OAuth2Provider>> = providers
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        let index = Arc::new(ProviderIndex::new(providers.keys().cloned()));

        Self {
            index,
            providers,
            options,
        }
    }

    /// Build every configured provider adapter
    pub fn from_config(config: &Config) -> Result<Self, AuthError> {
        let mut providers: Vec<Arc<dyn OAuth2Provider>> = Vec::new();
        for (name, provider_config) in config.provider_configs() {
            let provider = ProviderFactory::create_provider(name, provider_config)?;
            info!(provider = name, "Registered OAuth2 provider");
            providers.push(Arc::from(provider));
        }

        if providers.is_empty() {
            warn!("No OAuth2 providers configured; the index page will be empty");
        }

        Ok(Self::new(
            providers,
            FlowOptions {
                persist_identity: config.session.persist_identity,
                exchange_timeout: config.auth.exchange_timeout(),
            },
        ))
    }

    pub fn index(&self) -> Arc<ProviderIndex> {
        Arc::clone(&self.index)
    }

    fn provider(&self, name: &str) -> Result<&Arc<dyn OAuth2Provider>, AuthError> {
        self.providers
            .get(name)
            .ok_or_else(|| AuthError::UnknownProvider(name.to_string()))
    }

    /// Resume a valid session or start a new login with the provider
    pub fn begin_or_resume(
        &self,
        provider_name: &str,
        session: &mut SessionRecord,
    ) -> Result<BeginOutcome, AuthError> {
        let provider = self.provider(provider_name)?;
        let now = Utc::now();

        if let Some(identity) = session.identity(provider_name, now) {
            debug!(provider = provider_name, user_id = %identity.user_id, "Resuming session");
            return Ok(BeginOutcome::Resumed(identity.clone()));
        }

        // The provider prefix lets a stray callback be attributed in logs
        let state = format!("{}.{}", provider_name, random_token());
        let nonce = random_token();
        let pkce = provider.uses_pkce().then(PkcePair::generate);

        let url = provider.authorization_url(
            &state,
            &nonce,
            pkce.as_ref().map(|p| p.code_challenge.as_str()),
        )?;

        session.set_pending(
            provider_name,
            PendingLogin {
                state,
                nonce,
                pkce_verifier: pkce.map(|p| p.code_verifier),
                started_at: now,
            },
        );

        info!(provider = provider_name, session = %session.id(), "Redirecting to provider");
        Ok(BeginOutcome::Redirect(url))
    }

    /// Finish the handshake started by `begin_or_resume`.
    ///
    /// The pending login is consumed whatever the outcome, so a failed
    /// callback leaves the provider unauthenticated.
    pub async fn complete_callback(
        &self,
        provider_name: &str,
        params: &CallbackParams,
        session: &mut SessionRecord,
    ) -> Result<AuthenticatedIdentity, AuthError> {
        let provider = self.provider(provider_name)?;
        let pending = session.take_pending(provider_name);

        match self.finish(provider.as_ref(), pending, params).await {
            Ok(identity) => {
                info!(
                    provider = provider_name,
                    session = %session.id(),
                    user_id = %identity.user_id,
                    "Login completed"
                );
                if self.options.persist_identity {
                    session.set_authenticated(provider_name, identity.clone(), Utc::now());
                }
                Ok(identity)
            }
            Err(e) => {
                warn!(provider = provider_name, error = %e, "Login failed");
                Err(e)
            }
        }
    }

    async fn finish(
        &self,
        provider: &dyn OAuth2Provider,
        pending: Option<PendingLogin>,
        params: &CallbackParams,
    ) -> Result<AuthenticatedIdentity, AuthError> {
        let name = provider.name();
        let fail = |reason| AuthError::exchange(name, reason);

        if let Some(error) = &params.error {
            return Err(fail(ExchangeFailure::ProviderDenied {
                error: error.clone(),
                description: params.error_description.clone().unwrap_or_default(),
            }));
        }

        let pending = pending.ok_or_else(|| fail(ExchangeFailure::NoPendingLogin))?;

        let state = params
            .state
            .as_deref()
            .ok_or_else(|| fail(ExchangeFailure::InvalidState))?;
        if !bool::from(state.as_bytes().ct_eq(pending.state.as_bytes())) {
            return Err(fail(ExchangeFailure::InvalidState));
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| fail(ExchangeFailure::MissingCode))?;

        let callback = CallbackContext {
            nonce: pending.nonce,
            user: params.user.clone(),
        };

        let exchange = async {
            let tokens = provider
                .exchange_code(code, pending.pkce_verifier.as_deref())
                .await?;
            let user = provider.fetch_user(&tokens, &callback).await?;
            Ok::<_, AuthError>(AuthenticatedIdentity::new(name, user, tokens, Utc::now()))
        };

        tokio::time::timeout(self.options.exchange_timeout, exchange)
            .await
            .map_err(|_| fail(ExchangeFailure::Timeout))?
    }

    /// Forget everything the session knows; safe to call repeatedly
    pub fn logout(&self, provider_name: &str, session: &mut SessionRecord) {
        if !self.index.contains(provider_name) {
            debug!(provider = provider_name, "Logout for unregistered provider");
        }
        session.clear();
        info!(provider = provider_name, session = %session.id(), "Session cleared");
    }
}

/// 256 random bits, URL-safe
fn random_token() -> String {
    let random_bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}
