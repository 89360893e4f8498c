// Authentication Module
// OAuth2/OIDC login flow with cookie-backed sessions

pub mod controller;
pub mod error;
pub mod identity;
pub mod pkce;
pub mod providers;
pub mod routes;
pub mod session;

pub use controller::{AuthFlowController, BeginOutcome, CallbackParams, FlowOptions};
pub use error::{AuthError, ExchangeFailure};
pub use identity::{AuthenticatedIdentity, ProviderIndex};
pub use providers::{
    OAuth2Provider, OAuth2ProviderConfig, OAuth2TokenResponse, OAuth2UserInfo, ProviderFactory,
};
pub use session::{SessionRecord, SessionStore};
