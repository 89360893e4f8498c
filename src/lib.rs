use std::net::SocketAddr;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub mod auth;
pub mod config;
pub mod views;

use auth::routes::{AppState, create_router};
use auth::{AuthError, AuthFlowController, SessionStore};

/// Build the shared handler state from configuration
pub fn build_state(config: &config::Config) -> Result<AppState, AuthError> {
    let controller = AuthFlowController::from_config(config)?;
    let sessions = SessionStore::new(&config.session)?;
    let views = views::Views::new()?;

    Ok(AppState::new(controller, sessions, views))
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter`; `json` switches to one JSON object per line.
pub fn init_tracing(default_filter: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
    };

    if let Err(e) = result {
        debug!("Tracing subscriber already installed: {}", e);
    }
}

/// Starts the web server with the given configuration.
///
/// Binds the configured address (port 0 picks a free one), serves in a
/// background task until `shutdown_rx` fires and returns the bound port.
pub async fn start_server_with_config(
    config: config::Config,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<u16> {
    let state = build_state(&config)?;
    let app = create_router(state);

    let addr: SocketAddr = config
        .server_addr()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let port = listener.local_addr()?.port();

    info!("listening on {}:{}", config.server.host, port);
    debug!(
        "Server configuration - base_url: {}, providers: {:?}",
        config.server.base_url,
        config.providers.enabled_providers()
    );

    tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await;

        match result {
            Ok(()) => info!("server stopped"),
            Err(e) => tracing::error!("server error: {}", e),
        }
    });

    Ok(port)
}
