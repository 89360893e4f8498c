use clap::Parser;
use socialgate::{config::Config, init_tracing, start_server_with_config};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Social login demo server
#[derive(Debug, Parser)]
#[command(name = "socialgate", version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "SOCIALGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("info,tower_http=debug", args.log_json);

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let port = start_server_with_config(config, shutdown_rx).await?;
    info!("socialgate ready on port {}", port);

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, stopping server...");

    let _ = shutdown_tx.send(());
    tokio::time::sleep(Duration::from_millis(200)).await;

    Ok(())
}
