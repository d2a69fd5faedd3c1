use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use raidsync_gateway::app;
use tracing::info;

/// Real-time change notifications for the raid scheduler.
#[derive(Debug, Parser)]
#[command(name = "raidsync-gateway", version)]
struct Cli {
    /// Path to raidsync.toml (defaults to ~/.raidsync/raidsync.toml).
    #[arg(long, env = "RAIDSYNC_CONFIG")]
    config: Option<String>,

    /// Override gateway.bind.
    #[arg(long)]
    bind: Option<String>,

    /// Override gateway.port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "raidsync_gateway=info,raidsync_notify=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config / RAIDSYNC_CONFIG > ~/.raidsync/raidsync.toml
    let mut config = raidsync_core::config::RaidsyncConfig::load(cli.config.as_deref())
        .unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            raidsync_core::config::RaidsyncConfig::default()
        });
    if let Some(bind) = cli.bind {
        config.gateway.bind = bind;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    if config.notify.announce_token.is_none() {
        info!("announce endpoint disabled (notify.announce_token not set)");
    }

    let state = Arc::new(app::AppState::new(config));
    state.hub.start();
    let router = app::build_router(Arc::clone(&state));

    info!("Raidsync gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // open event streams never finish on their own; close them once the
    // signal arrives so graceful shutdown can complete
    let hub = Arc::clone(&state.hub);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        hub.shutdown().await;
    })
    .await?;

    info!("Raidsync gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
