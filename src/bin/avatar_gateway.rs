//! Avatar gateway binary: loads configuration, initializes tracing, and
//! serves the conversational-avatar HTTP transport until interrupted.

use avatar_gateway::config::GatewayConfig;
use avatar_gateway::server::GatewayServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = GatewayConfig::default_config_path();
    let mut config = if config_path.exists() {
        GatewayConfig::from_file(&config_path)
            .map_err(|e| anyhow::anyhow!("failed to load config from {}: {e}", config_path.display()))?
    } else {
        tracing::info!(path = %config_path.display(), "no config file found; using defaults");
        GatewayConfig::default()
    };
    config.apply_env_overrides();

    tracing::info!("avatar-gateway starting");

    let server = GatewayServer::start(config)
        .await
        .map_err(|e| anyhow::anyhow!("avatar-gateway failed to start: {e}"))?;

    tracing::info!(addr = %server.addr(), "avatar-gateway ready");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("failed to listen for shutdown signal: {e}"))?;

    tracing::info!("avatar-gateway shutting down");
    server.shutdown();
    Ok(())
}
