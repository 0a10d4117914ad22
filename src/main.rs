//! snowgated - the snowgate IRC gateway daemon.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use snowgate::backend::wire::WireConnector;
use snowgate::config::Config;
use snowgate::network::Gateway;
use snowgate::registry::SessionRegistry;
use snowgate::render::MarkupRenderer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "failed to load config");
        e
    })?;

    info!(
        server = %config.server.name,
        network = %config.server.network,
        backend = %config.backend.api_url,
        "starting snowgate"
    );

    let connector = Arc::new(WireConnector::new(
        &config.backend.api_url,
        &config.backend.gateway_url,
    ));
    let registry = SessionRegistry::new(connector, Arc::new(MarkupRenderer));

    let gateway = Gateway::bind(config, registry).await?;
    gateway.run().await
}
