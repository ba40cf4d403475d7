use anyhow::Context as _;
use lattice_ircd::config::Config;
use lattice_ircd::logging::LogManager;
use lattice_ircd::metrics;
use lattice_ircd::server::Server;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    let logging = LogManager::init_global(&config.logging)?;
    metrics::init();

    info!(
        server = %config.server.name,
        network = %config.server.network,
        version = env!("CARGO_PKG_VERSION"),
        "Starting lattice-ircd"
    );

    let server = Server::builder(config)
        .config_path(&config_path)
        .logging(logging)
        .build()
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to start server");
            e
        })?;

    server.run().await?;
    info!("Server stopped");
    Ok(())
}
