use std::path::PathBuf;

use raceway::{RacewayError, RacewayServerBuilder, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), RacewayError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    tracing::info!("Raceway server v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = ServerConfig::load(config_path.as_deref())?;
    tracing::info!(bind = %config.bind, rooms = config.rooms.len(), "configuration loaded");

    let server = RacewayServerBuilder::from_config(config).build().await?;
    server.run().await
}
