use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use siplet_infra_common::{log_welcome, setup_logging};
use siplet_server::{OptionsResponder, ServerConfig, SipServer};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_file(&path)?,
        None => ServerConfig::default(),
    };
    setup_logging(config.logging_config()?).context("Cannot initialize logging")?;
    log_welcome("siplet-server", env!("CARGO_PKG_VERSION"));

    let mut server = SipServer::start(config, Arc::new(OptionsResponder::default())).await?;

    tokio::signal::ctrl_c().await.context("Cannot listen for shutdown signal")?;
    info!("Shutdown requested");
    server.stop().await
}
