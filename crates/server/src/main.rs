//! Parlor Server Binary
//!
//! Thin wrapper around the server library: loads configuration, sets up
//! logging, starts the operator console, and runs the server until
//! `shutdown` or Ctrl-C.

use anyhow::Result;
use server::{Server, ServerConfig, admin};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let server = Arc::new(Server::bind(config.server_config()).await?);

    if config.console {
        let console = server.clone();
        tokio::spawn(async move {
            if let Err(e) = admin::run_console(console).await {
                error!("console failed: {e:#}");
            }
        });
    }

    let signals = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            signals.shutdown().await;
        }
    });

    server.run().await?;

    // Give connection tasks a moment to flush their goodbye lines.
    let deadline = Instant::now() + Duration::from_secs(1);
    while !server.state().registry.is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}
