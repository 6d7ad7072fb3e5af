//! Server startup and connection management.
//!
//! This module provides the main `Server` struct and the per-connection
//! task that ties a TCP stream to the handlers.

use crate::{
    connection::{Connection, Sender},
    handlers::{negotiate, run_client},
    state::{ServerState, Settings},
};
use anyhow::{Context, Result};
use api::{CLOSE_SIGNAL, server_notice};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Configuration for the server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address to bind to (IPv4 or IPv6 with port).
    pub bind: SocketAddr,
    pub settings: Settings,
}

/// The Parlor chat server.
///
/// Owns the listening socket and the shared [`ServerState`]. Every accepted
/// connection gets its own task; [`Server::shutdown`] stops them all.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    /// Bind the listening socket.
    pub async fn bind(config: Config) -> Result<Self> {
        let listener = TcpListener::bind(config.bind)
            .await
            .with_context(|| format!("failed to bind {}", config.bind))?;
        let state = Arc::new(ServerState::new(config.settings));
        Ok(Self { listener, state })
    }

    /// Get the local address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Get a reference to the server state (for tests and the console).
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Accept connections until [`Server::shutdown`] is called.
    pub async fn run(&self) -> Result<()> {
        info!("server_listen_addr = {}", self.local_addr()?);
        let shutdown = self.state.shutdown_token();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, remote) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            };

            info!("new connection from {remote}");
            let state = self.state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, state).await {
                    debug!(%remote, "connection ended: {e:#}");
                }
            });
        }

        info!("server stopped accepting connections");
        Ok(())
    }

    /// Terminate every match, close every connection, and stop [`Server::run`].
    pub async fn shutdown(&self) {
        self.state.shutdown().await;
    }
}

/// Drive one connection from the username prompt to disconnect.
async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> Result<()> {
    let connection = Arc::new(Connection::spawn(stream, state.settings.max_line_length)?);
    let shutdown = state.shutdown_token();

    let player = tokio::select! {
        biased;
        _ = shutdown.cancelled() => {
            let _ = connection.send_line(&server_notice("Server is shutting down"));
            let _ = connection.send_line(CLOSE_SIGNAL);
            connection.close();
            return Ok(());
        }
        negotiated = negotiate(&state, connection.clone()) => negotiated?,
    };

    run_client(state, player).await;
    Ok(())
}
