//! Parlor Server Library
//!
//! A line-oriented TCP chat room where connected users can challenge each
//! other to best-of-forever Rock-Paper-Scissors. The server logic lives here,
//! separated from the binary entrypoint, so it can be driven in-process by
//! tests.
//!
//! # Architecture
//!
//! - [`connection`]: socket adapter (reader/writer tasks, line framing)
//! - [`player`]: a connection bound to a username, with status and score
//! - [`registry`]: username uniqueness and lobby broadcast
//! - [`broker`]: pending challenges and atomic accept
//! - [`game`]: the match state machine
//! - [`sessions`]: the set of running matches
//! - [`router`]: chat fan-out with in-match exclusion
//! - [`handlers`]: per-connection protocol loop
//! - [`server`]: listener and connection tasks
//! - [`admin`]: operator console on stdin
//! - [`config`]: configuration management (TOML file + env + CLI args)
//!
//! # Configuration
//!
//! The server uses a layered configuration system:
//! 1. Default values
//! 2. Configuration file (parlor-server.toml)
//! 3. Environment variables (PARLOR_*)
//! 4. Command-line arguments (highest priority)
//!
//! See [`config::ServerConfig`] for details.
//!
//! # Example
//!
//! ```no_run
//! use server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     let server = Server::bind(config.server_config()).await?;
//!     server.run().await
//! }
//! ```

pub mod admin;
pub mod broker;
pub mod config;
pub mod connection;
pub mod error;
pub mod game;
pub mod handlers;
pub mod player;
pub mod registry;
pub mod router;
pub mod server;
pub mod sessions;
pub mod state;

// Re-export main types for convenience
pub use config::{CliArgs, ServerConfig};
pub use game::{GameSession, MatchEnd, MatchSummary};
pub use player::{Player, PlayerStatus};
pub use server::{Config, Server};
pub use state::{ServerState, Settings};
