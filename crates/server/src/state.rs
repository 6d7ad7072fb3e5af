//! Server state management.
//!
//! [`ServerState`] bundles everything the connection workers share and is
//! testable in isolation, without sockets.
//!
//! # Locking Strategy
//!
//! - **`registry`**: `DashMap` for lock-free per-name access; broadcasts
//!   snapshot first and send outside the map
//! - **`broker`**: one `Mutex` around the request list, so propose and
//!   accept are atomic with respect to each other
//! - **`sessions`**: `RwLock<BTreeMap>`, written only when a match starts or
//!   ends; ids come from an `AtomicU64`
//! - **players**: per-player `Mutex` for move and score, and a `watch`
//!   channel for status
//!
//! No code path holds two of these locks while awaiting I/O. Sends are
//! queued on unbounded channels and never block.

use crate::broker::Broker;
use crate::game::{GameSettings, MatchEnd};
use crate::registry::Registry;
use crate::router::BroadcastRouter;
use crate::sessions::ActiveSessions;
use api::DEFAULT_MAX_LINE_LENGTH;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Tunables the engine reads at runtime.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Username attempts before the connection is closed.
    pub name_attempts: u32,
    pub forfeit_poll_interval: Duration,
    /// Longest accepted input line, in bytes.
    pub max_line_length: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name_attempts: 3,
            forfeit_poll_interval: Duration::from_secs(1),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl Settings {
    pub fn game(&self) -> GameSettings {
        GameSettings {
            forfeit_poll_interval: self.forfeit_poll_interval,
        }
    }
}

/// The server's shared state.
pub struct ServerState {
    pub registry: Registry,
    pub broker: Broker,
    pub sessions: ActiveSessions,
    pub settings: Settings,
    shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(settings: Settings) -> Self {
        Self {
            registry: Registry::new(),
            broker: Broker::new(),
            sessions: ActiveSessions::new(),
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn router(&self) -> BroadcastRouter<'_> {
        BroadcastRouter::new(&self.registry, &self.sessions)
    }

    /// Token cancelled once shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop every match and close every connection. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let players = self.registry.len();
        let sessions = self.sessions.len().await;
        info!(players, sessions, "shutting down");
        self.shutdown.cancel();
        self.sessions.terminate_all(MatchEnd::Shutdown).await;
        self.registry.close_all("Server is shutting down");
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, Outbound};
    use crate::game::GameSession;
    use api::CLOSE_SIGNAL;
    use std::sync::Arc;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.name_attempts, 3);
        assert_eq!(settings.game().forfeit_poll_interval, Duration::from_secs(1));
        assert_eq!(settings.max_line_length, DEFAULT_MAX_LINE_LENGTH);
    }

    /// Shutdown terminates sessions and closes every registered connection.
    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let state = ServerState::default();
        let (connection, mut io) = Connection::pair("127.0.0.1:9".parse().unwrap());
        let alice = state.registry.register("alice", Arc::new(connection)).unwrap();
        let (bob, _bob_io) = crate::player::test_player("bob");

        let session = Arc::new(GameSession::new(state.sessions.next_id(), state.settings.game()));
        session.add_player(alice.clone()).await;
        session.add_player(bob).await;
        state.sessions.insert(session.clone()).await;

        state.shutdown().await;

        assert!(state.is_shutting_down());
        assert!(session.is_terminated());
        assert!(alice.connection().is_closed());

        let mut items = Vec::new();
        while let Ok(item) = io.outbound.try_recv() {
            items.push(item);
        }
        assert_eq!(
            items.last(),
            Some(&Outbound::Close),
            "close must be the last thing queued"
        );
        assert!(items.contains(&Outbound::Line(CLOSE_SIGNAL.to_string())));

        // Second call is a no-op.
        state.shutdown().await;
    }
}
