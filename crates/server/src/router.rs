//! Chat fan-out.
//!
//! Lobby chat goes to every registered player except the sender and anyone
//! inside a match. A player inside a match has no chat channel at all: their
//! lines are consumed by the session's move collector.

use crate::connection::Identified;
use crate::player::Player;
use crate::registry::Registry;
use crate::sessions::ActiveSessions;
use api::{chat_line, server_notice};
use std::collections::HashSet;
use tracing::info;

pub struct BroadcastRouter<'a> {
    registry: &'a Registry,
    sessions: &'a ActiveSessions,
}

impl<'a> BroadcastRouter<'a> {
    pub fn new(registry: &'a Registry, sessions: &'a ActiveSessions) -> Self {
        Self { registry, sessions }
    }

    /// Players who must not see lobby traffic right now.
    ///
    /// Status flips to `InMatch` before the session is inserted, so both
    /// sources are consulted.
    async fn in_game(&self) -> HashSet<String> {
        let mut names = self.sessions.in_game_usernames().await;
        names.extend(
            self.registry
                .snapshot()
                .into_iter()
                .filter(|p| p.status().is_in_match())
                .map(|p| p.username().to_string()),
        );
        names
    }

    /// Relay a chat message from `sender`. Returns the number of recipients.
    pub async fn chat(&self, sender: &Player, text: &str) -> usize {
        let in_game = self.in_game().await;
        if in_game.contains(sender.username()) {
            return 0;
        }

        let line = chat_line(sender.username(), text);
        info!(target: "chat", "{line}");

        let mut exclude = in_game;
        exclude.insert(sender.username().to_string());
        self.registry.broadcast(&line, &exclude)
    }

    /// Post a server notice to the lobby, optionally skipping one player.
    pub async fn announce(&self, text: &str, skip: Option<&str>) -> usize {
        let mut exclude = self.in_game().await;
        if let Some(name) = skip {
            exclude.insert(name.to_string());
        }
        info!(target: "chat", "{}", server_notice(text));
        self.registry.broadcast(&server_notice(text), &exclude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, ConnectionIo};
    use crate::game::{GameSession, GameSettings};
    use crate::player::PlayerStatus;
    use std::sync::Arc;

    fn join(registry: &Registry, name: &str) -> (Arc<Player>, ConnectionIo) {
        let (connection, io) = Connection::pair("127.0.0.1:9".parse().unwrap());
        (registry.register(name, Arc::new(connection)).unwrap(), io)
    }

    #[tokio::test]
    async fn test_chat_skips_sender() {
        let registry = Registry::new();
        let sessions = ActiveSessions::new();
        let (alice, mut alice_io) = join(&registry, "alice");
        let (_bob, mut bob_io) = join(&registry, "bob");

        let router = BroadcastRouter::new(&registry, &sessions);
        assert_eq!(router.chat(&alice, "hi all").await, 1);

        assert!(alice_io.drain().is_empty());
        assert_eq!(bob_io.drain(), vec!["alice << hi all".to_string()]);
    }

    #[tokio::test]
    async fn test_chat_skips_players_in_match() {
        let registry = Registry::new();
        let sessions = ActiveSessions::new();
        let (alice, mut alice_io) = join(&registry, "alice");
        let (bob, mut bob_io) = join(&registry, "bob");
        let (carol, mut carol_io) = join(&registry, "carol");
        let (_dave, mut dave_io) = join(&registry, "dave");

        let session = Arc::new(GameSession::new(sessions.next_id(), GameSettings::default()));
        session.add_player(alice.clone()).await;
        session.add_player(bob.clone()).await;
        sessions.insert(session).await;

        let router = BroadcastRouter::new(&registry, &sessions);
        assert_eq!(router.chat(&carol, "anyone?").await, 1);
        assert!(alice_io.drain().is_empty());
        assert!(bob_io.drain().is_empty());
        assert!(carol_io.drain().is_empty());
        assert_eq!(dave_io.drain(), vec!["carol << anyone?".to_string()]);

        // A player inside a match reaches no one.
        assert_eq!(router.chat(&alice, "psst").await, 0);
        assert!(dave_io.drain().is_empty());
    }

    #[tokio::test]
    async fn test_status_alone_hides_player() {
        let registry = Registry::new();
        let sessions = ActiveSessions::new();
        let (alice, mut alice_io) = join(&registry, "alice");
        let (bob, _bob_io) = join(&registry, "bob");
        alice.set_status(PlayerStatus::InMatch { session: 3 });

        let router = BroadcastRouter::new(&registry, &sessions);
        assert_eq!(router.chat(&bob, "hello").await, 0);
        assert!(alice_io.drain().is_empty());
    }

    #[tokio::test]
    async fn test_announce_skips_named_player() {
        let registry = Registry::new();
        let sessions = ActiveSessions::new();
        let (_alice, mut alice_io) = join(&registry, "alice");
        let (_bob, mut bob_io) = join(&registry, "bob");

        let router = BroadcastRouter::new(&registry, &sessions);
        assert_eq!(router.announce("alice joined the chatroom", Some("alice")).await, 1);
        assert!(alice_io.drain().is_empty());
        assert_eq!(
            bob_io.drain(),
            vec![server_notice("alice joined the chatroom")]
        );
    }
}
