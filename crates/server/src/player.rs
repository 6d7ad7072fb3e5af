//! Connected players.
//!
//! A [`Player`] is a [`Connection`] bound to a username plus the mutable
//! match-related fields: the current move, a cumulative score, and a
//! tri-state [`PlayerStatus`].
//!
//! The status lives in a `watch` channel so that a player's own worker can
//! park while a match started by the opponent's worker owns its input, and
//! wake up as soon as the match ends.

use crate::connection::{Connection, Identified, Sender};
use crate::error::TransportError;
use crate::sessions::SessionId;
use api::Choice;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, watch};

/// Whether a player can be challenged or is tied up.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlayerStatus {
    #[default]
    Available,
    /// Issued a challenge that has not been accepted yet.
    Pending { opponent: String },
    InMatch { session: SessionId },
}

impl PlayerStatus {
    pub fn is_in_match(&self) -> bool {
        matches!(self, Self::InMatch { .. })
    }
}

/// Per-player game fields, guarded by the player's own lock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct MatchRecord {
    choice: Option<Choice>,
    score: u32,
}

#[derive(Debug)]
pub struct Player {
    username: String,
    connection: Arc<Connection>,
    status: watch::Sender<PlayerStatus>,
    record: Mutex<MatchRecord>,
    /// Set when the player typed `close` inside a match.
    hangup: AtomicBool,
}

impl Player {
    pub fn new(username: impl Into<String>, connection: Arc<Connection>) -> Self {
        Self {
            username: username.into(),
            connection,
            status: watch::Sender::new(PlayerStatus::Available),
            record: Mutex::new(MatchRecord::default()),
            hangup: AtomicBool::new(false),
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub async fn next_line(&self) -> Option<String> {
        self.connection.next_line().await
    }

    /// Close the underlying connection (idempotent).
    pub fn close(&self) -> bool {
        self.connection.close()
    }

    pub fn status(&self) -> PlayerStatus {
        self.status.borrow().clone()
    }

    pub fn set_status(&self, status: PlayerStatus) {
        self.status.send_replace(status);
    }

    /// Drop `Pending` only if it points at `opponent`.
    pub fn clear_pending_for(&self, opponent: &str) -> bool {
        self.status.send_if_modified(|status| match status {
            PlayerStatus::Pending { opponent: o } if o == opponent => {
                *status = PlayerStatus::Available;
                true
            }
            _ => false,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<PlayerStatus> {
        self.status.subscribe()
    }

    pub async fn choice(&self) -> Option<Choice> {
        self.record.lock().await.choice
    }

    pub async fn set_choice(&self, choice: Choice) {
        self.record.lock().await.choice = Some(choice);
    }

    pub async fn reset_choice(&self) {
        self.record.lock().await.choice = None;
    }

    pub async fn score(&self) -> u32 {
        self.record.lock().await.score
    }

    /// Add a won round, returning the new score.
    pub async fn increment_score(&self) -> u32 {
        let mut record = self.record.lock().await;
        record.score += 1;
        record.score
    }

    pub fn request_hangup(&self) {
        self.hangup.store(true, Ordering::Release);
    }

    pub fn hangup_requested(&self) -> bool {
        self.hangup.load(Ordering::Acquire)
    }
}

impl Identified for Player {
    fn username(&self) -> &str {
        &self.username
    }
}

impl Sender for Player {
    fn send_line(&self, line: &str) -> Result<(), TransportError> {
        self.connection.send_line(line)
    }
}

/// Build a player over an in-memory connection.
#[cfg(test)]
pub(crate) fn test_player(username: &str) -> (Arc<Player>, crate::connection::ConnectionIo) {
    let (connection, io) = Connection::pair("127.0.0.1:9".parse().unwrap());
    (Arc::new(Player::new(username, Arc::new(connection))), io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_transitions() {
        let (player, _io) = test_player("alice");
        assert_eq!(player.status(), PlayerStatus::Available);

        player.set_status(PlayerStatus::Pending { opponent: "bob".into() });
        assert!(!player.status().is_in_match());

        assert!(!player.clear_pending_for("carol"));
        assert!(player.clear_pending_for("bob"));
        assert_eq!(player.status(), PlayerStatus::Available);

        player.set_status(PlayerStatus::InMatch { session: 7 });
        assert!(!player.clear_pending_for("bob"));
        assert_eq!(player.status(), PlayerStatus::InMatch { session: 7 });
    }

    #[tokio::test]
    async fn test_parked_worker_wakes_on_status_change() {
        let (player, _io) = test_player("alice");
        player.set_status(PlayerStatus::InMatch { session: 1 });

        let mut status = player.subscribe();
        let waiter = tokio::spawn(async move {
            status.wait_for(|s| !s.is_in_match()).await.map(|s| s.clone())
        });

        player.set_status(PlayerStatus::Available);
        assert_eq!(waiter.await.unwrap().unwrap(), PlayerStatus::Available);
    }

    #[tokio::test]
    async fn test_choice_and_score() {
        let (player, _io) = test_player("alice");
        assert_eq!(player.choice().await, None);
        assert_eq!(player.score().await, 0);

        player.set_choice(Choice::Paper).await;
        assert_eq!(player.choice().await, Some(Choice::Paper));
        assert_eq!(player.increment_score().await, 1);
        assert_eq!(player.increment_score().await, 2);
        player.reset_choice().await;

        assert_eq!(player.choice().await, None);
        assert_eq!(player.score().await, 2);
    }
}
