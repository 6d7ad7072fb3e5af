//! Username registry.
//!
//! Maps claimed usernames to [`Player`] handles. Claiming goes through the
//! `DashMap` entry API, so two connections racing for the same name cannot
//! both win, and lookups never block behind a global lock.
//!
//! Broadcasts take a snapshot of the recipients first and send afterwards;
//! no map shard is held while a line is queued.

use crate::connection::{Connection, Identified, Sender};
use crate::error::NameError;
use crate::player::Player;
use api::{CLOSE_SIGNAL, server_notice};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Check a raw username line and return the name to claim.
///
/// Names are trimmed; what remains must be non-empty and free of whitespace.
pub fn validate_username(raw: &str) -> Result<&str, NameError> {
    let name = raw.trim();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(NameError::Invalid);
    }
    Ok(name)
}

pub struct Registry {
    players: DashMap<String, Arc<Player>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            players: DashMap::new(),
        }
    }

    /// Claim `raw` for `connection`, returning the new player.
    pub fn register(
        &self,
        raw: &str,
        connection: Arc<Connection>,
    ) -> Result<Arc<Player>, NameError> {
        let name = validate_username(raw)?;
        match self.players.entry(name.to_string()) {
            Entry::Occupied(_) => Err(NameError::Taken(name.to_string())),
            Entry::Vacant(slot) => {
                let player = Arc::new(Player::new(name, connection));
                slot.insert(player.clone());
                info!(username = name, "username registered");
                Ok(player)
            }
        }
    }

    /// Release `player`'s name. Only removes the entry if it still belongs to
    /// this exact player.
    pub fn unregister(&self, player: &Arc<Player>) -> bool {
        let removed = self
            .players
            .remove_if(player.username(), |_, p| Arc::ptr_eq(p, player))
            .is_some();
        if removed {
            debug!(username = player.username(), "username released");
        }
        removed
    }

    pub fn lookup(&self, username: &str) -> Option<Arc<Player>> {
        self.players.get(username).map(|r| r.value().clone())
    }

    pub fn contains(&self, username: &str) -> bool {
        self.players.contains_key(username)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Registered usernames, sorted.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.players.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Snapshot of all players for iteration outside the map.
    pub fn snapshot(&self) -> Vec<Arc<Player>> {
        self.players.iter().map(|r| r.value().clone()).collect()
    }

    /// Send `line` to every player not in `exclude`.
    ///
    /// A recipient whose send fails is dropped from the registry and its
    /// connection closed; its own worker then runs the normal disconnect
    /// path. Returns the number of players the line was queued for.
    pub fn broadcast(&self, line: &str, exclude: &HashSet<String>) -> usize {
        let recipients: Vec<Arc<Player>> = self
            .snapshot()
            .into_iter()
            .filter(|p| !exclude.contains(p.username()))
            .collect();

        let mut delivered = 0;
        for player in recipients {
            match player.send_line(line) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(username = player.username(), "dropping unreachable player: {e}");
                    self.unregister(&player);
                    player.close();
                }
            }
        }
        delivered
    }

    /// Send `notice` and the close token to one player, then close it.
    ///
    /// The entry itself is released by the player's worker on its way out.
    pub fn disconnect(&self, username: &str, notice: &str) -> bool {
        let Some(player) = self.lookup(username) else {
            return false;
        };
        Self::say_goodbye(&player, notice);
        true
    }

    /// Tell everyone the server is going away and close their connections.
    pub fn close_all(&self, reason: &str) {
        for player in self.snapshot() {
            Self::say_goodbye(&player, reason);
        }
    }

    fn say_goodbye(player: &Player, notice: &str) {
        let _ = player.send_line(&server_notice(notice));
        let _ = player.send_line(CLOSE_SIGNAL);
        player.close();
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
