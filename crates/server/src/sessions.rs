//! The set of active game sessions.
//!
//! Membership only changes when a match starts or ends. Session ids come
//! from an atomic sequence so concurrent accepts never share one.

use crate::game::{GameSession, MatchEnd};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

pub type SessionId = u64;

pub struct ActiveSessions {
    sessions: RwLock<BTreeMap<SessionId, Arc<GameSession>>>,
    next_id: AtomicU64,
}

impl ActiveSessions {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next session id (lock-free).
    pub fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn insert(&self, session: Arc<GameSession>) {
        self.sessions.write().await.insert(session.id(), session);
    }

    pub async fn remove(&self, id: SessionId) -> Option<Arc<GameSession>> {
        self.sessions.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<Arc<GameSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Whether `username` is on the roster of any active session.
    pub async fn contains_player(&self, username: &str) -> bool {
        for session in self.snapshot().await {
            if session.has_player(username).await {
                return true;
            }
        }
        false
    }

    /// Usernames of every player currently inside a match.
    pub async fn in_game_usernames(&self) -> HashSet<String> {
        let mut names = HashSet::new();
        for session in self.snapshot().await {
            names.extend(session.participants().await);
        }
        names
    }

    /// Ask every running session to stop.
    pub async fn terminate_all(&self, end: MatchEnd) {
        for session in self.snapshot().await {
            session.terminate(end.clone()).await;
        }
    }
}

impl Default for ActiveSessions {
    fn default() -> Self {
        Self::new()
    }
}
