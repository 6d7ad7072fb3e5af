//! Challenge broker.
//!
//! Holds outstanding `play` requests and turns an `accept` into a match.
//! Every check-and-mutate step runs under the broker's single lock, so two
//! acceptors can never pair with the same challenger and a challenger can
//! never end up in two matches.
//!
//! Rules:
//!
//! - a challenger has at most one outgoing request; a new `play` withdraws
//!   the previous one
//! - a player already in a match can neither challenge nor accept
//! - a target may hold several incoming requests; `accept` takes the oldest
//!   one whose challenger is still connected and free
//! - requests live until they are accepted or either side disconnects

use crate::connection::{Identified, Sender};
use crate::error::{AcceptError, ChallengeError};
use crate::player::{Player, PlayerStatus};
use crate::registry::Registry;
use crate::sessions::{ActiveSessions, SessionId};
use api::server_notice;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// An outstanding `play` request.
#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub challenger: Arc<Player>,
    pub target: Arc<Player>,
}

/// A successful `accept`: both players are now `InMatch { session }`.
#[derive(Debug, Clone)]
pub struct Matched {
    pub opponent: Arc<Player>,
    pub session: SessionId,
}

pub struct Broker {
    requests: Mutex<Vec<MatchRequest>>,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Record a challenge from `challenger` to `target_name`.
    ///
    /// The target is busy while it is inside a match. On success the
    /// challenger is `Pending` and the target handle is returned so the
    /// caller can notify it.
    pub async fn propose(
        &self,
        registry: &Registry,
        sessions: &ActiveSessions,
        challenger: &Arc<Player>,
        target_name: &str,
    ) -> Result<Arc<Player>, ChallengeError> {
        let target_name = target_name.trim();
        if target_name.is_empty() || target_name == challenger.username() {
            return Err(ChallengeError::SelfChallenge);
        }

        let mut requests = self.requests.lock().await;
        // Checked under the lock: `accept` moves players into a match while holding it.
        if challenger.status().is_in_match() {
            return Err(ChallengeError::AlreadyInMatch);
        }
        let target = registry
            .lookup(target_name)
            .ok_or_else(|| ChallengeError::OpponentNotFound(target_name.to_string()))?;
        // A pending challenge of its own does not make the target busy.
        if target.status().is_in_match() || sessions.contains_player(target_name).await {
            return Err(ChallengeError::OpponentBusy(target_name.to_string()));
        }

        requests.retain(|r| !Arc::ptr_eq(&r.challenger, challenger));
        requests.push(MatchRequest {
            challenger: challenger.clone(),
            target: target.clone(),
        });
        challenger.set_status(PlayerStatus::Pending {
            opponent: target_name.to_string(),
        });
        info!(
            target: "broker",
            "{} challenged {}",
            challenger.username(),
            target_name
        );
        Ok(target)
    }

    /// Accept the oldest usable request addressed to `acceptor`.
    ///
    /// Requests whose challenger has disconnected are discarded on the way.
    /// Requests whose challenger is currently in another match are kept.
    pub async fn accept(
        &self,
        registry: &Registry,
        sessions: &ActiveSessions,
        acceptor: &Arc<Player>,
    ) -> Result<Matched, AcceptError> {
        let mut requests = self.requests.lock().await;
        if acceptor.status().is_in_match() {
            return Err(AcceptError::AlreadyInMatch);
        }
        let mut last_err = AcceptError::NoPendingRequest;

        let mut i = 0;
        while i < requests.len() {
            if !Arc::ptr_eq(&requests[i].target, acceptor) {
                i += 1;
                continue;
            }
            let challenger = requests[i].challenger.clone();
            let name = challenger.username().to_string();

            let connected = registry
                .lookup(&name)
                .is_some_and(|p| Arc::ptr_eq(&p, &challenger));
            if !connected {
                debug!(target: "broker", "discarding request from departed {name}");
                requests.remove(i);
                last_err = AcceptError::OpponentGone(name);
                continue;
            }
            if challenger.status().is_in_match() {
                last_err = AcceptError::OpponentBusy(name);
                i += 1;
                continue;
            }

            requests.remove(i);
            // Both players leave the lobby; their other outgoing requests go with it.
            requests.retain(|r| {
                !Arc::ptr_eq(&r.challenger, acceptor) && !Arc::ptr_eq(&r.challenger, &challenger)
            });

            let session = sessions.next_id();
            challenger.set_status(PlayerStatus::InMatch { session });
            acceptor.set_status(PlayerStatus::InMatch { session });
            info!(
                target: "broker",
                session,
                "{} accepted {}'s challenge",
                acceptor.username(),
                name
            );
            return Ok(Matched {
                opponent: challenger,
                session,
            });
        }
        Err(last_err)
    }

    /// Take back `challenger`'s request to `target`, if it is still there.
    pub async fn withdraw(&self, challenger: &Arc<Player>, target: &Arc<Player>) -> bool {
        let mut requests = self.requests.lock().await;
        let before = requests.len();
        requests.retain(|r| !(Arc::ptr_eq(&r.challenger, challenger) && Arc::ptr_eq(&r.target, target)));
        let withdrawn = requests.len() != before;
        if withdrawn {
            challenger.clear_pending_for(target.username());
            debug!(
                target: "broker",
                "{} withdrew challenge to {}",
                challenger.username(),
                target.username()
            );
        }
        withdrawn
    }

    /// Drop every request involving `player`.
    ///
    /// Challengers who were waiting on `player` go back to `Available` and
    /// are told why.
    pub async fn forget(&self, player: &Arc<Player>) {
        let mut orphaned = Vec::new();
        {
            let mut requests = self.requests.lock().await;
            requests.retain(|r| {
                if Arc::ptr_eq(&r.challenger, player) {
                    false
                } else if Arc::ptr_eq(&r.target, player) {
                    orphaned.push(r.challenger.clone());
                    false
                } else {
                    true
                }
            });
        }

        for challenger in orphaned {
            if challenger.clear_pending_for(player.username()) {
                let _ = challenger.send_line(&server_notice(format!(
                    "<{}> left before answering your challenge",
                    player.username()
                )));
            }
        }
    }

    /// Names of players with a request outstanding against `target`, oldest first.
    pub async fn pending_for(&self, target: &str) -> Vec<String> {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.target.username() == target)
            .map(|r| r.challenger.username().to_string())
            .collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.requests.lock().await.is_empty()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
