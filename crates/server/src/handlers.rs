//! Protocol handling for one connection.
//!
//! This module holds the logic a connection worker runs once its socket is
//! set up, separated from network I/O for testability:
//!
//! - [`negotiate`]: username prompt with a bounded number of attempts
//! - [`run_client`]: the lobby dispatch loop
//! - [`handle_line`]: one lobby command
//! - [`cleanup_client`]: disconnect bookkeeping
//!
//! # Input ownership
//!
//! A match runs on the worker of the player who typed `accept`. The
//! challenger's worker notices its status flip to `InMatch` and parks until
//! the match is over, so the session's move collector is the only reader of
//! the challenger's lines in the meantime.

use crate::connection::{Connection, Identified, Sender};
use crate::error::{ChallengeError, NegotiationError};
use crate::game::{GameSession, MatchEnd};
use crate::player::{Player, PlayerStatus};
use crate::state::ServerState;
use api::{CLOSE_SIGNAL, ClientCommand, HELP_TEXT, USERNAME_PROMPT, server_notice};
use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info};

/// Whether the worker keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Disconnect,
}

/// Send a server notice, turning a dead connection into [`Flow::Disconnect`].
fn reply(player: &Player, text: impl Display) -> Flow {
    match player.send_line(&server_notice(text)) {
        Ok(()) => Flow::Continue,
        Err(e) => {
            debug!(username = player.username(), "reply failed: {e}");
            Flow::Disconnect
        }
    }
}

/// Prompt for a username until one is claimed or attempts run out.
pub async fn negotiate(
    state: &ServerState,
    connection: Arc<Connection>,
) -> Result<Arc<Player>, NegotiationError> {
    let remote = connection.remote_addr();
    let attempts = state.settings.name_attempts.max(1);
    let mut prompt = USERNAME_PROMPT.to_string();
    let mut last_error = None;

    for attempt in 1..=attempts {
        connection
            .send_line(&server_notice(&prompt))
            .map_err(|_| NegotiationError::Disconnected)?;
        let Some(line) = connection.next_line().await else {
            return Err(NegotiationError::Disconnected);
        };

        match state.registry.register(&line, connection.clone()) {
            Ok(player) => {
                welcome(state, &player).await;
                return Ok(player);
            }
            Err(e) => {
                let remaining = attempts - attempt;
                debug!(%remote, remaining, "username rejected: {e}");
                prompt = format!(
                    "{e}. Connection will be closed on no attempts left. \
                     {remaining} attempts left. Enter a different username:"
                );
                last_error = Some(e);
            }
        }
    }

    info!(%remote, "closing connection after {attempts} failed username attempts");
    if let Some(e) = last_error {
        let _ = connection.send_line(&server_notice(format!("{e}. No attempts left. Goodbye.")));
    }
    let _ = connection.send_line(CLOSE_SIGNAL);
    connection.close();
    Err(NegotiationError::AttemptsExhausted(attempts))
}

async fn welcome(state: &ServerState, player: &Player) {
    let name = player.username();
    info!(username = name, remote = %player.connection().remote_addr(), "client joined");
    let _ = player.send_line(&server_notice(format!("Welcome {name} :)")));
    let _ = player.send_line(&server_notice(HELP_TEXT));
    state
        .router()
        .announce(&format!("{name} joined the chatroom"), Some(name))
        .await;
}

/// Lobby dispatch loop. Returns after cleanup once the player is gone.
pub async fn run_client(state: Arc<ServerState>, player: Arc<Player>) {
    let shutdown = state.shutdown_token();
    let mut status = player.subscribe();

    loop {
        if status.borrow().is_in_match() {
            // Parked: the match owns this player's input.
            let resumed = tokio::select! {
                biased;
                _ = shutdown.cancelled() => false,
                changed = status.wait_for(|s| !s.is_in_match()) => changed.is_ok(),
            };
            if !resumed {
                break;
            }
            if player.hangup_requested() {
                let _ = player.send_line(CLOSE_SIGNAL);
                break;
            }
            continue;
        }

        let line = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            changed = status.wait_for(PlayerStatus::is_in_match) => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            line = player.next_line() => line,
        };
        let Some(line) = line else {
            debug!(username = player.username(), "client hung up");
            break;
        };

        if handle_line(&state, &player, &line).await == Flow::Disconnect {
            break;
        }
    }

    cleanup_client(&state, &player).await;
}

/// Handle one line typed in the lobby.
pub async fn handle_line(state: &ServerState, player: &Arc<Player>, line: &str) -> Flow {
    match ClientCommand::parse(line) {
        ClientCommand::Empty => Flow::Continue,
        ClientCommand::Close => {
            let _ = player.send_line(CLOSE_SIGNAL);
            Flow::Disconnect
        }
        ClientCommand::Play { opponent } => handle_play(state, player, &opponent).await,
        ClientCommand::Accept => handle_accept(state, player).await,
        ClientCommand::Chat(text) => {
            state.router().chat(player, &text).await;
            Flow::Continue
        }
    }
}

async fn handle_play(state: &ServerState, player: &Arc<Player>, opponent: &str) -> Flow {
    let proposed = state
        .broker
        .propose(&state.registry, &state.sessions, player, opponent)
        .await;
    match proposed {
        Ok(target) => {
            let notice = server_notice(format!(
                "<{}> is requesting to play Rock Paper Scissors with you. Do you accept ?",
                player.username()
            ));
            if let Err(e) = target.send_line(&notice) {
                debug!(username = target.username(), "challenge not delivered: {e}");
                state.broker.withdraw(player, &target).await;
                return reply(
                    player,
                    ChallengeError::OpponentNotFound(target.username().to_string()),
                );
            }
            reply(
                player,
                format!(
                    "Challenge sent to <{}>. Waiting for them to accept...",
                    target.username()
                ),
            )
        }
        Err(e) => reply(player, e),
    }
}

/// Accept a challenge and run the match on this worker.
async fn handle_accept(state: &ServerState, player: &Arc<Player>) -> Flow {
    let matched = match state
        .broker
        .accept(&state.registry, &state.sessions, player)
        .await
    {
        Ok(matched) => matched,
        Err(e) => return reply(player, e),
    };
    let opponent = matched.opponent;

    let session = Arc::new(GameSession::new(matched.session, state.settings.game()));
    session.add_player(player.clone()).await;
    session.add_player(opponent.clone()).await;
    state.sessions.insert(session.clone()).await;
    if state.is_shutting_down() {
        session.terminate(MatchEnd::Shutdown).await;
    }

    let summary = session.run().await;

    state.sessions.remove(session.id()).await;
    opponent.set_status(PlayerStatus::Available);
    player.set_status(PlayerStatus::Available);
    info!(
        session = summary.id,
        rounds = summary.rounds,
        end = ?summary.end,
        "match finished"
    );

    if player.hangup_requested() {
        let _ = player.send_line(CLOSE_SIGNAL);
        return Flow::Disconnect;
    }
    Flow::Continue
}

/// Drop every trace of a departed player and tell everyone still connected.
pub async fn cleanup_client(state: &ServerState, player: &Arc<Player>) {
    let name = player.username();
    state.broker.forget(player).await;
    state.registry.unregister(player);
    if state.is_shutting_down() && !player.connection().is_closed() {
        let _ = player.send_line(CLOSE_SIGNAL);
    }
    player.close();
    info!(username = name, "client disconnected");

    if !state.is_shutting_down() {
        let exclude = HashSet::from([name.to_string()]);
        state
            .registry
            .broadcast(&server_notice(format!("{name} left the chatroom")), &exclude);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionIo, Outbound};
    use crate::state::Settings;

    fn state() -> Arc<ServerState> {
        Arc::new(ServerState::new(Settings::default()))
    }

    fn conn() -> (Arc<Connection>, ConnectionIo) {
        let (connection, io) = Connection::pair("127.0.0.1:9".parse().unwrap());
        (Arc::new(connection), io)
    }

    async fn login(state: &ServerState, name: &str) -> (Arc<Player>, ConnectionIo) {
        let (connection, mut io) = conn();
        io.inbound.send(name.to_string()).await.unwrap();
        let player = negotiate(state, connection).await.unwrap();
        io.drain();
        (player, io)
    }

    #[tokio::test]
    async fn test_negotiate_retries_taken_name() {
        let state = state();
        let (_alice, _alice_io) = login(&state, "alice").await;

        let (connection, mut io) = conn();
        io.inbound.send("alice".into()).await.unwrap();
        io.inbound.send("bob".into()).await.unwrap();
        let bob = negotiate(&state, connection).await.unwrap();
        assert_eq!(bob.username(), "bob");

        let lines = io.drain();
        assert_eq!(lines[0], server_notice(USERNAME_PROMPT));
        assert!(lines[1].contains("Username is already taken"));
        assert!(lines[1].contains("2 attempts left"));
        assert_eq!(lines[2], server_notice("Welcome bob :)"));
        assert_eq!(state.registry.len(), 2);
    }

    #[tokio::test]
    async fn test_negotiate_gives_up() {
        let state = state();
        let (connection, mut io) = conn();
        for _ in 0..3 {
            io.inbound.send("  ".into()).await.unwrap();
        }

        let err = negotiate(&state, connection.clone()).await.unwrap_err();
        assert!(matches!(err, NegotiationError::AttemptsExhausted(3)));
        assert!(connection.is_closed());

        let lines = io.drain();
        assert!(lines.iter().filter(|l| l.contains("Invalid username")).count() == 3);
        assert_eq!(lines.last().map(String::as_str), Some(CLOSE_SIGNAL));
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_negotiate_peer_gone() {
        let state = state();
        let (connection, io) = conn();
        let ConnectionIo {
            outbound: _outbound,
            inbound,
        } = io;
        drop(inbound);
        assert!(matches!(
            negotiate(&state, connection).await,
            Err(NegotiationError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_join_is_announced_to_others() {
        let state = state();
        let (_alice, mut alice_io) = login(&state, "alice").await;
        let (_bob, _bob_io) = login(&state, "bob").await;
        assert_eq!(alice_io.drain(), vec![server_notice("bob joined the chatroom")]);
    }

    #[tokio::test]
    async fn test_close_command_disconnects() {
        let state = state();
        let (alice, mut alice_io) = login(&state, "alice").await;

        assert_eq!(handle_line(&state, &alice, "close").await, Flow::Disconnect);
        assert_eq!(
            alice_io.outbound.try_recv().ok(),
            Some(Outbound::Line(CLOSE_SIGNAL.to_string()))
        );
    }

    #[tokio::test]
    async fn test_play_notifies_both_sides() {
        let state = state();
        let (alice, mut alice_io) = login(&state, "alice").await;
        let (_bob, mut bob_io) = login(&state, "bob").await;
        alice_io.drain();

        assert_eq!(handle_line(&state, &alice, "play bob").await, Flow::Continue);
        assert_eq!(
            bob_io.drain(),
            vec![server_notice(
                "<alice> is requesting to play Rock Paper Scissors with you. Do you accept ?"
            )]
        );
        assert_eq!(
            alice_io.drain(),
            vec![server_notice("Challenge sent to <bob>. Waiting for them to accept...")]
        );

        handle_line(&state, &alice, "play nobody").await;
        assert_eq!(alice_io.drain(), vec![server_notice("Player <nobody> not found")]);
    }

    #[tokio::test]
    async fn test_undelivered_challenge_is_withdrawn() {
        let state = state();
        let (alice, mut alice_io) = login(&state, "alice").await;
        let (_bob, bob_io) = login(&state, "bob").await;
        alice_io.drain();
        drop(bob_io);

        assert_eq!(handle_line(&state, &alice, "play bob").await, Flow::Continue);
        assert_eq!(alice_io.drain(), vec![server_notice("Player <bob> not found")]);
        assert_eq!(alice.status(), PlayerStatus::Available);
        assert!(state.broker.is_empty().await);
    }

    #[tokio::test]
    async fn test_accept_without_challenge() {
        let state = state();
        let (bob, mut bob_io) = login(&state, "bob").await;
        assert_eq!(handle_line(&state, &bob, "accept").await, Flow::Continue);
        assert_eq!(
            bob_io.drain(),
            vec![server_notice("You have no pending game request")]
        );
    }

    /// A full match driven through `accept`, ending with the challenger quitting.
    #[tokio::test]
    async fn test_accept_runs_match_to_completion() {
        let state = state();
        let (alice, mut alice_io) = login(&state, "alice").await;
        let (bob, mut bob_io) = login(&state, "bob").await;
        handle_line(&state, &alice, "play bob").await;

        alice_io.inbound.send("2".into()).await.unwrap();
        alice_io.inbound.send("quit".into()).await.unwrap();
        bob_io.inbound.send("1".into()).await.unwrap();

        assert_eq!(handle_line(&state, &bob, "accept").await, Flow::Continue);

        assert_eq!(alice.status(), PlayerStatus::Available);
        assert_eq!(bob.status(), PlayerStatus::Available);
        assert_eq!(alice.score().await, 1);
        assert!(state.sessions.is_empty().await);
        assert!(bob_io.drain().iter().any(|l| l.contains("<alice> left the game")));
    }

    #[tokio::test]
    async fn test_cleanup_announces_departure() {
        let state = state();
        let (alice, _alice_io) = login(&state, "alice").await;
        let (_bob, mut bob_io) = login(&state, "bob").await;
        handle_line(&state, &alice, "play bob").await;
        bob_io.drain();

        cleanup_client(&state, &alice).await;

        assert!(!state.registry.contains("alice"));
        assert!(state.broker.is_empty().await);
        assert!(alice.connection().is_closed());
        assert_eq!(bob_io.drain(), vec![server_notice("alice left the chatroom")]);
    }

    #[tokio::test]
    async fn test_run_client_exits_on_hangup() {
        let state = state();
        let (alice, alice_io) = login(&state, "alice").await;
        drop(alice_io);

        run_client(state.clone(), alice).await;
        assert!(state.registry.is_empty());
    }
}
