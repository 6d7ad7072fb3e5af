//! Rock-Paper-Scissors game sessions.
//!
//! A [`GameSession`] is one match between exactly two players. It is driven
//! by [`GameSession::run`] on the worker of the player who accepted the
//! challenge, and moves through these phases:
//!
//! ```text
//! Idle ──► RoundActive ──► RoundResolved ──► RoundActive ...
//!               │
//!               └──────────► Terminal   (quit, exit, hangup, send failure, shutdown)
//! ```
//!
//! # Rounds
//!
//! Every round spawns one move collector per player. A collector waits for
//! lines from its player until it sees a move or a control token:
//!
//! - `1`/`2`/`3`: store the move and return
//! - `exit`: forfeit; the opponent wins, the round is terminated, and the
//!   forfeiting player is held (polling) until the opponent's collector has
//!   returned too
//! - `quit`: terminate the match
//! - `close` or a closed socket: terminate the match (and, for `close`, hang
//!   up once the match is torn down)
//! - anything else: ask again
//!
//! Both collectors are joined before the round is resolved. Termination is a
//! [`CancellationToken`], so a collector blocked on a silent player is
//! released as soon as the other side ends the match.

use crate::connection::{Identified, Sender};
use crate::player::Player;
use crate::sessions::SessionId;
use api::{Choice, MOVE_MENU, MoveInput, WELCOME_BACK, server_notice};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Players per match.
pub const MAX_PLAYERS: usize = 2;

const WAITING_FOR_OPPONENT: &str = "Waiting for your opponent to exit the game...";
const INVALID_CHOICE: &str = "Please enter a valid choice!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Roster being assembled.
    Idle,
    /// Both move collectors running.
    RoundActive,
    /// Winner computed and announced.
    RoundResolved,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Tie,
    FirstWins,
    SecondWins,
}

/// Decide a round between two moves.
pub fn resolve(first: Choice, second: Choice) -> RoundOutcome {
    if first == second {
        RoundOutcome::Tie
    } else if first.beats(second) {
        RoundOutcome::FirstWins
    } else {
        RoundOutcome::SecondWins
    }
}

/// Why a match ended. The first recorded cause wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEnd {
    Quit { by: String },
    Forfeit { by: String, winner: String },
    Hangup { by: String },
    TransportError { with: String },
    Shutdown,
    /// A move collector panicked.
    Aborted,
}

#[derive(Debug, Clone)]
pub struct GameSettings {
    /// How often a forfeiting player checks whether the opponent has left the round.
    pub forfeit_poll_interval: Duration,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            forfeit_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Result of a finished match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSummary {
    pub id: SessionId,
    /// Rounds that were resolved (ties included).
    pub rounds: u32,
    /// Cumulative score of each player when the match ended, in roster order.
    pub scores: Vec<(String, u32)>,
    pub end: MatchEnd,
}

/// How a move collector left its round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectorExit {
    Chose(Choice),
    Forfeited,
    Quit,
    Hangup,
    /// The match was terminated by the other side.
    Cancelled,
}

/// Which collectors of the current round have returned or are forfeiting.
#[derive(Default)]
struct RoundBarrier {
    done: [AtomicBool; MAX_PLAYERS],
    forfeiting: [AtomicBool; MAX_PLAYERS],
}

impl RoundBarrier {
    fn finish(&self, seat: usize) {
        self.done[seat].store(true, Ordering::Release);
    }

    fn is_done(&self, seat: usize) -> bool {
        self.done[seat].load(Ordering::Acquire)
    }

    fn start_forfeit(&self, seat: usize) {
        self.forfeiting[seat].store(true, Ordering::Release);
    }

    /// A forfeiting seat waits on the other one, so two of them must not
    /// wait on each other.
    fn is_released(&self, seat: usize) -> bool {
        self.is_done(seat) || self.forfeiting[seat].load(Ordering::Acquire)
    }
}

pub struct GameSession {
    id: SessionId,
    roster: RwLock<Vec<Arc<Player>>>,
    phase: Mutex<SessionPhase>,
    terminated: CancellationToken,
    end: Mutex<Option<MatchEnd>>,
    rounds: AtomicU32,
    settings: GameSettings,
}

impl GameSession {
    pub fn new(id: SessionId, settings: GameSettings) -> Self {
        Self {
            id,
            roster: RwLock::new(Vec::with_capacity(MAX_PLAYERS)),
            phase: Mutex::new(SessionPhase::Idle),
            terminated: CancellationToken::new(),
            end: Mutex::new(None),
            rounds: AtomicU32::new(0),
            settings,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Add a player to the roster.
    ///
    /// # Panics
    ///
    /// Panics if the roster is already full. Matches are only ever built from
    /// one accepted request, so a third player is a bug, not a user error.
    pub async fn add_player(&self, player: Arc<Player>) {
        let mut roster = self.roster.write().await;
        assert!(
            roster.len() < MAX_PLAYERS,
            "game session {} already has {} players",
            self.id,
            roster.len()
        );
        roster.push(player);
    }

    pub async fn participants(&self) -> Vec<String> {
        self.roster
            .read()
            .await
            .iter()
            .map(|p| p.username().to_string())
            .collect()
    }

    pub async fn has_player(&self, username: &str) -> bool {
        self.roster.read().await.iter().any(|p| p.username() == username)
    }

    pub async fn phase(&self) -> SessionPhase {
        *self.phase.lock().await
    }

    pub fn rounds(&self) -> u32 {
        self.rounds.load(Ordering::Relaxed)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_cancelled()
    }

    /// End the match. Only the first cause is kept.
    pub async fn terminate(&self, end: MatchEnd) {
        {
            let mut slot = self.end.lock().await;
            if slot.is_none() {
                debug!(target: "game", session = self.id, ?end, "terminating session");
                *slot = Some(end);
            }
        }
        self.terminated.cancel();
    }

    async fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock().await = phase;
    }

    /// Send a notice to a participant. A failed send ends the match.
    async fn notify(&self, player: &Player, text: &str) {
        if let Err(e) = player.send_line(&server_notice(text)) {
            warn!(
                target: "game",
                session = self.id,
                username = player.username(),
                "send to participant failed: {e}"
            );
            self.terminate(MatchEnd::TransportError {
                with: player.username().to_string(),
            })
            .await;
        }
    }

    /// Run rounds until the match terminates.
    ///
    /// # Panics
    ///
    /// Panics if the roster does not hold exactly two players.
    pub async fn run(self: &Arc<Self>) -> MatchSummary {
        let (first, second) = {
            let roster = self.roster.read().await;
            assert_eq!(
                roster.len(),
                MAX_PLAYERS,
                "game session {} started with {} players",
                self.id,
                roster.len()
            );
            (roster[0].clone(), roster[1].clone())
        };

        info!(
            target: "game",
            session = self.id,
            "game started {} VS {}",
            first.username(),
            second.username()
        );
        self.notify(&first, &format!("You are playing against <{}>", second.username()))
            .await;
        self.notify(&second, &format!("You are playing against <{}>", first.username()))
            .await;

        let mut exits: [Option<CollectorExit>; MAX_PLAYERS] = [None, None];
        while !self.terminated.is_cancelled() {
            self.set_phase(SessionPhase::RoundActive).await;
            self.notify(&first, MOVE_MENU).await;
            self.notify(&second, MOVE_MENU).await;

            let barrier = Arc::new(RoundBarrier::default());
            let first_handler = tokio::spawn(self.clone().collect_move(
                0,
                first.clone(),
                second.clone(),
                barrier.clone(),
            ));
            let second_handler = tokio::spawn(self.clone().collect_move(
                1,
                second.clone(),
                first.clone(),
                barrier,
            ));
            let (first_exit, second_exit) = tokio::join!(first_handler, second_handler);

            exits = [first_exit.ok(), second_exit.ok()];
            debug!(target: "game", session = self.id, ?exits, "round handlers joined");
            if exits.iter().any(Option::is_none) {
                warn!(target: "game", session = self.id, "move collector panicked");
                self.terminate(MatchEnd::Aborted).await;
            }

            if self.terminated.is_cancelled() {
                first.reset_choice().await;
                second.reset_choice().await;
                break;
            }
            self.resolve_round(&first, &second).await;
        }
        self.set_phase(SessionPhase::Terminal).await;

        // Players who did not end the match themselves are sent back to chat here.
        for (player, exit) in [(&first, exits[0]), (&second, exits[1])] {
            if matches!(
                exit,
                None | Some(CollectorExit::Chose(_)) | Some(CollectorExit::Cancelled)
            ) {
                self.notify(player, WELCOME_BACK).await;
            }
        }

        let end = self.end.lock().await.clone().unwrap_or(MatchEnd::Aborted);
        let summary = MatchSummary {
            id: self.id,
            rounds: self.rounds(),
            scores: vec![
                (first.username().to_string(), first.score().await),
                (second.username().to_string(), second.score().await),
            ],
            end,
        };
        info!(target: "game", session = self.id, ?summary, "game over");
        summary
    }

    async fn collect_move(
        self: Arc<Self>,
        seat: usize,
        player: Arc<Player>,
        opponent: Arc<Player>,
        barrier: Arc<RoundBarrier>,
    ) -> CollectorExit {
        let exit = self.collect(seat, &player, &opponent, &barrier).await;
        barrier.finish(seat);
        exit
    }

    async fn collect(
        &self,
        seat: usize,
        player: &Player,
        opponent: &Player,
        barrier: &RoundBarrier,
    ) -> CollectorExit {
        loop {
            let line = tokio::select! {
                biased;
                _ = self.terminated.cancelled() => return CollectorExit::Cancelled,
                line = player.next_line() => line,
            };

            let Some(line) = line else {
                info!(
                    target: "game",
                    session = self.id,
                    username = player.username(),
                    "player disconnected mid-match"
                );
                self.leave(player, opponent, MatchEnd::Hangup {
                    by: player.username().to_string(),
                })
                .await;
                return CollectorExit::Hangup;
            };

            match MoveInput::parse(&line) {
                MoveInput::Move(choice) => {
                    player.set_choice(choice).await;
                    info!(
                        target: "game",
                        session = self.id,
                        "{} VS {} << {} chose {}",
                        player.username(),
                        opponent.username(),
                        player.username(),
                        choice
                    );
                    self.notify(
                        player,
                        &format!("You chose {choice}. Waiting for <{}>...", opponent.username()),
                    )
                    .await;
                    return CollectorExit::Chose(choice);
                }
                MoveInput::Exit => {
                    self.forfeit(seat, player, opponent, barrier).await;
                    return CollectorExit::Forfeited;
                }
                MoveInput::Quit => {
                    self.leave(player, opponent, MatchEnd::Quit {
                        by: player.username().to_string(),
                    })
                    .await;
                    self.notify(player, WELCOME_BACK).await;
                    return CollectorExit::Quit;
                }
                MoveInput::Close => {
                    player.request_hangup();
                    self.leave(player, opponent, MatchEnd::Hangup {
                        by: player.username().to_string(),
                    })
                    .await;
                    return CollectorExit::Hangup;
                }
                MoveInput::Invalid => {
                    if !self.terminated.is_cancelled() {
                        self.notify(player, INVALID_CHOICE).await;
                    }
                }
            }
        }
    }

    /// Terminate because `player` left, and tell the opponent.
    async fn leave(&self, player: &Player, opponent: &Player, end: MatchEnd) {
        info!(
            target: "game",
            session = self.id,
            username = player.username(),
            ?end,
            "player left the game"
        );
        self.terminate(end).await;
        self.notify(opponent, &format!("<{}> left the game", player.username()))
            .await;
    }

    /// `player` gave up: the opponent wins, and `player` waits for the
    /// opponent's collector to leave the round before returning to chat.
    async fn forfeit(&self, seat: usize, player: &Player, opponent: &Player, barrier: &RoundBarrier) {
        barrier.start_forfeit(seat);
        let by = player.username().to_string();
        let winner = opponent.username().to_string();
        info!(target: "game", session = self.id, "{by} forfeited, {winner} wins");

        self.terminate(MatchEnd::Forfeit {
            by: by.clone(),
            winner,
        })
        .await;
        self.notify(opponent, &format!("{by} quit the game. You win :)"))
            .await;

        let other = MAX_PLAYERS - 1 - seat;
        let mut ticker = tokio::time::interval(self.settings.forfeit_poll_interval);
        loop {
            ticker.tick().await;
            if barrier.is_released(other) {
                break;
            }
            if player.send_line(&server_notice(WAITING_FOR_OPPONENT)).is_err() {
                break;
            }
        }
        self.notify(player, WELCOME_BACK).await;
    }

    async fn resolve_round(&self, first: &Player, second: &Player) {
        let (Some(first_choice), Some(second_choice)) = (first.choice().await, second.choice().await)
        else {
            warn!(target: "game", session = self.id, "round ended without two moves");
            first.reset_choice().await;
            second.reset_choice().await;
            return;
        };
        self.rounds.fetch_add(1, Ordering::Relaxed);

        match resolve(first_choice, second_choice) {
            RoundOutcome::Tie => {
                info!(
                    target: "game",
                    session = self.id,
                    "{} VS {} << It's a tie!",
                    first.username(),
                    second.username()
                );
                let text = format!("It's a tie! ({first_choice} vs {second_choice})");
                self.notify(first, &text).await;
                self.notify(second, &text).await;
            }
            RoundOutcome::FirstWins => {
                self.award(first, second, first_choice, second_choice).await;
            }
            RoundOutcome::SecondWins => {
                self.award(second, first, second_choice, first_choice).await;
            }
        }

        let score = format!(
            "Score: {} {} - {} {}",
            first.username(),
            first.score().await,
            second.score().await,
            second.username()
        );
        self.notify(first, &score).await;
        self.notify(second, &score).await;

        first.reset_choice().await;
        second.reset_choice().await;
        self.set_phase(SessionPhase::RoundResolved).await;
    }

    async fn award(&self, winner: &Player, loser: &Player, winning: Choice, losing: Choice) {
        winner.increment_score().await;
        info!(
            target: "game",
            session = self.id,
            "{} VS {} << {} won!!",
            winner.username(),
            loser.username(),
            winner.username()
        );
        self.notify(winner, &format!("You win!! {winning} beats {losing}"))
            .await;
        self.notify(
            loser,
            &format!("You lost :(( {} wins! {winning} beats {losing}", winner.username()),
        )
        .await;
    }
}
