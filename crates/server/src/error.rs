//! Error taxonomy for the session and matchmaking engine.
//!
//! The `Display` text of each variant is what the client sees after the
//! `Server << ` prefix, so keep it user-facing.

use thiserror::Error;

/// Why a username could not be claimed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("Username is already taken")]
    Taken(String),
    #[error("Invalid username")]
    Invalid,
}

/// Why a `play <username>` challenge was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("Please enter a valid opponent's username")]
    SelfChallenge,
    #[error("Player is busy playing another match")]
    OpponentBusy(String),
    #[error("Player <{0}> not found")]
    OpponentNotFound(String),
    #[error("You are already playing a match")]
    AlreadyInMatch,
}

/// Why an `accept` did not start a match.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AcceptError {
    #[error("You have no pending game request")]
    NoPendingRequest,
    #[error("Player <{0}> is no longer connected")]
    OpponentGone(String),
    #[error("Player <{0}> is busy playing another match")]
    OpponentBusy(String),
    #[error("You are already playing a match")]
    AlreadyInMatch,
}

/// Socket-level failure while talking to a peer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity negotiation did not produce a player.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("peer disconnected during negotiation")]
    Disconnected,
    #[error("no valid username after {0} attempts")]
    AttemptsExhausted(u32),
}
