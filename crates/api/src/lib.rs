//! Parlor wire protocol definitions.
//!
//! The protocol is newline-delimited UTF-8 text over a plain TCP stream.
//! This crate provides the framing helpers used on both sides of the socket,
//! the parsers for the tokens a client may send, and the formatting helpers
//! for lines the server sends back.
//!
//! Server-to-client lines come in three shapes:
//! - `Server << ...` for system notices ([`server_notice`])
//! - `<username> << ...` for chat ([`chat_line`])
//! - the bare [`CLOSE_SIGNAL`] asking the client to hang up

use bytes::{Buf, BytesMut};
use std::fmt;
use thiserror::Error;

/// Default TCP port for the chat server.
pub const DEFAULT_PORT: u16 = 12345;

/// Upper bound on a single line, delimiter excluded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// Prefix used for every system notice.
pub const SERVER_PREFIX: &str = "Server";

/// Separator between the speaker and the text of a line.
pub const SPEAKER_SEPARATOR: &str = " << ";

/// Bare line sent by the server right before it closes a connection.
pub const CLOSE_SIGNAL: &str = "close";

/// Prompt sent when the server asks for a username.
pub const USERNAME_PROMPT: &str = "Enter your username:";

/// Menu sent to both players at the start of every round.
pub const MOVE_MENU: &str = "Make your choice...\n1- Rock\n2- Paper\n3- Scissors";

/// Notice sent to a player whose match has ended.
pub const WELCOME_BACK: &str = "Welcome back to the chat :)";

/// Short command reference sent after a successful login.
pub const HELP_TEXT: &str =
    "Commands: play <username> | accept | close. In a match: 1/2/3 to play, exit to forfeit, quit to leave.";

// =============================================================================
// Framing
// =============================================================================

/// Errors produced while splitting a byte stream into lines.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("line exceeds {limit} bytes without a delimiter")]
    LineTooLong { limit: usize },
}

/// Encode a single line for the wire, appending the `\n` delimiter.
pub fn encode_line(line: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    buf
}

/// Attempt to take a single line from the buffer.
///
/// Returns `Ok(Some(line))` when a full line is available, leaving any
/// remaining bytes in `src`. Returns `Ok(None)` if the delimiter has not
/// arrived yet. A trailing `\r` is stripped and invalid UTF-8 is replaced.
pub fn try_decode_line(src: &mut BytesMut, max_len: usize) -> Result<Option<String>, FrameError> {
    let Some(pos) = src.iter().position(|b| *b == b'\n') else {
        if src.len() > max_len {
            return Err(FrameError::LineTooLong { limit: max_len });
        }
        return Ok(None);
    };
    if pos > max_len {
        return Err(FrameError::LineTooLong { limit: max_len });
    }

    let mut line = src.split_to(pos);
    src.advance(1);
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

// =============================================================================
// Server lines
// =============================================================================

/// Format a system notice: `Server << {text}`.
pub fn server_notice(text: impl fmt::Display) -> String {
    format!("{SERVER_PREFIX}{SPEAKER_SEPARATOR}{text}")
}

/// Format a chat line: `{username} << {text}`.
pub fn chat_line(username: &str, text: &str) -> String {
    format!("{username}{SPEAKER_SEPARATOR}{text}")
}

/// Split a received line into speaker and text, if it has that shape.
pub fn split_speaker(line: &str) -> Option<(&str, &str)> {
    line.split_once(SPEAKER_SEPARATOR)
}

// =============================================================================
// Client commands
// =============================================================================

/// A line sent by a client while in the general chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// `close`: leave the chat room.
    Close,
    /// `play <username>`: challenge another user.
    Play { opponent: String },
    /// `accept`: accept the oldest pending challenge.
    Accept,
    /// Anything else is chat.
    Chat(String),
    /// Blank line.
    Empty,
}

impl ClientCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let mut words = line.split_whitespace();
        match words.next() {
            Some("close") if words.next().is_none() => Self::Close,
            Some("play") => Self::Play {
                opponent: words.next().unwrap_or_default().to_string(),
            },
            Some(first) if first.starts_with("accept") => Self::Accept,
            _ => Self::Chat(line.to_string()),
        }
    }
}

/// One of the three moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Choice {
    Rock = 1,
    Paper = 2,
    Scissors = 3,
}

impl Choice {
    pub const ALL: [Choice; 3] = [Choice::Rock, Choice::Paper, Choice::Scissors];

    /// Map a menu token (`1`, `2`, `3`) to a move.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "1" => Some(Self::Rock),
            "2" => Some(Self::Paper),
            "3" => Some(Self::Scissors),
            _ => None,
        }
    }

    /// Rock beats scissors, scissors beats paper, paper beats rock.
    pub fn beats(self, other: Choice) -> bool {
        matches!(
            (self, other),
            (Self::Rock, Self::Scissors) | (Self::Scissors, Self::Paper) | (Self::Paper, Self::Rock)
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rock => "Rock",
            Self::Paper => "Paper",
            Self::Scissors => "Scissors",
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A line sent by a player while inside a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveInput {
    Move(Choice),
    /// Forfeit the match.
    Exit,
    /// Leave the match without declaring a winner.
    Quit,
    /// Leave the match and the chat room.
    Close,
    Invalid,
}

impl MoveInput {
    pub fn parse(line: &str) -> Self {
        let token = line.trim();
        if let Some(choice) = Choice::from_token(token) {
            return Self::Move(choice);
        }
        match token {
            "exit" => Self::Exit,
            "quit" => Self::Quit,
            "close" => Self::Close,
            _ => Self::Invalid,
        }
    }
}
