//! Operator console.
//!
//! Reads commands from the server's stdin:
//!
//! | command            | effect                                      |
//! |--------------------|---------------------------------------------|
//! | `list`             | print registered players and their status   |
//! | `games`            | print running matches                       |
//! | `say <text>`       | post a server notice to the lobby           |
//! | `broadcast <text>` | same as `say`                               |
//! | `kick <name>`      | disconnect a player                         |
//! | `shutdown` / `0`   | stop the server                             |
//! | `help`             | print this list                             |
//!
//! End of input stops the console but leaves the server running.

use crate::connection::Identified;
use crate::server::Server;
use crate::state::ServerState;
use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const CONSOLE_HELP: &str = "commands: list | games | say <text> | kick <name> | shutdown (or 0) | help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    List,
    Games,
    Broadcast(String),
    Kick(String),
    Shutdown,
    Help,
    Unknown(String),
}

impl AdminCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        Some(match (head, rest) {
            ("list", "") => Self::List,
            ("games", "") => Self::Games,
            ("say" | "broadcast", text) if !text.is_empty() => Self::Broadcast(text.to_string()),
            ("kick", name) if !name.is_empty() => Self::Kick(name.to_string()),
            ("shutdown" | "0", "") => Self::Shutdown,
            ("help", "") => Self::Help,
            _ => Self::Unknown(line.to_string()),
        })
    }
}

/// What the console loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleFlow {
    Continue,
    Stop,
}

/// Apply one command. Output lines are returned for the caller to print.
pub async fn apply(state: &ServerState, command: AdminCommand) -> (ConsoleFlow, Vec<String>) {
    let mut out = Vec::new();
    match command {
        AdminCommand::List => {
            let mut players = state.registry.snapshot();
            players.sort_by(|a, b| a.username().cmp(b.username()));
            if players.is_empty() {
                out.push("no players connected".to_string());
            }
            for player in players {
                out.push(format!(
                    "{} ({}) {:?} score={}",
                    player.username(),
                    player.connection().remote_addr(),
                    player.status(),
                    player.score().await
                ));
            }
        }
        AdminCommand::Games => {
            let sessions = state.sessions.snapshot().await;
            if sessions.is_empty() {
                out.push("no matches running".to_string());
            }
            for session in sessions {
                out.push(format!(
                    "#{} {} rounds={} {:?}",
                    session.id(),
                    session.participants().await.join(" VS "),
                    session.rounds(),
                    session.phase().await
                ));
            }
        }
        AdminCommand::Broadcast(text) => {
            let delivered = state.router().announce(&text, None).await;
            out.push(format!("sent to {delivered} player(s)"));
        }
        AdminCommand::Kick(name) => {
            if state
                .registry
                .disconnect(&name, "You have been disconnected by the operator")
            {
                info!(username = %name, "kicked by operator");
                out.push(format!("kicked {name}"));
            } else {
                out.push(format!("no player named {name}"));
            }
        }
        AdminCommand::Shutdown => {
            state.shutdown().await;
            out.push("shutting down".to_string());
            return (ConsoleFlow::Stop, out);
        }
        AdminCommand::Help => out.push(CONSOLE_HELP.to_string()),
        AdminCommand::Unknown(line) => out.push(format!("unknown command: {line} ({CONSOLE_HELP})")),
    }
    (ConsoleFlow::Continue, out)
}

/// Read operator commands from stdin until EOF or `shutdown`.
pub async fn run_console(server: Arc<Server>) -> Result<()> {
    let state = server.state().clone();
    let shutdown = state.shutdown_token();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            warn!("console input closed; operator commands disabled");
            break;
        };
        let Some(command) = AdminCommand::parse(&line) else {
            continue;
        };

        let (flow, out) = apply(&state, command).await;
        for line in out {
            println!("{line}");
        }
        if flow == ConsoleFlow::Stop {
            break;
        }
    }
    Ok(())
}
