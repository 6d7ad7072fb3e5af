//! Server configuration management.
//!
//! This module handles loading configuration from:
//! 1. Default values
//! 2. TOML config file (parlor-server.toml)
//! 3. Environment variables (PARLOR_*)
//! 4. Command-line arguments (highest priority)
//!
//! Configuration options:
//! - `bind`: Socket address to bind to (IPv4/IPv6 with port)
//! - `log_level`: Logging level (trace, debug, info, warn, error)
//! - `name_attempts`: Username attempts before the connection is closed
//! - `forfeit_poll_interval_ms`: How often a forfeiting player re-checks the round
//! - `max_line_length`: Longest accepted input line in bytes

use crate::server::Config;
use crate::state::Settings;
use anyhow::{Context, Result, bail};
use api::{DEFAULT_MAX_LINE_LENGTH, DEFAULT_PORT};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{fs, net::SocketAddr, path::PathBuf, time::Duration};
use tracing::info;

/// Default configuration file content with comments.
pub const DEFAULT_CONFIG_CONTENT: &str = r#"# Parlor Server Configuration
# ============================
#
# All options can be overridden via environment variables (PARLOR_*)
# or command-line arguments.

# Socket address to bind to.
# If no port is specified, 12345 is used.
# Examples:
#   - "127.0.0.1:12345" - Localhost only (default)
#   - "0.0.0.0:12345"   - All IPv4 interfaces
#   - "[::]:12345"      - All interfaces, IPv6 and IPv4
bind = "127.0.0.1:12345"

# Logging level.
# Options: trace, debug, info, warn, error
log_level = "info"

# Username attempts before the connection is closed.
name_attempts = 3

# How often (milliseconds) a player who typed `exit` checks whether the
# opponent has left the round.
forfeit_poll_interval_ms = 1000

# Longest accepted input line, in bytes. Longer lines drop the connection.
max_line_length = 4096
"#;

/// Command-line arguments for the server.
#[derive(Parser, Debug, Default)]
#[command(name = "parlor-server")]
#[command(about = "Parlor chat server with Rock-Paper-Scissors matches", long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file.
    /// If the file doesn't exist, it will be created with default values.
    #[arg(short, long, default_value = "parlor-server.toml")]
    pub config: PathBuf,

    /// Socket address to bind to (overrides config file).
    /// Examples: "127.0.0.1:12345", "0.0.0.0:4000"
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Logging level (overrides config file).
    /// Options: trace, debug, info, warn, error
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Do not read operator commands from stdin.
    #[arg(long)]
    pub no_console: bool,
}

/// TOML configuration file structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_name_attempts")]
    pub name_attempts: u32,

    #[serde(default = "default_forfeit_poll_interval_ms")]
    pub forfeit_poll_interval_ms: u64,

    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

fn default_bind() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_name_attempts() -> u32 {
    3
}

fn default_forfeit_poll_interval_ms() -> u64 {
    1000
}

fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
            name_attempts: default_name_attempts(),
            forfeit_poll_interval_ms: default_forfeit_poll_interval_ms(),
            max_line_length: default_max_line_length(),
        }
    }
}

/// Resolved server configuration.
///
/// This is the final configuration after merging defaults, config file,
/// environment, and CLI args.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub log_level: String,
    pub name_attempts: u32,
    pub forfeit_poll_interval: Duration,
    pub max_line_length: usize,
    /// Whether to run the stdin operator console.
    pub console: bool,
}

impl ServerConfig {
    /// Load configuration from CLI args and config file.
    pub fn load() -> Result<Self> {
        let args = CliArgs::parse();
        Self::load_with_args(args)
    }

    /// Load configuration with the given CLI args.
    ///
    /// Priority (highest to lowest):
    /// 1. Command-line arguments
    /// 2. Environment variables (PARLOR_*)
    /// 3. Config file
    /// 4. Default values
    ///
    /// This is useful for testing.
    pub fn load_with_args(args: CliArgs) -> Result<Self> {
        let config_path = &args.config;

        // PARLOR_NO_CONFIG skips the config file entirely (for testing)
        let file_config = if std::env::var("PARLOR_NO_CONFIG").is_ok() {
            FileConfig::default()
        } else if config_path.exists() {
            let content = fs::read_to_string(config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            info!("Config file not found, creating default: {}", config_path.display());
            fs::write(config_path, DEFAULT_CONFIG_CONTENT).with_context(|| {
                format!("Failed to create config file: {}", config_path.display())
            })?;
            FileConfig::default()
        };

        let env_bind = std::env::var("PARLOR_BIND").ok().or_else(|| {
            std::env::var("PARLOR_PORT")
                .ok()
                .map(|p| format!("127.0.0.1:{p}"))
        });
        let env_log_level = std::env::var("PARLOR_LOG_LEVEL").ok();

        let bind_str = args.bind.or(env_bind).unwrap_or(file_config.bind);
        let log_level = args
            .log_level
            .or(env_log_level)
            .unwrap_or(file_config.log_level);
        let bind = parse_bind_address(&bind_str)?;

        if file_config.name_attempts == 0 {
            bail!("name_attempts must be at least 1");
        }
        if file_config.max_line_length == 0 {
            bail!("max_line_length must be at least 1");
        }

        Ok(Self {
            bind,
            log_level,
            name_attempts: file_config.name_attempts,
            forfeit_poll_interval: Duration::from_millis(file_config.forfeit_poll_interval_ms),
            max_line_length: file_config.max_line_length,
            console: !args.no_console,
        })
    }

    pub fn settings(&self) -> Settings {
        Settings {
            name_attempts: self.name_attempts,
            forfeit_poll_interval: self.forfeit_poll_interval,
            max_line_length: self.max_line_length,
        }
    }

    /// The listener configuration handed to [`crate::Server::bind`].
    pub fn server_config(&self) -> Config {
        Config {
            bind: self.bind,
            settings: self.settings(),
        }
    }
}

/// Parse a bind address string into a SocketAddr.
///
/// If no port is specified, 12345 is used.
fn parse_bind_address(s: &str) -> Result<SocketAddr> {
    if let Ok(addr) = s.parse() {
        return Ok(addr);
    }

    let with_port = if s.contains('[') && !s.contains("]:") {
        // IPv6 without port: [::] -> [::]:12345
        format!("{s}:{DEFAULT_PORT}")
    } else if !s.contains(':') {
        // IPv4 without port: 0.0.0.0 -> 0.0.0.0:12345
        format!("{s}:{DEFAULT_PORT}")
    } else {
        s.to_string()
    };

    with_port
        .parse()
        .with_context(|| format!("Invalid bind address: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bind_address() {
        assert_eq!(
            parse_bind_address("[::]:4000").unwrap(),
            "[::]:4000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_bind_address("0.0.0.0:8000").unwrap(),
            "0.0.0.0:8000".parse::<SocketAddr>().unwrap()
        );

        // Without port
        assert_eq!(
            parse_bind_address("[::]").unwrap(),
            "[::]:12345".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_bind_address("127.0.0.1").unwrap(),
            "127.0.0.1:12345".parse::<SocketAddr>().unwrap()
        );

        assert!(parse_bind_address("not an address").is_err());
    }

    #[test]
    fn test_default_config() {
        let config = FileConfig::default();
        assert_eq!(config.bind, "127.0.0.1:12345");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.name_attempts, 3);
        assert_eq!(config.forfeit_poll_interval_ms, 1000);
    }

    /// The commented default file parses to the same values as `FileConfig::default()`.
    #[test]
    fn test_default_content_matches_defaults() {
        let parsed: FileConfig = toml::from_str(DEFAULT_CONFIG_CONTENT).unwrap();
        assert_eq!(parsed, FileConfig::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: FileConfig = toml::from_str("name_attempts = 5\n").unwrap();
        assert_eq!(parsed.name_attempts, 5);
        assert_eq!(parsed.bind, default_bind());
    }

    #[test]
    fn test_missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parlor-server.toml");

        let config = ServerConfig::load_with_args(CliArgs {
            config: path.clone(),
            bind: Some("127.0.0.1:4000".into()),
            ..Default::default()
        })
        .unwrap();

        assert!(path.exists());
        assert_eq!(config.bind, "127.0.0.1:4000".parse::<SocketAddr>().unwrap());
        assert!(config.console);
    }

    #[test]
    fn test_file_values_flow_into_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(
            &path,
            "bind = \"127.0.0.1:4001\"\nforfeit_poll_interval_ms = 50\nmax_line_length = 128\n",
        )
        .unwrap();

        let config = ServerConfig::load_with_args(CliArgs {
            config: path,
            no_console: true,
            ..Default::default()
        })
        .unwrap();

        assert!(!config.console);
        let settings = config.settings();
        assert_eq!(settings.forfeit_poll_interval, Duration::from_millis(50));
        assert_eq!(settings.max_line_length, 128);
        assert_eq!(settings.name_attempts, 3);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "name_attempts = 0\n").unwrap();

        let err = ServerConfig::load_with_args(CliArgs {
            config: path,
            bind: Some("127.0.0.1:4002".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("name_attempts"));
    }
}
