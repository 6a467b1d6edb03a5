//! Configuration module for the jsockd server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the IPC server
#[derive(Parser, Debug)]
#[command(name = "jsockd")]
#[command(version)]
#[command(about = "A line-delimited JSON IPC server over Unix domain sockets", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path of the Unix domain socket to listen on
    #[arg(short = 's', long)]
    pub socket: Option<PathBuf>,

    /// Maximum number of concurrently connected clients
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Maximum request size in bytes
    #[arg(long)]
    pub max_request: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Path of the Unix domain socket
    #[serde(default = "default_socket")]
    pub socket: PathBuf,
    /// Listen backlog for the socket
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            backlog: default_backlog(),
        }
    }
}

/// Per-connection and per-request limits
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrently connected clients
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Size of each read from a client socket in bytes
    #[serde(default = "default_read_buffer")]
    pub read_buffer: usize,
    /// Maximum size of a single request frame in bytes
    #[serde(default = "default_max_request")]
    pub max_request: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            read_buffer: default_read_buffer(),
            max_request: default_max_request(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_socket() -> PathBuf {
    PathBuf::from("/tmp/jsockd.sock")
}

fn default_backlog() -> i32 {
    128
}

fn default_max_connections() -> usize {
    1024
}

fn default_read_buffer() -> usize {
    4 * 1024
}

fn default_max_request() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub socket: PathBuf,
    pub backlog: i32,
    pub max_connections: usize,
    pub read_buffer: usize,
    pub max_request: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            read_buffer: default_read_buffer(),
            max_request: default_max_request(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            socket: cli.socket.unwrap_or(toml_config.server.socket),
            backlog: toml_config.server.backlog,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.limits.max_connections),
            read_buffer: toml_config.limits.read_buffer,
            max_request: cli.max_request.unwrap_or(toml_config.limits.max_request),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.socket, PathBuf::from("/tmp/jsockd.sock"));
        assert_eq!(config.backlog, 128);
        assert_eq!(config.max_connections, 1024);
        assert_eq!(config.max_request, 64 * 1024);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            socket = "/run/jsockd/ipc.sock"
            backlog = 16

            [limits]
            max_connections = 64
            max_request = 8192

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.socket, PathBuf::from("/run/jsockd/ipc.sock"));
        assert_eq!(config.server.backlog, 16);
        assert_eq!(config.limits.max_connections, 64);
        assert_eq!(config.limits.max_request, 8192);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let cli = CliArgs::try_parse_from([
            "jsockd",
            "--socket",
            "/tmp/override.sock",
            "--max-connections",
            "8",
        ])
        .unwrap();

        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            socket = "/tmp/from-file.sock"

            [limits]
            max_connections = 64

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let config = Config::merge(cli, toml_config);
        assert_eq!(config.socket, PathBuf::from("/tmp/override.sock"));
        assert_eq!(config.max_connections, 8);
        // Not set on the CLI, so the file value wins
        assert_eq!(config.log_level, "warn");
    }
}
