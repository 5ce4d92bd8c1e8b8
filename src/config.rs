//! Configuration module for linkprobe.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::DEFAULT_PORT;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "linkprobe")]
#[command(author = "linkprobe authors")]
#[command(version = "0.1.0")]
#[command(about = "Measure latency and throughput between two endpoints", long_about = None)]
pub struct CliArgs {
    /// `server` to run the responder, otherwise the host to test against
    #[arg(default_value = "localhost")]
    pub target: String,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address the responder binds to (e.g., 0.0.0.0:5000)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Port the initiator connects to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bytes per transfer (e.g., 8388608 for 8 MiB)
    #[arg(short, long)]
    pub size: Option<u64>,

    /// Skip the latency probe
    #[arg(long)]
    pub no_latency: bool,

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
    pub transfer: TransferConfig,
    #[serde(default)]
    pub latency: LatencyConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Endpoint addressing
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address the responder binds to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Port the initiator connects to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent sessions on the responder
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Bulk transfer sizing
#[derive(Debug, Deserialize)]
pub struct TransferConfig {
    /// Bytes moved by each download and upload
    #[serde(default = "default_total_bytes")]
    pub total_bytes: u64,
    /// Bytes per send/receive call
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Largest upload the responder accepts
    #[serde(default = "default_max_transfer_bytes")]
    pub max_transfer_bytes: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            total_bytes: default_total_bytes(),
            chunk_size: default_chunk_size(),
            max_transfer_bytes: default_max_transfer_bytes(),
        }
    }
}

/// Latency probe schedule
#[derive(Debug, Deserialize)]
pub struct LatencyConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_samples")]
    pub samples: usize,
    /// Pause between probes in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            samples: default_samples(),
            interval_ms: default_interval_ms(),
        }
    }
}

/// Timeouts, all in milliseconds
#[derive(Debug, Deserialize)]
pub struct TimeoutConfig {
    /// Per read/write and per handshake step
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Upload progress ack and final `done`
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Per latency probe
    #[serde(default = "default_echo_timeout_ms")]
    pub echo_timeout_ms: u64,
    /// Responder wait for the next operation
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: default_io_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            echo_timeout_ms: default_echo_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
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

fn default_listen() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_sessions() -> usize {
    1024
}

fn default_total_bytes() -> u64 {
    8 * 1024 * 1024 // 8 MiB
}

fn default_chunk_size() -> usize {
    8192
}

fn default_max_transfer_bytes() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_enabled() -> bool {
    true
}

fn default_samples() -> usize {
    10
}

fn default_interval_ms() -> u64 {
    100
}

fn default_io_timeout_ms() -> u64 {
    10_000
}

fn default_ack_timeout_ms() -> u64 {
    10_000
}

fn default_echo_timeout_ms() -> u64 {
    2_000
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Which end of the connection this process plays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Accept connections and serve operations.
    Responder,
    /// Connect to `host` and run the operation sequence.
    Initiator { host: String },
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub listen: String,
    pub port: u16,
    pub max_sessions: usize,
    pub total_bytes: u64,
    pub chunk_size: usize,
    pub max_transfer_bytes: u64,
    pub latency_enabled: bool,
    pub latency_samples: usize,
    pub latency_interval: Duration,
    pub io_timeout: Duration,
    pub ack_timeout: Duration,
    pub echo_timeout: Duration,
    pub idle_timeout: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::merge(Role::Responder, TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let role = if cli.target == "server" {
            Role::Responder
        } else {
            Role::Initiator { host: cli.target }
        };

        let mut config = Config::merge(role, toml_config);

        // Merge CLI args (CLI takes precedence)
        if let Some(listen) = cli.listen {
            config.listen = listen;
        }
        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(size) = cli.size {
            config.total_bytes = size;
        }
        if cli.no_latency {
            config.latency_enabled = false;
        }
        if cli.log_level != "info" {
            config.log_level = cli.log_level;
        }

        config.validate()?;
        Ok(config)
    }

    fn merge(role: Role, file: TomlConfig) -> Self {
        Config {
            role,
            listen: file.server.listen,
            port: file.server.port,
            max_sessions: file.server.max_sessions,
            total_bytes: file.transfer.total_bytes,
            chunk_size: file.transfer.chunk_size,
            max_transfer_bytes: file.transfer.max_transfer_bytes,
            latency_enabled: file.latency.enabled,
            latency_samples: file.latency.samples,
            latency_interval: Duration::from_millis(file.latency.interval_ms),
            io_timeout: Duration::from_millis(file.timeouts.io_timeout_ms),
            ack_timeout: Duration::from_millis(file.timeouts.ack_timeout_ms),
            echo_timeout: Duration::from_millis(file.timeouts.echo_timeout_ms),
            idle_timeout: Duration::from_millis(file.timeouts.idle_timeout_ms),
            log_level: file.logging.level,
        }
    }

    /// Reject values the session controllers cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be greater than 0"));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions must be greater than 0"));
        }
        if self.latency_samples == 0 {
            return Err(ConfigError::Invalid("latency samples must be greater than 0"));
        }
        if self.total_bytes > self.max_transfer_bytes {
            return Err(ConfigError::Invalid(
                "total_bytes must not exceed max_transfer_bytes",
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
