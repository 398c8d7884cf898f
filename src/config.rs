//! Configuration module for the echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "echo-chamber")]
#[command(author = "echo-chamber authors")]
#[command(version = "0.1.0")]
#[command(about = "A framed-message TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:5555)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of concurrent connections
    #[arg(short = 'n', long)]
    pub max_connections: Option<usize>,

    /// Maximum message unit size in bytes
    #[arg(short = 'm', long)]
    pub max_unit_size: Option<usize>,

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
    pub channel: ChannelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
        }
    }
}

/// Channel-related configuration
#[derive(Debug, Deserialize)]
pub struct ChannelConfig {
    /// Maximum message unit size in bytes
    #[serde(default = "default_max_unit_size")]
    pub max_unit_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_unit_size: default_max_unit_size(),
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
    "127.0.0.1:5555".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_unit_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub max_connections: usize,
    pub max_unit_size: usize,
    pub log_level: String,
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

        // Merge CLI args with TOML config (CLI takes precedence)
        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            max_unit_size: cli
                .max_unit_size
                .unwrap_or(toml_config.channel.max_unit_size),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
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
