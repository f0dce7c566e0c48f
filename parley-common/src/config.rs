//! Configuration management for Parley services.
//!
//! Configuration lives in a single file at `~/.parley/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Explicit config file values
//! 2. Environment variables (PARLEY_* prefix)
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `PARLEY_BIND` → server.bind
//! - `PARLEY_PORT` → server.port
//! - `PARLEY_DATA_DIR` → data.dir
//! - `PARLEY_MAX_CACHED_USERS` → data.max_cached_users
//! - `PARLEY_LOG_LEVEL` → observability.log_level
//! - `PARLEY_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".parley"),
        |dirs| dirs.home_dir().join(".parley"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address. Default: "127.0.0.1" (local only).
    /// Set to "0.0.0.0" for remote access.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port number
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    4480
}

/// Durable data configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Data directory. Defaults to the config directory (`~/.parley`).
    #[serde(default)]
    pub dir: Option<String>,

    /// Maximum number of users whose logs and engine sessions are
    /// held open at once.
    #[serde(default = "default_max_cached_users")]
    pub max_cached_users: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_cached_users: default_max_cached_users(),
        }
    }
}

fn default_max_cached_users() -> usize {
    1000
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

/// Root configuration for Parley services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Durable data settings
    #[serde(default)]
    pub data: DataConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("PARLEY_BIND") {
            self.server.bind = bind;
        }
        if let Ok(port) = std::env::var("PARLEY_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(dir) = std::env::var("PARLEY_DATA_DIR") {
            self.data.dir = Some(dir);
        }
        if let Ok(max) = std::env::var("PARLEY_MAX_CACHED_USERS") {
            if let Ok(m) = max.parse() {
                self.data.max_cached_users = m;
            }
        }
        if let Ok(level) = std::env::var("PARLEY_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("PARLEY_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Get the effective data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data
            .dir
            .as_ref()
            .map_or_else(config_dir, PathBuf::from)
    }
}
