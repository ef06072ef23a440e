//! Configuration module
//!
//! TOML-backed settings with sane defaults for every key, so a missing or
//! partial config file still yields a runnable server. Default location is
//! `~/.config/chargelink/config.toml`, overridable via `CHARGELINK_CONFIG`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionTuning,
    pub logging: LoggingConfig,
}

/// WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Forward every inbound frame to all other connected sessions.
    pub relay_enabled: bool,
    /// Grace period for shutdown cleanup, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            relay_enabled: false,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Protocol timing knobs shared by all sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTuning {
    /// Per-call response deadline, in seconds.
    pub call_timeout_secs: u64,
    /// Close a session after this much inbound silence, in seconds.
    pub idle_timeout_secs: u64,
    /// Heartbeat interval assigned to charge points at boot, in seconds.
    pub heartbeat_interval_secs: u32,
}

impl SessionTuning {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            // Three missed heartbeats at the default interval
            idle_timeout_secs: 180,
            heartbeat_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

/// Default config file location: `~/.config/chargelink/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chargelink")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable() {
        let config = AppConfig::default();
        assert_eq!(config.server.address(), "0.0.0.0:9000");
        assert!(!config.server.relay_enabled);
        assert_eq!(config.session.call_timeout(), Duration::from_secs(30));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_toml_keeps_defaults_for_the_rest() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9901
            relay_enabled = true

            [session]
            call_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9901);
        assert!(config.server.relay_enabled);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.session.call_timeout_secs, 5);
        assert_eq!(config.session.heartbeat_interval_secs, 60);
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 9000);
    }
}
