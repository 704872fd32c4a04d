#![deny(unsafe_code)]

//! Configuration loading and validation for the EFS service connector.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] is the
//! central configuration structure shared by the connector, the service
//! front-end and the `efsctl` binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Connection to the native `efs-server` daemon.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Local service front-end.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How command and reply lines are delimited on the daemon socket.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Every line is terminated by a NUL byte (Android framework listener).
    #[default]
    Nul,
    /// Every line is terminated by `\n`.
    Newline,
}

impl Framing {
    /// The terminator byte for this framing.
    pub fn terminator(self) -> u8 {
        match self {
            Framing::Nul => b'\0',
            Framing::Newline => b'\n',
        }
    }
}

/// Configuration for the daemon connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Path of the daemon's Unix control socket.
    #[serde(default = "default_daemon_socket_path")]
    pub socket_path: String,

    /// First word of every command line.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Line framing used on the socket.
    #[serde(default)]
    pub framing: Framing,

    /// Prefix commands with a sequence number and correlate replies by it.
    #[serde(default = "default_true")]
    pub sequence_numbers: bool,

    /// Per-command reply timeout in seconds (0 = wait forever).
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Delay before the worker reconnects after losing the daemon.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Commands slower than this are logged at warn level.
    #[serde(default = "default_slow_command_warn_ms")]
    pub slow_command_warn_ms: u64,

    /// Capacity of the unsolicited event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_daemon_socket_path(),
            command_prefix: default_command_prefix(),
            framing: Framing::default(),
            sequence_numbers: true,
            command_timeout_secs: default_command_timeout_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            slow_command_warn_ms: default_slow_command_warn_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl DaemonConfig {
    /// Reply timeout, or `None` when commands may wait forever.
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn slow_command_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_command_warn_ms)
    }
}

fn default_daemon_socket_path() -> String {
    "/dev/socket/efs-server".to_string()
}

fn default_command_prefix() -> String {
    "efs-server".to_string()
}

fn default_true() -> bool {
    true
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_slow_command_warn_ms() -> u64 {
    500
}

fn default_event_buffer() -> usize {
    64
}

/// Configuration for the local service front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Unix socket the service listens on for client requests.
    #[serde(default = "default_service_socket_path")]
    pub socket_path: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: default_service_socket_path(),
        }
    }
}

fn default_service_socket_path() -> String {
    "/run/efs/efs-service.sock".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
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

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.socket_path.is_empty() {
            return Err(ConfigError::Validation(
                "daemon.socket_path must not be empty".to_string(),
            ));
        }
        if self.daemon.command_prefix.is_empty() {
            return Err(ConfigError::Validation(
                "daemon.command_prefix must not be empty".to_string(),
            ));
        }
        if self
            .daemon
            .command_prefix
            .contains(|c: char| c.is_whitespace() || c == '"' || c == '\\')
        {
            return Err(ConfigError::Validation(format!(
                "daemon.command_prefix must be a single word without quotes or backslashes, got {:?}",
                self.daemon.command_prefix
            )));
        }
        if self.daemon.reconnect_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "daemon.reconnect_delay_ms must be non-zero".to_string(),
            ));
        }
        if self.daemon.event_buffer == 0 {
            return Err(ConfigError::Validation(
                "daemon.event_buffer must be at least 1".to_string(),
            ));
        }
        if self.service.socket_path.is_empty() {
            return Err(ConfigError::Validation(
                "service.socket_path must not be empty".to_string(),
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.daemon.socket_path, "/dev/socket/efs-server");
        assert_eq!(config.daemon.command_prefix, "efs-server");
        assert_eq!(config.daemon.framing, Framing::Nul);
        assert!(config.daemon.sequence_numbers);
        assert_eq!(config.service.socket_path, "/run/efs/efs-service.sock");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.daemon.command_timeout_secs, 30);
        assert_eq!(config.daemon.event_buffer, 64);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [daemon]
            socket_path = "/tmp/efs.sock"
            command_prefix = "efs"
            framing = "newline"
            sequence_numbers = false
            command_timeout_secs = 0
            reconnect_delay_ms = 250
            slow_command_warn_ms = 100
            event_buffer = 8

            [service]
            socket_path = "/tmp/efs-service.sock"

            [logging]
            level = "debug"
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(config.daemon.socket_path, "/tmp/efs.sock");
        assert_eq!(config.daemon.command_prefix, "efs");
        assert_eq!(config.daemon.framing, Framing::Newline);
        assert!(!config.daemon.sequence_numbers);
        assert_eq!(config.daemon.command_timeout(), None);
        assert_eq!(config.daemon.reconnect_delay(), Duration::from_millis(250));
        assert_eq!(
            config.daemon.slow_command_threshold(),
            Duration::from_millis(100)
        );
        assert_eq!(config.daemon.event_buffer, 8);
        assert_eq!(config.service.socket_path, "/tmp/efs-service.sock");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_command_timeout_enabled() {
        let config = AppConfig::default();
        assert_eq!(
            config.daemon.command_timeout(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_framing_terminators() {
        assert_eq!(Framing::Nul.terminator(), 0);
        assert_eq!(Framing::Newline.terminator(), b'\n');
    }

    #[test]
    fn test_validation_rejects_unknown_framing() {
        let toml = r#"
            [daemon]
            framing = "crlf"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_empty_socket_path() {
        let toml = r#"
            [daemon]
            socket_path = ""
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_multi_word_prefix() {
        let toml = r#"
            [daemon]
            command_prefix = "efs server"
        "#;
        let err = AppConfig::parse(toml).unwrap_err();
        assert!(err.to_string().contains("single word"));
    }

    #[test]
    fn test_validation_rejects_quote_or_backslash_in_prefix() {
        for prefix in ["efs\"server", "efs\\server"] {
            let mut config = AppConfig::default();
            config.daemon.command_prefix = prefix.to_string();
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("single word"), "{prefix}");
        }
    }

    #[test]
    fn test_validation_rejects_zero_reconnect_delay() {
        let toml = r#"
            [daemon]
            reconnect_delay_ms = 0
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_event_buffer() {
        let toml = r#"
            [daemon]
            event_buffer = 0
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_empty_service_socket() {
        let toml = r#"
            [service]
            socket_path = ""
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_log_level() {
        let toml = r#"
            [logging]
            level = "loud"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("bad value".to_string());
        assert_eq!(err.to_string(), "validation error: bad value");
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = AppConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("command_prefix"));
        let parsed = AppConfig::parse(&text).unwrap();
        assert_eq!(parsed.daemon.socket_path, config.daemon.socket_path);
    }

    // ── Async file-based loading ──────────────────────────────────────

    #[tokio::test]
    async fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("efs.toml");
        tokio::fs::write(
            &path,
            b"[daemon]\nsocket_path = \"/tmp/x.sock\"\ncommand_timeout_secs = 5\n",
        )
        .await
        .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.daemon.socket_path, "/tmp/x.sock");
        assert_eq!(config.daemon.command_timeout_secs, 5);
    }

    #[tokio::test]
    async fn test_load_nonexistent_file() {
        let result = AppConfig::load(Path::new("/nonexistent/efs.toml")).await;
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[tokio::test]
    async fn test_load_invalid_toml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        tokio::fs::write(&path, b"not valid toml [[[").await.unwrap();

        let result = AppConfig::load(&path).await;
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
