//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use std::path::Path;

use efs_config::{AppConfig, Framing};

/// Fluent builder for [`AppConfig`] in tests.
///
/// Defaults differ from production in one place: the reconnect delay is
/// short so that reconnect tests finish quickly.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .daemon_socket(daemon.socket_path())
///     .sequence_numbers(false)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.daemon.reconnect_delay_ms = 20;
        Self { config }
    }

    pub fn daemon_socket(mut self, path: impl AsRef<Path>) -> Self {
        self.config.daemon.socket_path = path.as_ref().display().to_string();
        self
    }

    pub fn command_prefix(mut self, prefix: &str) -> Self {
        self.config.daemon.command_prefix = prefix.to_string();
        self
    }

    pub fn framing(mut self, framing: Framing) -> Self {
        self.config.daemon.framing = framing;
        self
    }

    pub fn sequence_numbers(mut self, enabled: bool) -> Self {
        self.config.daemon.sequence_numbers = enabled;
        self
    }

    pub fn command_timeout_secs(mut self, secs: u64) -> Self {
        self.config.daemon.command_timeout_secs = secs;
        self
    }

    pub fn reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.daemon.reconnect_delay_ms = ms;
        self
    }

    pub fn service_socket(mut self, path: impl AsRef<Path>) -> Self {
        self.config.service.socket_path = path.as_ref().display().to_string();
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
