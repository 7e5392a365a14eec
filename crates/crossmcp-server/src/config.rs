//! Gateway configuration.
//!
//! Layered the usual way: built-in defaults, then an optional config
//! file, then environment variables prefixed `CROSSMCP_`. Durations are
//! carried as millisecond fields so the whole struct stays plain serde.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Elicitation TTL floor.
pub const ELICIT_TTL_MIN: Duration = Duration::from_secs(60);
/// Elicitation TTL ceiling.
pub const ELICIT_TTL_MAX: Duration = Duration::from_secs(24 * 60 * 60);

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name reported in `initialize`
    pub name: String,
    /// Server version reported in `initialize`
    pub version: String,
    /// Usage instructions surfaced to the model
    pub instructions: Option<String>,
    /// Stable id of this node, used in persisted session records
    pub node_id: String,
    /// Session lifecycle settings
    pub session: SessionConfig,
    /// Elicitation settings
    pub elicitation: ElicitationConfig,
    /// Output sanitizer bounds
    pub sanitize: SanitizeLimits,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "crossmcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
            node_id: format!("node-{}", Uuid::new_v4()),
            session: SessionConfig::default(),
            elicitation: ElicitationConfig::default(),
            sanitize: SanitizeLimits::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration: defaults, then `path` (if given), then
    /// `CROSSMCP_*` environment variables (`__` separates nesting).
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CROSSMCP")
                .separator("__")
                .try_parsing(true),
        );
        let loaded: Self = builder.build()?.try_deserialize()?;
        Ok(loaded)
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle TTL after which a session record may be reaped (ms)
    pub ttl_ms: u64,
    /// Budget for one session-store operation before degrading (ms)
    pub store_timeout_ms: u64,
    /// Graceful adapter shutdown window before force-close (ms)
    pub graceful_shutdown_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 30 * 60 * 1000,
            store_timeout_ms: 5_000,
            graceful_shutdown_ms: 5_000,
        }
    }
}

impl SessionConfig {
    /// Idle TTL.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Store operation budget.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Graceful shutdown window.
    pub fn graceful_shutdown(&self) -> Duration {
        Duration::from_millis(self.graceful_shutdown_ms)
    }
}

/// Elicitation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElicitationConfig {
    /// Default TTL for a pending elicit (ms)
    pub default_ttl_ms: u64,
}

impl Default for ElicitationConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 5 * 60 * 1000,
        }
    }
}

impl ElicitationConfig {
    /// Default TTL, already clamped to the allowed band.
    pub fn default_ttl(&self) -> Duration {
        clamp_elicit_ttl(Duration::from_millis(self.default_ttl_ms))
    }
}

/// Clamp a requested elicit TTL into `[60s, 24h]`.
pub fn clamp_elicit_ttl(requested: Duration) -> Duration {
    requested.clamp(ELICIT_TTL_MIN, ELICIT_TTL_MAX)
}

/// Output sanitizer bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizeLimits {
    /// Maximum nesting depth before replacement with `"[Circular]"`
    pub max_depth: usize,
    /// Maximum properties kept per object (or elements per array)
    pub max_properties: usize,
}

impl Default for SanitizeLimits {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_properties: 1024,
        }
    }
}

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// No logging
    None,
    /// Stderr only; no guard needed
    Stderr,
    /// Rolling file only; hold the returned guard
    File,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default env-filter directive, e.g. `info` or `crossmcp=debug`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub structured: bool,
    /// Output target
    pub output: LogOutput,
    /// Log directory (file output)
    pub directory: Option<String>,
    /// Log file prefix (file output)
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
            output: LogOutput::Stderr,
            directory: None,
            file_prefix: "crossmcp".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Minimal stderr logging at error level.
    pub fn stderr_minimal() -> Self {
        Self {
            level: "error".to_string(),
            ..Self::default()
        }
    }

    /// Verbose stderr logging for development.
    pub fn stderr_debug() -> Self {
        Self {
            level: "debug".to_string(),
            ..Self::default()
        }
    }

    /// Rolling-file logging into a directory.
    pub fn file(directory: impl Into<String>) -> Self {
        Self {
            output: LogOutput::File,
            directory: Some(directory.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.session.store_timeout(), Duration::from_secs(5));
        assert_eq!(config.session.graceful_shutdown(), Duration::from_secs(5));
        assert_eq!(config.elicitation.default_ttl(), Duration::from_secs(300));
        assert!(config.node_id.starts_with("node-"));
    }

    #[test]
    fn elicit_ttl_clamps_to_band() {
        assert_eq!(
            clamp_elicit_ttl(Duration::from_secs(1)),
            Duration::from_secs(60)
        );
        assert_eq!(
            clamp_elicit_ttl(Duration::from_secs(600)),
            Duration::from_secs(600)
        );
        assert_eq!(
            clamp_elicit_ttl(Duration::from_secs(48 * 60 * 60)),
            Duration::from_secs(24 * 60 * 60)
        );
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let config = ServerConfig::load(None).unwrap();
        assert_eq!(config.name, "crossmcp");
    }
}
