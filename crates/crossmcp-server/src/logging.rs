//! Logging initialization and per-session log levels.
//!
//! Stderr logging needs no guard; file logging buffers through
//! `tracing-appender` and the returned [`LoggingGuard`] must be held so
//! pending lines flush on exit.

use crate::config::{LogOutput, LoggingConfig};
use crossmcp_protocol::types::LogLevel;
use dashmap::DashMap;
use std::fmt;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

/// Guard flushing buffered file logs on drop.
#[derive(Debug)]
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

impl LoggingConfig {
    /// Initialize the global subscriber from this configuration.
    ///
    /// Returns `Some(LoggingGuard)` for file output (hold it), `None`
    /// otherwise.
    pub fn init(&self) -> io::Result<Option<LoggingGuard>> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.output {
            LogOutput::None => Ok(None),
            LogOutput::Stderr => {
                let subscriber = tracing_subscriber::registry().with(filter);
                if self.structured {
                    subscriber
                        .with(tracing_fmt::layer().json().with_writer(io::stderr))
                        .try_init()
                        .map_err(|e| io::Error::other(e.to_string()))?;
                } else {
                    subscriber
                        .with(tracing_fmt::layer().with_writer(io::stderr))
                        .try_init()
                        .map_err(|e| io::Error::other(e.to_string()))?;
                }
                Ok(None)
            }
            LogOutput::File => {
                let dir = self.directory.as_ref().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "file logging requires a directory",
                    )
                })?;
                std::fs::create_dir_all(dir)?;
                let appender = tracing_appender::rolling::daily(dir, &self.file_prefix);
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                let subscriber = tracing_subscriber::registry().with(filter);
                if self.structured {
                    subscriber
                        .with(tracing_fmt::layer().json().with_writer(non_blocking))
                        .try_init()
                        .map_err(|e| io::Error::other(e.to_string()))?;
                } else {
                    subscriber
                        .with(tracing_fmt::layer().with_writer(non_blocking))
                        .try_init()
                        .map_err(|e| io::Error::other(e.to_string()))?;
                }
                Ok(Some(LoggingGuard { _file_guard: guard }))
            }
        }
    }
}

/// Per-session minimum log levels, adjusted by `logging/setLevel`.
#[derive(Default)]
pub struct SessionLogLevels {
    levels: DashMap<String, LogLevel>,
    default_level: LogLevel,
}

impl fmt::Debug for SessionLogLevels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLogLevels")
            .field("sessions", &self.levels.len())
            .finish()
    }
}

impl SessionLogLevels {
    /// Tracker with `info` as the default minimum.
    pub fn new() -> Self {
        Self {
            levels: DashMap::new(),
            default_level: LogLevel::Info,
        }
    }

    /// Set a session's minimum level.
    pub fn set(&self, session_id: impl Into<String>, level: LogLevel) {
        self.levels.insert(session_id.into(), level);
    }

    /// The session's minimum level.
    pub fn get(&self, session_id: &str) -> LogLevel {
        self.levels
            .get(session_id)
            .map(|l| *l)
            .unwrap_or(self.default_level)
    }

    /// Whether a message at `level` should reach the session.
    pub fn should_emit(&self, session_id: &str, level: LogLevel) -> bool {
        level >= self.get(session_id)
    }

    /// Drop a destroyed session's override.
    pub fn remove(&self, session_id: &str) {
        self.levels.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_level_is_info() {
        let levels = SessionLogLevels::new();
        assert!(levels.should_emit("s1", LogLevel::Info));
        assert!(levels.should_emit("s1", LogLevel::Error));
        assert!(!levels.should_emit("s1", LogLevel::Debug));
    }

    #[test]
    fn set_level_changes_one_session_only() {
        let levels = SessionLogLevels::new();
        levels.set("s1", LogLevel::Debug);
        assert!(levels.should_emit("s1", LogLevel::Debug));
        assert!(!levels.should_emit("s2", LogLevel::Debug));

        levels.set("s1", LogLevel::Critical);
        assert!(!levels.should_emit("s1", LogLevel::Error));
        assert!(levels.should_emit("s1", LogLevel::Alert));
    }

    #[test]
    fn remove_restores_default() {
        let levels = SessionLogLevels::new();
        levels.set("s1", LogLevel::Emergency);
        levels.remove("s1");
        assert!(levels.should_emit("s1", LogLevel::Info));
    }
}
