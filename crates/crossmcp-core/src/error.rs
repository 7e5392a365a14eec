//! Core error types.

use crate::provider::ProviderError;
use serde_json::Value;

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the container, registries, and executors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Provider container failure
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Registry protocol failure
    #[error("registry error: {message}")]
    Registry {
        /// Failure description
        message: String,
    },

    /// A named record was not found
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Record kind, e.g. `tool`
        kind: &'static str,
        /// Name that was looked up
        name: String,
    },

    /// A tool executor or hook failed
    #[error("execution failed: {message}")]
    Execution {
        /// Failure description
        message: String,
        /// Structured data for the error result
        data: Option<Value>,
    },

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Registry failure.
    pub fn registry(message: impl Into<String>) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    /// Missing record.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Execution failure.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            data: None,
        }
    }

    /// Execution failure with structured data.
    pub fn execution_with_data(message: impl Into<String>, data: Value) -> Self {
        Self::Execution {
            message: message.into(),
            data: Some(data),
        }
    }
}
