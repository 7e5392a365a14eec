//! First-class control-flow signals.
//!
//! Hooks and stages steer a flow by returning one of these instead of an
//! error: `Respond` short-circuits with a value, `Abort` fails the
//! request with a public code, `RetryAfter` asks the transport to have
//! the client come back later. Signals travel the error channel but are
//! never logged as failures.

use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// A control-flow signal raised inside a flow.
#[derive(Debug, Clone)]
pub enum ControlSignal {
    /// Set the output and skip to the post/finalize stages
    Respond(Value),
    /// Fail the request with a public error code
    Abort {
        /// Stable machine-readable code, e.g. `INVALID_INPUT`
        code: String,
        /// Human-readable message, safe to echo
        message: String,
        /// HTTP status hint
        status: Option<u16>,
        /// Structured data attached to the JSON-RPC error/result
        data: Option<Value>,
    },
    /// Surface a retry hint to the transport
    RetryAfter {
        /// Suggested backoff before retrying
        backoff: Duration,
        /// What triggered the retry
        cause: String,
    },
}

impl ControlSignal {
    /// Respond with a value.
    pub fn respond(value: Value) -> Self {
        Self::Respond(value)
    }

    /// Abort with a code and message.
    pub fn abort(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Abort {
            code: code.into(),
            message: message.into(),
            status: None,
            data: None,
        }
    }

    /// Abort with an HTTP status hint.
    pub fn abort_with_status(
        code: impl Into<String>,
        message: impl Into<String>,
        status: u16,
    ) -> Self {
        Self::Abort {
            code: code.into(),
            message: message.into(),
            status: Some(status),
            data: None,
        }
    }

    /// Attach structured data to an abort.
    pub fn with_data(mut self, value: Value) -> Self {
        if let Self::Abort { data, .. } = &mut self {
            *data = Some(value);
        }
        self
    }

    /// Retry hint.
    pub fn retry_after(backoff: Duration, cause: impl Into<String>) -> Self {
        Self::RetryAfter {
            backoff,
            cause: cause.into(),
        }
    }

    /// The abort code, when this is an abort.
    pub fn abort_code(&self) -> Option<&str> {
        match self {
            Self::Abort { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Respond(_) => write!(f, "respond"),
            Self::Abort { code, message, .. } => write!(f, "abort {code}: {message}"),
            Self::RetryAfter { backoff, cause } => {
                write!(f, "retry after {}ms: {cause}", backoff.as_millis())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn abort_carries_code_status_and_data() {
        let signal = ControlSignal::abort_with_status("TOOL_NOT_ACTIVATED", "guard refused", 403)
            .with_data(json!({"tool": "x"}));
        match signal {
            ControlSignal::Abort {
                code,
                status,
                data,
                ..
            } => {
                assert_eq!(code, "TOOL_NOT_ACTIVATED");
                assert_eq!(status, Some(403));
                assert_eq!(data.unwrap()["tool"], "x");
            }
            _ => panic!("expected abort"),
        }
    }

    #[test]
    fn with_data_ignores_non_abort() {
        let signal = ControlSignal::respond(json!(1)).with_data(json!(2));
        assert!(matches!(signal, ControlSignal::Respond(v) if v == json!(1)));
    }
}
