//! # crossmcp-server
//!
//! The MCP gateway server: multiplexes many client sessions onto a
//! shared pool of tools, resources, prompts, and skills over
//! streamable-HTTP, SSE, stateless-HTTP, and in-process transports.
//!
//! - **Transport registry** - one live adapter per
//!   `(protocol, authHash, sessionId)` triple per node, creation
//!   serialized by a key-scoped mutex, cross-node recreation from a
//!   shared session store validated against the bearer's SHA-256.
//! - **Dispatch** - fixed method-to-flow routing with an ambient request
//!   context around every flow run.
//! - **Tool pipeline** - guard, provider binding, schema validation,
//!   cache, around-hooked execution, shaping, finalize-exactly-once.
//! - **Elicitation** - at most one pending elicit per session,
//!   TTL-bounded, cancellable, routable across nodes.
//!
//! ## Example
//!
//! ```no_run
//! use crossmcp_server::Gateway;
//! use crossmcp_core::tool::ToolRecord;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Gateway::builder()
//!     .name("my-gateway")
//!     .tool(ToolRecord::from_fn(
//!         "echo",
//!         json!({"type": "object", "properties": {"msg": {"type": "string"}}}),
//!         |input| async move { Ok(json!({ "echoed": input })) },
//!     ))
//!     .build()?;
//! gateway.start().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod dispatch;
pub mod elicit;
pub mod error;
pub mod flows;
pub mod invoke;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod shape;
pub mod shared;
pub mod transport;

pub use config::{ElicitationConfig, LoggingConfig, SanitizeLimits, ServerConfig, SessionConfig};
pub use dispatch::{McpDispatcher, SessionContext, SessionElicitor, elicitor_token};
pub use elicit::{
    ElicitBroker, ElicitOptions, InMemoryPendingStore, PendingElicit, PendingElicitStore,
};
pub use error::{ServerError, ServerResult};
pub use logging::{LoggingGuard, SessionLogLevels};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use server::{AppBuilder, Gateway, GatewayBuilder};
pub use shared::GatewayShared;
pub use transport::{
    AdapterState, AuthHash, ChannelSink, InMemorySessionStore, OutboundFrame, OutboundSink,
    RequestOutcome, SessionRecord, SessionStore, TransportAdapter, TransportKey,
    TransportProtocol, TransportRegistry,
};
