//! State shared by flows, the dispatcher, and the transport layer.

use crate::config::ServerConfig;
use crate::elicit::ElicitBroker;
use crate::error::{ServerError, ServerResult};
use crate::invoke::ToolResultCache;
use crate::logging::SessionLogLevels;
use crate::metrics::ServerMetrics;
use crossmcp_core::provider::ProviderContainer;
use crossmcp_core::scope::{Scope, ScopeArena, ScopeId};
use crossmcp_flow::hooks::HookRegistry;
use crossmcp_flow::record::FlowRegistry;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Everything a flow stage can reach through its context state.
pub struct GatewayShared {
    /// Gateway configuration
    pub config: ServerConfig,
    /// The scope tree
    pub arena: Arc<ScopeArena>,
    /// Root (server) scope id
    pub root: ScopeId,
    /// Flow registry the dispatcher routes into
    pub flows: Arc<FlowRegistry>,
    /// Process-wide hooks
    pub hooks: Arc<HookRegistry>,
    /// Counters
    pub metrics: Arc<ServerMetrics>,
    /// Per-session log levels
    pub session_levels: Arc<SessionLogLevels>,
    /// Tool result cache
    pub tool_cache: ToolResultCache,
    /// Compiled input validators, one per tool id
    pub schema_validators: DashMap<String, Arc<jsonschema::Validator>>,
    /// Skills each session has loaded
    pub session_skills: DashMap<String, HashSet<String>>,
    /// Resource subscriptions: URI to subscribed sessions
    pub resource_subscriptions: DashMap<String, HashSet<String>>,
    /// Elicitation broker
    pub elicits: Arc<ElicitBroker>,
    /// Provider container for view materialization
    pub container: Arc<ProviderContainer>,
}

impl fmt::Debug for GatewayShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayShared")
            .field("name", &self.config.name)
            .field("root", &self.root)
            .finish()
    }
}

impl GatewayShared {
    /// The root server scope.
    pub fn root_scope(&self) -> Arc<Scope> {
        self.arena.get(self.root)
    }

    /// Compiled validator for a tool's input schema, cached per tool id.
    pub fn validator_for(
        &self,
        tool_id: &str,
        schema: &Value,
    ) -> ServerResult<Arc<jsonschema::Validator>> {
        if let Some(validator) = self.schema_validators.get(tool_id) {
            return Ok(Arc::clone(&validator));
        }
        let compiled = jsonschema::validator_for(schema)
            .map_err(|e| ServerError::internal(format!("invalid input schema: {e}")))?;
        let validator = Arc::new(compiled);
        self.schema_validators
            .insert(tool_id.to_string(), Arc::clone(&validator));
        Ok(validator)
    }

    /// Record that a session loaded a skill.
    pub fn mark_skill_loaded(&self, session_id: &str, skill_id: &str) {
        self.session_skills
            .entry(session_id.to_string())
            .or_default()
            .insert(skill_id.to_string());
    }

    /// Whether a session has loaded a skill.
    pub fn session_has_skill(&self, session_id: &str, skill_id: &str) -> bool {
        self.session_skills
            .get(session_id)
            .is_some_and(|skills| skills.contains(skill_id))
    }

    /// Subscribe a session to a resource URI; idempotent.
    pub fn subscribe_resource(&self, uri: &str, session_id: &str) {
        self.resource_subscriptions
            .entry(uri.to_string())
            .or_default()
            .insert(session_id.to_string());
    }

    /// Unsubscribe a session from a resource URI; idempotent.
    pub fn unsubscribe_resource(&self, uri: &str, session_id: &str) {
        if let Some(mut sessions) = self.resource_subscriptions.get_mut(uri) {
            sessions.remove(session_id);
        }
    }

    /// Sessions currently subscribed to a URI.
    pub fn resource_subscribers(&self, uri: &str) -> Vec<String> {
        self.resource_subscriptions
            .get(uri)
            .map(|sessions| sessions.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop all per-session state (session destroyed).
    pub fn drop_session(&self, session_id: &str) {
        self.session_skills.remove(session_id);
        self.session_levels.remove(session_id);
        self.container.drop_session(session_id);
        for mut sessions in self.resource_subscriptions.iter_mut() {
            sessions.remove(session_id);
        }
    }
}
