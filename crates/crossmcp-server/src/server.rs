//! Gateway assembly: the builder wires scopes, registries, flows, the
//! dispatcher, the elicitation broker, and the transport registry into
//! one running server.

use crate::config::ServerConfig;
use crate::dispatch::McpDispatcher;
use crate::elicit::{ElicitBroker, InMemoryPendingStore, PendingElicitStore};
use crate::error::{ServerError, ServerResult};
use crate::flows::register_builtin_flows;
use crate::invoke::ToolResultCache;
use crate::logging::SessionLogLevels;
use crate::metrics::{MetricsSnapshot, ServerMetrics};
use crate::shared::GatewayShared;
use crate::transport::adapter::{ChannelSink, OutboundFrame, TransportAdapter};
use crate::transport::{SessionStore, TransportProtocol, TransportRegistry};
use crossmcp_core::prompt::PromptRecord;
use crossmcp_core::provider::{ProviderContainer, ProviderRecord};
use crossmcp_core::resource::ResourceRecord;
use crossmcp_core::scope::{ScopeArena, ScopeKind};
use crossmcp_core::skills::SkillRegistry;
use crossmcp_core::tool::ToolRecord;
use crossmcp_flow::hooks::{HookRecord, HookRegistry};
use crossmcp_flow::record::{FlowRecord, FlowRegistry};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Declarative registrations for one app scope.
#[derive(Default)]
pub struct AppBuilder {
    name: String,
    tools: Vec<ToolRecord>,
    resources: Vec<ResourceRecord>,
    prompts: Vec<PromptRecord>,
    providers: Vec<ProviderRecord>,
    hooks: Vec<HookRecord>,
}

impl fmt::Debug for AppBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppBuilder")
            .field("name", &self.name)
            .field("tools", &self.tools.len())
            .finish()
    }
}

impl AppBuilder {
    /// App with a scope name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Register a tool on the app scope.
    pub fn tool(mut self, tool: ToolRecord) -> Self {
        self.tools.push(tool);
        self
    }

    /// Register a resource on the app scope.
    pub fn resource(mut self, resource: ResourceRecord) -> Self {
        self.resources.push(resource);
        self
    }

    /// Register a prompt on the app scope.
    pub fn prompt(mut self, prompt: PromptRecord) -> Self {
        self.prompts.push(prompt);
        self
    }

    /// Register a provider on the app scope.
    pub fn provider(mut self, provider: ProviderRecord) -> Self {
        self.providers.push(provider);
        self
    }

    /// Register a hook scoped to this app.
    pub fn hook(mut self, hook: HookRecord) -> Self {
        self.hooks.push(hook);
        self
    }
}

/// Builder collecting every registration before assembly.
#[derive(Default)]
pub struct GatewayBuilder {
    config: ServerConfig,
    tools: Vec<ToolRecord>,
    resources: Vec<ResourceRecord>,
    prompts: Vec<PromptRecord>,
    providers: Vec<ProviderRecord>,
    hooks: Vec<HookRecord>,
    flows: Vec<FlowRecord>,
    apps: Vec<AppBuilder>,
    skills: Option<Arc<dyn SkillRegistry>>,
    session_store: Option<Arc<dyn SessionStore>>,
    pending_store: Option<Arc<dyn PendingElicitStore>>,
}

impl fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("name", &self.config.name)
            .field("tools", &self.tools.len())
            .field("apps", &self.apps.len())
            .finish()
    }
}

impl GatewayBuilder {
    /// Empty builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the server version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    /// Set the instructions surfaced through `initialize`.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.instructions = Some(instructions.into());
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a tool on the server scope.
    pub fn tool(mut self, tool: ToolRecord) -> Self {
        self.tools.push(tool);
        self
    }

    /// Register a resource on the server scope.
    pub fn resource(mut self, resource: ResourceRecord) -> Self {
        self.resources.push(resource);
        self
    }

    /// Register a prompt on the server scope.
    pub fn prompt(mut self, prompt: PromptRecord) -> Self {
        self.prompts.push(prompt);
        self
    }

    /// Register a provider on the server scope.
    pub fn provider(mut self, provider: ProviderRecord) -> Self {
        self.providers.push(provider);
        self
    }

    /// Register a process-wide hook.
    pub fn hook(mut self, hook: HookRecord) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Register an additional flow.
    pub fn flow(mut self, flow: FlowRecord) -> Self {
        self.flows.push(flow);
        self
    }

    /// Mount an app scope.
    pub fn app(mut self, app: AppBuilder) -> Self {
        self.apps.push(app);
        self
    }

    /// Attach the skill registry.
    pub fn skills(mut self, skills: Arc<dyn SkillRegistry>) -> Self {
        self.skills = Some(skills);
        self
    }

    /// Attach the shared session store.
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Attach the shared pending-elicit store.
    pub fn pending_store(mut self, store: Arc<dyn PendingElicitStore>) -> Self {
        self.pending_store = Some(store);
        self
    }

    /// Assemble the gateway.
    pub fn build(self) -> ServerResult<Gateway> {
        let arena = Arc::new(ScopeArena::new());
        let root = arena.create_root(self.config.name.clone());

        for provider in self.providers {
            root.providers().register(provider)?;
        }
        for tool in self.tools {
            root.tools().insert(tool)?;
        }
        for resource in self.resources {
            root.resources().insert(resource)?;
        }
        for prompt in self.prompts {
            root.prompts().insert(prompt)?;
        }
        if let Some(skills) = self.skills {
            root.set_skills(skills);
        }

        for app in self.apps {
            let scope = arena.create_child(root.id(), app.name, ScopeKind::App);
            for provider in app.providers {
                scope.providers().register(provider)?;
            }
            for tool in app.tools {
                scope.tools().insert(tool)?;
            }
            for resource in app.resources {
                scope.resources().insert(resource)?;
            }
            for prompt in app.prompts {
                scope.prompts().insert(prompt)?;
            }
            if !app.hooks.is_empty() {
                let scope_hooks = HookRegistry::new();
                for hook in app.hooks {
                    scope_hooks.register(hook);
                }
                scope.extensions().insert(Arc::new(scope_hooks));
            }
        }

        arena.adopt_contributions()?;

        let flows = Arc::new(FlowRegistry::new("flow"));
        register_builtin_flows(&flows)?;
        for flow in self.flows {
            flows.insert(flow)?;
        }
        root.extensions().insert(Arc::clone(&flows));

        let hooks = Arc::new(HookRegistry::new());
        for hook in self.hooks {
            hooks.register(hook);
        }

        let metrics = Arc::new(ServerMetrics::new());
        let pending_store = self
            .pending_store
            .unwrap_or_else(|| Arc::new(InMemoryPendingStore::new()));
        let elicits = ElicitBroker::new(
            pending_store,
            self.config.elicitation.clone(),
            Arc::clone(&metrics),
        );

        let container = ProviderContainer::new(root.providers());

        let shared = Arc::new(GatewayShared {
            config: self.config,
            arena: Arc::clone(&arena),
            root: root.id(),
            flows,
            hooks,
            metrics: Arc::clone(&metrics),
            session_levels: Arc::new(SessionLogLevels::new()),
            tool_cache: ToolResultCache::new(),
            schema_validators: DashMap::new(),
            session_skills: DashMap::new(),
            resource_subscriptions: DashMap::new(),
            elicits: Arc::clone(&elicits),
            container,
        });

        let dispatcher = McpDispatcher::new(Arc::clone(&shared));
        let transports = TransportRegistry::new(
            self.session_store,
            Arc::clone(&dispatcher),
            elicits,
            metrics,
            shared.config.node_id.clone(),
            shared.config.session.store_timeout(),
            shared.config.session.graceful_shutdown(),
        );

        Ok(Gateway {
            shared,
            dispatcher,
            transports,
        })
    }
}

/// The assembled MCP gateway.
pub struct Gateway {
    shared: Arc<GatewayShared>,
    dispatcher: Arc<McpDispatcher>,
    transports: Arc<TransportRegistry>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("name", &self.shared.config.name)
            .field("adapters", &self.transports.live_count())
            .finish()
    }
}

impl Gateway {
    /// Start building a gateway.
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Initialize registries in dependency order and freeze them.
    ///
    /// After start, only hot-reload providers may register late.
    pub async fn start(&self) -> ServerResult<()> {
        let root = self.shared.root_scope();
        root.tools().initialize().await?;
        root.resources().initialize().await?;
        root.prompts().initialize().await?;
        self.shared.flows.initialize().await?;

        root.tools().seal();
        root.resources().seal();
        root.prompts().seal();
        self.shared.flows.seal();
        self.shared.container.initialize();

        tracing::info!(
            name = %self.shared.config.name,
            version = %self.shared.config.version,
            node = %self.shared.config.node_id,
            tools = root.tools().len(),
            flows = self.shared.flows.len(),
            "gateway started"
        );
        Ok(())
    }

    /// Destroy every adapter and stop accepting work.
    pub async fn shutdown(&self) {
        self.transports.shutdown().await;
        tracing::info!(name = %self.shared.config.name, "gateway stopped");
    }

    /// The transport registry.
    pub fn transports(&self) -> &Arc<TransportRegistry> {
        &self.transports
    }

    /// The request dispatcher.
    pub fn dispatcher(&self) -> &Arc<McpDispatcher> {
        &self.dispatcher
    }

    /// Shared gateway state.
    pub fn shared(&self) -> &Arc<GatewayShared> {
        &self.shared
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Notify every subscribed session that a resource changed.
    ///
    /// Updates ride each session's general event stream and are
    /// delivered at least once; returns how many notifications were
    /// queued.
    pub fn publish_resource_update(&self, uri: &str) -> usize {
        let params = serde_json::json!({ "uri": uri });
        let mut queued = 0;
        for session_id in self.shared.resource_subscribers(uri) {
            for adapter in self.transports.find_by_session(&session_id) {
                let note = crossmcp_protocol::jsonrpc::JsonRpcNotification::new(
                    crossmcp_protocol::methods::RESOURCES_UPDATED_NOTIFICATION,
                    Some(params.clone()),
                );
                if adapter.send(OutboundFrame::Notification(note)).is_ok() {
                    queued += 1;
                }
            }
        }
        queued
    }

    /// Open an in-process session over the local transport.
    ///
    /// Returns the adapter plus the receiving end of its outbound
    /// channel.
    pub async fn connect_local(
        &self,
        token: &str,
    ) -> ServerResult<(Arc<TransportAdapter>, mpsc::UnboundedReceiver<OutboundFrame>)> {
        let (sink, rx) = ChannelSink::new();
        let adapter = self
            .transports
            .create_transporter(TransportProtocol::Local, token, None, Arc::new(sink))
            .await?;
        Ok((adapter, rx))
    }
}

impl From<crossmcp_core::provider::ProviderError> for ServerError {
    fn from(err: crossmcp_core::provider::ProviderError) -> Self {
        Self::internal(err.to_string())
    }
}
