//! # crossmcp-core
//!
//! The resolution substrate of the crossmcp gateway:
//!
//! - **Provider container** - typed DI across three lifetimes
//!   (global / session / request), with first-wins shadowing through the
//!   scope chain and lazy, memoized view materialization.
//! - **Scope tree** - server -> app -> plugin scopes in an arena, each
//!   owning tool/resource/prompt/provider registries; parents adopt
//!   children's contributions under recomputed qualified names.
//! - **Uniform registries** - normalized records, declared dependency
//!   graphs, topological initialization, change subscriptions.
//! - **Ambient request context** - task-local `{session, scope, request,
//!   principal, trace}` binding consumed by logs and hooks.
//! - **Control-flow signals** - `Respond` / `Abort` / `RetryAfter` as
//!   first-class values, never logged as errors.
//! - **Collaborator contracts** - skill discovery and the credential
//!   cache, consumed by flows but implemented elsewhere.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod context;
pub mod controlflow;
pub mod credentials;
pub mod error;
pub mod extensions;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod resource;
pub mod scope;
pub mod skills;
pub mod token;
pub mod tool;

pub use context::{Principal, RequestScope};
pub use controlflow::ControlSignal;
pub use credentials::{CacheStats, CredentialCache, CredentialScope, ResolvedCredential};
pub use error::{CoreError, CoreResult};
pub use extensions::Extensions;
pub use prompt::{PromptRecord, PromptRenderer};
pub use provider::{
    ProviderContainer, ProviderError, ProviderRecord, ProviderRegistry, ProviderScope,
    ProviderViews, ScopeView,
};
pub use registry::{Registered, Registry, RegistryChange, RegistryItem, SubscribeOptions};
pub use resource::{ResourceReader, ResourceRecord};
pub use scope::{Scope, ScopeArena, ScopeId, ScopeKind};
pub use skills::{
    SkillListOptions, SkillRegistry, SkillSearchOptions, StaticSkillRegistry, resolve_skill_load,
};
pub use token::Token;
pub use tool::{
    ApprovalConfig, CacheConfig, ExecutorBinding, SkillGate, ToolExecutor, ToolInvocation,
    ToolRecord,
};
