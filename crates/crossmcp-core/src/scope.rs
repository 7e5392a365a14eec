//! The scope tree.
//!
//! Scopes form a server -> app -> plugin tree. Each scope owns its
//! registries; lookups walk child to parent and the first hit wins.
//! Scopes live in an arena and refer to each other by [`ScopeId`], so
//! there are no reference cycles between a scope and its registries.

use crate::extensions::Extensions;
use crate::prompt::PromptRecord;
use crate::provider::ProviderRegistry;
use crate::registry::{Registered, Registry};
use crate::resource::ResourceRecord;
use crate::skills::SkillRegistry;
use crate::tool::ToolRecord;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Index of a scope within its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

impl ScopeId {
    /// Raw arena index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Position of a scope in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// The root server scope
    Server,
    /// An application mounted on the server
    App,
    /// A plugin mounted on an app or the server
    Plugin,
}

/// One node of the scope tree.
pub struct Scope {
    id: ScopeId,
    name: String,
    kind: ScopeKind,
    parent: Option<ScopeId>,
    children: RwLock<Vec<ScopeId>>,
    providers: Arc<ProviderRegistry>,
    tools: Arc<Registry<ToolRecord>>,
    resources: Arc<Registry<ResourceRecord>>,
    prompts: Arc<Registry<PromptRecord>>,
    skills: RwLock<Option<Arc<dyn SkillRegistry>>>,
    extensions: Extensions,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Scope {
    /// Arena id.
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Scope name, one segment of qualified ids.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tree position.
    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// Parent scope id, `None` at the root.
    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// Child scope ids.
    pub fn children(&self) -> Vec<ScopeId> {
        self.children.read().clone()
    }

    /// This scope's provider registry.
    pub fn providers(&self) -> Arc<ProviderRegistry> {
        Arc::clone(&self.providers)
    }

    /// This scope's tool registry.
    pub fn tools(&self) -> Arc<Registry<ToolRecord>> {
        Arc::clone(&self.tools)
    }

    /// This scope's resource registry.
    pub fn resources(&self) -> Arc<Registry<ResourceRecord>> {
        Arc::clone(&self.resources)
    }

    /// This scope's prompt registry.
    pub fn prompts(&self) -> Arc<Registry<PromptRecord>> {
        Arc::clone(&self.prompts)
    }

    /// Attached skill registry, if any.
    pub fn skills(&self) -> Option<Arc<dyn SkillRegistry>> {
        self.skills.read().clone()
    }

    /// Attach a skill registry.
    pub fn set_skills(&self, skills: Arc<dyn SkillRegistry>) {
        *self.skills.write() = Some(skills);
    }

    /// Typed extension slots (flow registries, hook registries).
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }
}

/// Owns every scope and provides tree-walking lookups.
pub struct ScopeArena {
    scopes: RwLock<Vec<Arc<Scope>>>,
}

impl fmt::Debug for ScopeArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeArena")
            .field("len", &self.scopes.read().len())
            .finish()
    }
}

impl Default for ScopeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self {
            scopes: RwLock::new(Vec::new()),
        }
    }

    /// Create the root server scope.
    pub fn create_root(&self, name: impl Into<String>) -> Arc<Scope> {
        self.create(name.into(), ScopeKind::Server, None, ProviderRegistry::new())
    }

    /// Create a child scope whose provider registry forks the parent's.
    pub fn create_child(
        &self,
        parent: ScopeId,
        name: impl Into<String>,
        kind: ScopeKind,
    ) -> Arc<Scope> {
        let parent_providers = {
            let scopes = self.scopes.read();
            scopes[parent.index()].providers()
        };
        let child = self.create(name.into(), kind, Some(parent), parent_providers.fork());
        self.scopes.read()[parent.index()]
            .children
            .write()
            .push(child.id());
        child
    }

    fn create(
        &self,
        name: String,
        kind: ScopeKind,
        parent: Option<ScopeId>,
        providers: Arc<ProviderRegistry>,
    ) -> Arc<Scope> {
        let mut scopes = self.scopes.write();
        let id = ScopeId(scopes.len());
        let scope = Arc::new(Scope {
            id,
            name,
            kind,
            parent,
            children: RwLock::new(Vec::new()),
            providers,
            tools: Arc::new(Registry::new("tool")),
            resources: Arc::new(Registry::new("resource")),
            prompts: Arc::new(Registry::new("prompt")),
            skills: RwLock::new(None),
            extensions: Extensions::new(),
        });
        scopes.push(Arc::clone(&scope));
        scope
    }

    /// Fetch a scope by id.
    pub fn get(&self, id: ScopeId) -> Arc<Scope> {
        Arc::clone(&self.scopes.read()[id.index()])
    }

    /// Every scope, in creation order (parents before children).
    pub fn scopes(&self) -> Vec<Arc<Scope>> {
        self.scopes.read().clone()
    }

    /// Dot-joined lineage of scope names, root first.
    pub fn qualified_id(&self, id: ScopeId) -> String {
        let mut segments = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let scope = self.get(current);
            segments.push(scope.name().to_string());
            cursor = scope.parent();
        }
        segments.reverse();
        segments.join(".")
    }

    /// Find a tool walking this scope and then its ancestors.
    pub fn find_tool(&self, id: ScopeId, name: &str) -> Option<Registered<ToolRecord>> {
        self.walk_up(id, |scope| scope.tools.find_by_name(name))
    }

    /// Find a resource by name walking child to parent.
    pub fn find_resource(&self, id: ScopeId, name: &str) -> Option<Registered<ResourceRecord>> {
        self.walk_up(id, |scope| scope.resources.find_by_name(name))
    }

    /// Find a prompt by name walking child to parent.
    pub fn find_prompt(&self, id: ScopeId, name: &str) -> Option<Registered<PromptRecord>> {
        self.walk_up(id, |scope| scope.prompts.find_by_name(name))
    }

    /// Nearest skill registry walking child to parent.
    pub fn find_skills(&self, id: ScopeId) -> Option<Arc<dyn SkillRegistry>> {
        self.walk_up(id, |scope| scope.skills())
    }

    fn walk_up<R>(&self, id: ScopeId, f: impl Fn(&Scope) -> Option<R>) -> Option<R> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let scope = self.get(current);
            if let Some(found) = f(&scope) {
                return Some(found);
            }
            cursor = scope.parent();
        }
        None
    }

    /// Adopt every descendant's tools and resources into its ancestors,
    /// bottom-up, recomputing qualified names per hop.
    pub fn adopt_contributions(&self) -> crate::error::CoreResult<()> {
        // Children were always created after their parents, so reverse
        // arena order visits leaves first.
        let ids: Vec<ScopeId> = {
            let scopes = self.scopes.read();
            scopes.iter().map(|s| s.id()).rev().collect()
        };
        for id in ids {
            let scope = self.get(id);
            let Some(parent_id) = scope.parent() else {
                continue;
            };
            let parent = self.get(parent_id);
            parent.tools.adopt_from(&scope.tools, scope.name())?;
            parent
                .resources
                .adopt_from(&scope.resources, scope.name())?;
            parent.prompts.adopt_from(&scope.prompts, scope.name())?;
        }
        Ok(())
    }
}
