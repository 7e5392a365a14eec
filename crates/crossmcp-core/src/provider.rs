//! The scoped provider container.
//!
//! Providers bind [`Token`]s to values or factories at one of three
//! lifetimes: `Global` (process-wide), `Session` (per client session), and
//! `Request` (per in-flight request). Registries form a parent chain
//! (plugin -> app -> server); the first binding found walking child to
//! parent wins. Views materialize lazily: a token is only constructed on
//! first resolve against the view that owns its lifetime.

use crate::token::Token;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A resolved provider value.
pub type ProviderValue = Arc<dyn Any + Send + Sync>;

/// Factory constructing a value against the view it materializes in.
pub type FactoryFn =
    Arc<dyn Fn(&ScopeView) -> Result<ProviderValue, ProviderError> + Send + Sync>;

/// Activation predicate; a false result hides the record from resolution.
pub type ActivationFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Errors raised by registration and resolution.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// No binding for the token anywhere in the chain
    #[error("no provider bound for token '{token}'")]
    Resolve {
        /// Token that failed to resolve
        token: String,
    },

    /// Registration would close a dependency cycle
    #[error("provider dependency cycle: {path}")]
    DependencyCycle {
        /// The cycle, rendered as `a -> b -> a`
        path: String,
    },

    /// A narrower-lifetime token was requested from a broader view
    #[error("token '{token}' is {declared}-scoped but was resolved from a {requested} view")]
    ScopeViolation {
        /// Offending token
        token: String,
        /// Scope the record declares
        declared: ProviderScope,
        /// Scope of the view the resolve ran against
        requested: ProviderScope,
    },

    /// The bound value is not of the requested type
    #[error("token '{token}' resolved to a value that is not a {expected}")]
    TypeMismatch {
        /// Offending token
        token: String,
        /// Requested Rust type
        expected: &'static str,
    },

    /// Registration after the registry was sealed
    #[error("registry is sealed; '{token}' must be marked hot-reload to register late")]
    Sealed {
        /// Token that was rejected
        token: String,
    },

    /// A factory failed while constructing its value
    #[error("factory for '{token}' failed: {message}")]
    Factory {
        /// Token whose factory failed
        token: String,
        /// Failure description
        message: String,
    },
}

/// Provider lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderScope {
    /// One instance per process
    Global,
    /// One instance per session
    Session,
    /// One instance per request
    Request,
}

impl ProviderScope {
    fn rank(self) -> u8 {
        match self {
            Self::Global => 0,
            Self::Session => 1,
            Self::Request => 2,
        }
    }
}

impl fmt::Display for ProviderScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Global => "global",
            Self::Session => "session",
            Self::Request => "request",
        };
        write!(f, "{name}")
    }
}

/// How a record produces its value.
#[derive(Clone)]
pub enum ProviderKind {
    /// Literal value bound at registration
    Value(ProviderValue),
    /// Pre-instantiated object handed in from outside
    Instance(ProviderValue),
    /// Factory with declared dependency tokens
    Factory(FactoryFn),
}

impl fmt::Debug for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => write!(f, "Value"),
            Self::Instance(_) => write!(f, "Instance"),
            Self::Factory(_) => write!(f, "Factory"),
        }
    }
}

/// One registered binding.
#[derive(Clone)]
pub struct ProviderRecord {
    /// Token this record binds
    pub token: Token,
    /// Lifetime of the produced value
    pub scope: ProviderScope,
    kind: ProviderKind,
    /// Tokens this record's factory resolves, declared up front
    pub depends_on: Vec<Token>,
    /// Permit registration after the registry is sealed
    pub hot_reload: bool,
    when: Option<ActivationFn>,
}

impl fmt::Debug for ProviderRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRecord")
            .field("token", &self.token.name())
            .field("scope", &self.scope)
            .field("kind", &self.kind)
            .field("depends_on", &self.depends_on.len())
            .finish()
    }
}

impl ProviderRecord {
    /// Bind a token to a literal value.
    pub fn value<T: Any + Send + Sync>(token: Token, value: T) -> Self {
        Self {
            token,
            scope: ProviderScope::Global,
            kind: ProviderKind::Value(Arc::new(value)),
            depends_on: Vec::new(),
            hot_reload: false,
            when: None,
        }
    }

    /// Bind a token to an object instantiated elsewhere.
    pub fn instance<T: Any + Send + Sync>(token: Token, value: Arc<T>) -> Self {
        Self {
            token,
            scope: ProviderScope::Global,
            kind: ProviderKind::Instance(value),
            depends_on: Vec::new(),
            hot_reload: false,
            when: None,
        }
    }

    /// Bind a token to a factory with declared dependencies.
    pub fn factory<F, T>(token: Token, depends_on: Vec<Token>, build: F) -> Self
    where
        F: Fn(&ScopeView) -> Result<T, ProviderError> + Send + Sync + 'static,
        T: Any + Send + Sync,
    {
        Self {
            token,
            scope: ProviderScope::Global,
            kind: ProviderKind::Factory(Arc::new(move |view| {
                build(view).map(|v| Arc::new(v) as ProviderValue)
            })),
            depends_on,
            hot_reload: false,
            when: None,
        }
    }

    /// Set the record's lifetime.
    pub fn in_scope(mut self, scope: ProviderScope) -> Self {
        self.scope = scope;
        self
    }

    /// Allow registration after the registry seals.
    pub fn with_hot_reload(mut self) -> Self {
        self.hot_reload = true;
        self
    }

    /// Attach an activation predicate.
    pub fn when<F: Fn() -> bool + Send + Sync + 'static>(mut self, predicate: F) -> Self {
        self.when = Some(Arc::new(predicate));
        self
    }

    fn is_active(&self) -> bool {
        self.when.as_ref().is_none_or(|w| w())
    }
}

/// A registry of provider records with a parent chain.
///
/// Forked children inherit and shadow the parent; duplicate registration
/// of a token in the same registry replaces the earlier record.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    records: RwLock<HashMap<Token, ProviderRecord>>,
    parent: Option<Arc<ProviderRegistry>>,
    sealed: AtomicBool,
}

impl ProviderRegistry {
    /// New root registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fork a child that inherits and shadows this registry.
    pub fn fork(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            records: RwLock::new(HashMap::new()),
            parent: Some(Arc::clone(self)),
            sealed: AtomicBool::new(false),
        })
    }

    /// Register a record, rejecting cycles and late non-hot-reload adds.
    pub fn register(&self, record: ProviderRecord) -> Result<(), ProviderError> {
        if self.sealed.load(Ordering::Acquire) && !record.hot_reload {
            return Err(ProviderError::Sealed {
                token: record.token.name().to_string(),
            });
        }
        self.check_for_cycle(&record)?;
        self.records.write().insert(record.token.clone(), record);
        Ok(())
    }

    /// Freeze the registry; only hot-reload records may register after.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Find the first record for a token, walking child to parent.
    pub fn lookup(&self, token: &Token) -> Option<ProviderRecord> {
        if let Some(record) = self.records.read().get(token) {
            return Some(record.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(token))
    }

    /// Whether a token is bound anywhere in the chain.
    pub fn contains(&self, token: &Token) -> bool {
        self.lookup(token).is_some()
    }

    /// Detect a cycle that the candidate record would close.
    ///
    /// Edges run from a record to each of its declared dependencies that
    /// already have a binding; the candidate shadows any existing record
    /// for its token during the walk.
    fn check_for_cycle(&self, candidate: &ProviderRecord) -> Result<(), ProviderError> {
        let mut path: Vec<Token> = Vec::new();
        let mut stack: Vec<(Token, usize)> = vec![(candidate.token.clone(), 0)];

        // Iterative DFS tracking the current path so the cycle can be
        // rendered in the error.
        while let Some((token, child_idx)) = stack.pop() {
            if child_idx == 0 {
                if path.contains(&token) && token == candidate.token {
                    path.push(token);
                    let rendered = path
                        .iter()
                        .map(Token::name)
                        .collect::<Vec<_>>()
                        .join(" -> ");
                    return Err(ProviderError::DependencyCycle { path: rendered });
                }
                if path.contains(&token) {
                    continue;
                }
                path.push(token.clone());
            }

            let deps = if token == candidate.token {
                candidate.depends_on.clone()
            } else {
                self.lookup(&token)
                    .map(|r| r.depends_on.clone())
                    .unwrap_or_default()
            };

            if child_idx < deps.len() {
                stack.push((token, child_idx + 1));
                stack.push((deps[child_idx].clone(), 0));
            } else {
                path.pop();
            }
        }
        Ok(())
    }
}

/// A lazily materialized view at one provider lifetime.
///
/// Views chain `request -> session -> global`; resolution delegates to
/// the ancestor view owning the record's declared lifetime, so a
/// session-scoped value resolved during a request is shared across the
/// whole session.
pub struct ScopeView {
    scope: ProviderScope,
    registry: Arc<ProviderRegistry>,
    parent: Option<Arc<ScopeView>>,
    cells: DashMap<Token, ProviderValue>,
}

impl fmt::Debug for ScopeView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeView")
            .field("scope", &self.scope)
            .field("materialized", &self.cells.len())
            .finish()
    }
}

impl ScopeView {
    fn new(
        scope: ProviderScope,
        registry: Arc<ProviderRegistry>,
        parent: Option<Arc<ScopeView>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            scope,
            registry,
            parent,
            cells: DashMap::new(),
        })
    }

    /// Lifetime of this view.
    pub fn scope(&self) -> ProviderScope {
        self.scope
    }

    /// Bind an already-constructed value directly into this view.
    ///
    /// Hook-supplied request bindings use this; the value shadows any
    /// registry record for the token within this view only.
    pub fn inject<T: Any + Send + Sync>(&self, token: Token, value: Arc<T>) {
        self.cells.insert(token, value);
    }

    /// Resolve a token to a typed value.
    pub fn resolve<T: Any + Send + Sync>(&self, token: &Token) -> Result<Arc<T>, ProviderError> {
        let value = self.resolve_value(token)?;
        value
            .downcast::<T>()
            .map_err(|_| ProviderError::TypeMismatch {
                token: token.name().to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Resolve a token to its untyped value.
    pub fn resolve_value(&self, token: &Token) -> Result<ProviderValue, ProviderError> {
        if let Some(cell) = self.cells.get(token) {
            return Ok(Arc::clone(&cell));
        }

        let Some(record) = self.registry.lookup(token) else {
            // Injected bindings live only in view cells; check ancestors
            // before giving up.
            if let Some(parent) = &self.parent {
                return parent.resolve_value(token);
            }
            return Err(ProviderError::Resolve {
                token: token.name().to_string(),
            });
        };

        if !record.is_active() {
            return Err(ProviderError::Resolve {
                token: token.name().to_string(),
            });
        }

        if record.scope.rank() > self.scope.rank() {
            return Err(ProviderError::ScopeViolation {
                token: token.name().to_string(),
                declared: record.scope,
                requested: self.scope,
            });
        }

        let owner = self.owner_view(record.scope);
        owner.materialize(&record)
    }

    /// Walk the parent chain to the view owning the given lifetime.
    fn owner_view(&self, scope: ProviderScope) -> &ScopeView {
        let mut view = self;
        while view.scope != scope {
            match view.parent.as_deref() {
                Some(parent) => view = parent,
                None => break,
            }
        }
        view
    }

    fn materialize(&self, record: &ProviderRecord) -> Result<ProviderValue, ProviderError> {
        if let Some(cell) = self.cells.get(&record.token) {
            return Ok(Arc::clone(&cell));
        }

        let constructed = match &record.kind {
            ProviderKind::Value(v) | ProviderKind::Instance(v) => Arc::clone(v),
            ProviderKind::Factory(build) => build(self)?,
        };

        // Racing first-resolvers both construct; the map keeps one and
        // every caller observes that single instance.
        let cell = self
            .cells
            .entry(record.token.clone())
            .or_insert(constructed);
        Ok(Arc::clone(&cell))
    }
}

/// The three views handed to a flow invocation.
#[derive(Debug, Clone)]
pub struct ProviderViews {
    /// Process-wide view
    pub global: Arc<ScopeView>,
    /// Per-session view
    pub session: Arc<ScopeView>,
    /// Per-request view
    pub request: Arc<ScopeView>,
}

impl ProviderViews {
    /// Resolve against the request view, falling back session then global.
    pub fn resolve<T: Any + Send + Sync>(&self, token: &Token) -> Result<Arc<T>, ProviderError> {
        self.request.resolve(token)
    }

    /// Untyped resolve against the full chain.
    pub fn resolve_value(&self, token: &Token) -> Result<ProviderValue, ProviderError> {
        self.request.resolve_value(token)
    }
}

/// Owns view materialization for one active scope.
///
/// The global view is computed once; session views are memoized per
/// session id through a concurrent map, so racing first-accesses observe
/// exactly one view; request views are freshly constructed per call.
pub struct ProviderContainer {
    active: RwLock<Arc<ProviderRegistry>>,
    global_view: RwLock<Option<Arc<ScopeView>>>,
    session_views: DashMap<String, Arc<ScopeView>>,
    initialized: AtomicBool,
}

impl fmt::Debug for ProviderContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderContainer")
            .field("sessions", &self.session_views.len())
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .finish()
    }
}

impl ProviderContainer {
    /// Container resolving against the given registry.
    pub fn new(registry: Arc<ProviderRegistry>) -> Arc<Self> {
        Arc::new(Self {
            active: RwLock::new(registry),
            global_view: RwLock::new(None),
            session_views: DashMap::new(),
            initialized: AtomicBool::new(false),
        })
    }

    /// The registry views currently resolve against.
    pub fn registry(&self) -> Arc<ProviderRegistry> {
        Arc::clone(&self.active.read())
    }

    /// Swap the resolution root; drops all memoized views.
    pub fn set_active_scope(&self, registry: Arc<ProviderRegistry>) {
        *self.active.write() = registry;
        *self.global_view.write() = None;
        self.session_views.clear();
        tracing::debug!("provider container rebound to a new scope");
    }

    /// Seal the registry; late registration now requires hot-reload.
    pub fn initialize(&self) {
        self.registry().seal();
        self.initialized.store(true, Ordering::Release);
    }

    /// Build the global/session/request view triple for a session.
    pub fn build_views(&self, session_id: &str) -> ProviderViews {
        let registry = self.registry();

        let global = {
            let mut slot = self.global_view.write();
            match slot.as_ref() {
                Some(view) => Arc::clone(view),
                None => {
                    let view =
                        ScopeView::new(ProviderScope::Global, Arc::clone(&registry), None);
                    *slot = Some(Arc::clone(&view));
                    view
                }
            }
        };

        let session = self
            .session_views
            .entry(session_id.to_string())
            .or_insert_with(|| {
                ScopeView::new(
                    ProviderScope::Session,
                    Arc::clone(&registry),
                    Some(Arc::clone(&global)),
                )
            })
            .clone();

        let request = ScopeView::new(ProviderScope::Request, registry, Some(Arc::clone(&session)));

        ProviderViews {
            global,
            session,
            request,
        }
    }

    /// Drop the memoized view for a destroyed session.
    pub fn drop_session(&self, session_id: &str) {
        self.session_views.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct Config {
        url: String,
    }

    #[derive(Debug)]
    struct Client {
        url: String,
    }

    fn config_token() -> Token {
        Token::of::<Config>()
    }

    #[test]
    fn value_binding_resolves() {
        let registry = ProviderRegistry::new();
        registry
            .register(ProviderRecord::value(
                config_token(),
                Config { url: "db://x".into() },
            ))
            .unwrap();

        let container = ProviderContainer::new(registry);
        let views = container.build_views("s1");
        let config: Arc<Config> = views.resolve(&config_token()).unwrap();
        assert_eq!(config.url, "db://x");
    }

    #[test]
    fn factory_resolves_declared_dependencies() {
        let registry = ProviderRegistry::new();
        registry
            .register(ProviderRecord::value(
                config_token(),
                Config { url: "db://y".into() },
            ))
            .unwrap();
        registry
            .register(ProviderRecord::factory(
                Token::of::<Client>(),
                vec![config_token()],
                |view| {
                    let config: Arc<Config> = view.resolve(&config_token())?;
                    Ok(Client {
                        url: config.url.clone(),
                    })
                },
            ))
            .unwrap();

        let container = ProviderContainer::new(registry);
        let views = container.build_views("s1");
        let client: Arc<Client> = views.resolve(&Token::of::<Client>()).unwrap();
        assert_eq!(client.url, "db://y");
    }

    #[test]
    fn child_shadows_parent_first_wins() {
        let parent = ProviderRegistry::new();
        parent
            .register(ProviderRecord::value(Token::named("greeting"), "parent"))
            .unwrap();
        let child = parent.fork();
        child
            .register(ProviderRecord::value(Token::named("greeting"), "child"))
            .unwrap();

        let container = ProviderContainer::new(child);
        let views = container.build_views("s1");
        let value: Arc<&str> = views.resolve(&Token::named("greeting")).unwrap();
        assert_eq!(*value, "child");
    }

    #[test]
    fn duplicate_registration_replaces() {
        let registry = ProviderRegistry::new();
        registry
            .register(ProviderRecord::value(Token::named("n"), 1u32))
            .unwrap();
        registry
            .register(ProviderRecord::value(Token::named("n"), 2u32))
            .unwrap();

        let container = ProviderContainer::new(registry);
        let views = container.build_views("s1");
        let value: Arc<u32> = views.resolve(&Token::named("n")).unwrap();
        assert_eq!(*value, 2);
    }

    #[test]
    fn cycle_rejected_at_registration() {
        let registry = ProviderRegistry::new();
        registry
            .register(ProviderRecord::factory(
                Token::named("a"),
                vec![Token::named("b")],
                |_| Ok(()),
            ))
            .unwrap();
        registry
            .register(ProviderRecord::factory(
                Token::named("b"),
                vec![Token::named("c")],
                |_| Ok(()),
            ))
            .unwrap();
        let err = registry
            .register(ProviderRecord::factory(
                Token::named("c"),
                vec![Token::named("a")],
                |_| Ok(()),
            ))
            .unwrap_err();
        assert!(matches!(err, ProviderError::DependencyCycle { .. }));
    }

    #[test]
    fn request_token_from_global_view_is_violation() {
        let registry = ProviderRegistry::new();
        registry
            .register(
                ProviderRecord::value(Token::named("req-only"), 7u32)
                    .in_scope(ProviderScope::Request),
            )
            .unwrap();

        let container = ProviderContainer::new(registry);
        let views = container.build_views("s1");
        let err = views.global.resolve::<u32>(&Token::named("req-only"));
        assert!(matches!(
            err,
            Err(ProviderError::ScopeViolation { .. })
        ));
        // The request view itself is fine.
        assert!(views.request.resolve::<u32>(&Token::named("req-only")).is_ok());
    }

    #[test]
    fn session_values_shared_within_session_only() {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);

        let registry = ProviderRegistry::new();
        registry
            .register(
                ProviderRecord::factory(Token::named("counter"), vec![], |_| {
                    Ok(BUILDS.fetch_add(1, Ordering::SeqCst))
                })
                .in_scope(ProviderScope::Session),
            )
            .unwrap();

        let container = ProviderContainer::new(registry);

        let s1_first = container.build_views("s1");
        let s1_second = container.build_views("s1");
        let a: Arc<usize> = s1_first.resolve(&Token::named("counter")).unwrap();
        let b: Arc<usize> = s1_second.resolve(&Token::named("counter")).unwrap();
        assert_eq!(*a, *b);

        let s2 = container.build_views("s2");
        let c: Arc<usize> = s2.resolve(&Token::named("counter")).unwrap();
        assert_ne!(*a, *c);
    }

    #[test]
    fn factories_are_lazy() {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);

        let registry = ProviderRegistry::new();
        registry
            .register(ProviderRecord::factory(Token::named("lazy"), vec![], |_| {
                Ok(BUILDS.fetch_add(1, Ordering::SeqCst))
            }))
            .unwrap();

        let container = ProviderContainer::new(registry);
        let views = container.build_views("s1");
        assert_eq!(BUILDS.load(Ordering::SeqCst), 0);
        let _: Arc<usize> = views.resolve(&Token::named("lazy")).unwrap();
        let _: Arc<usize> = views.resolve(&Token::named("lazy")).unwrap();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sealed_registry_requires_hot_reload() {
        let registry = ProviderRegistry::new();
        let container = ProviderContainer::new(Arc::clone(&registry));
        container.initialize();

        let err = registry
            .register(ProviderRecord::value(Token::named("late"), 1u8))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Sealed { .. }));

        registry
            .register(ProviderRecord::value(Token::named("late"), 1u8).with_hot_reload())
            .unwrap();
    }

    #[test]
    fn injected_binding_shadows_and_reaches_children() {
        let registry = ProviderRegistry::new();
        registry
            .register(ProviderRecord::value(Token::named("who"), "registry"))
            .unwrap();

        let container = ProviderContainer::new(registry);
        let views = container.build_views("s1");

        views.request.inject(Token::named("who"), Arc::new("injected"));
        let value: Arc<&str> = views.resolve(&Token::named("who")).unwrap();
        assert_eq!(*value, "injected");

        // A session-injected binding with no registry record is visible
        // from the request view.
        views.session.inject(Token::named("extra"), Arc::new(9u32));
        let extra: Arc<u32> = views.resolve(&Token::named("extra")).unwrap();
        assert_eq!(*extra, 9);
    }

    #[test]
    fn inactive_record_is_invisible() {
        let registry = ProviderRegistry::new();
        registry
            .register(ProviderRecord::value(Token::named("flagged"), 1u8).when(|| false))
            .unwrap();

        let container = ProviderContainer::new(registry);
        let views = container.build_views("s1");
        assert!(matches!(
            views.resolve::<u8>(&Token::named("flagged")),
            Err(ProviderError::Resolve { .. })
        ));
    }
}
