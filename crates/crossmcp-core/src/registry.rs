//! The uniform registry protocol.
//!
//! Every record kind (tools, resources, prompts, flows) goes through the
//! same machinery: normalized records with unique names, a dependency
//! graph from declared `depends_on` names, topological initialization
//! awaiting each record's `ready` future, change subscriptions, and
//! lookup by plain or qualified name. Parent scopes adopt their
//! children's contributions under recomputed qualified names.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Longest a single qualified-name segment may grow before truncation.
pub const MAX_SEGMENT_LEN: usize = 64;

/// A record the uniform registry can hold.
#[async_trait]
pub trait RegistryItem: Send + Sync + 'static {
    /// Unique name within one registry.
    fn name(&self) -> &str;

    /// Names of records that must initialize before this one.
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// Awaited during topological initialization.
    async fn ready(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// A stored record plus its qualified name.
#[derive(Debug)]
pub struct Registered<T> {
    /// The record
    pub item: Arc<T>,
    /// Dot-separated lineage id, recomputed on adoption
    pub qualified_name: String,
}

impl<T> Clone for Registered<T> {
    fn clone(&self) -> Self {
        Self {
            item: Arc::clone(&self.item),
            qualified_name: self.qualified_name.clone(),
        }
    }
}

/// What changed in a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    /// A record was added
    Added,
    /// A record was removed
    Removed,
}

/// Subscription filter.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Only notify for qualified names with this prefix
    pub name_prefix: Option<String>,
}

type ChangeCallback = Arc<dyn Fn(RegistryChange, &str) + Send + Sync>;

/// Uniform registry over one record kind.
pub struct Registry<T: RegistryItem> {
    label: &'static str,
    entries: RwLock<Vec<Registered<T>>>,
    subscribers: RwLock<Vec<(SubscribeOptions, ChangeCallback)>>,
    sealed: AtomicBool,
}

impl<T: RegistryItem> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("label", &self.label)
            .field("len", &self.entries.read().len())
            .finish()
    }
}

impl<T: RegistryItem> Registry<T> {
    /// Empty registry with a diagnostic label.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: RwLock::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
            sealed: AtomicBool::new(false),
        }
    }

    /// Register a record under its own name.
    pub fn insert(&self, item: T) -> CoreResult<()> {
        self.insert_arc(Arc::new(item))
    }

    /// Register a shared record under its own name.
    pub fn insert_arc(&self, item: Arc<T>) -> CoreResult<()> {
        let qualified = clamp_segment(item.name());
        self.insert_qualified(item, qualified)
    }

    fn insert_qualified(&self, item: Arc<T>, qualified: String) -> CoreResult<()> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(CoreError::registry(format!(
                "{} registry is sealed; cannot register '{}'",
                self.label,
                item.name()
            )));
        }
        {
            let mut entries = self.entries.write();
            // Qualified names are the uniqueness domain: two apps may both
            // contribute a `search` tool, adopted under distinct lineages.
            if entries.iter().any(|e| e.qualified_name == qualified) {
                return Err(CoreError::registry(format!(
                    "{} '{qualified}' is already registered",
                    self.label,
                )));
            }
            entries.push(Registered {
                item,
                qualified_name: qualified.clone(),
            });
        }
        self.notify(RegistryChange::Added, &qualified);
        Ok(())
    }

    /// Remove a record by name.
    pub fn remove(&self, name: &str) -> Option<Registered<T>> {
        let removed = {
            let mut entries = self.entries.write();
            let idx = entries.iter().position(|e| e.item.name() == name)?;
            Some(entries.remove(idx))
        };
        if let Some(entry) = &removed {
            self.notify(RegistryChange::Removed, &entry.qualified_name);
        }
        removed
    }

    /// All records, in registration order.
    pub fn list(&self) -> Vec<Registered<T>> {
        self.entries.read().clone()
    }

    /// Find by plain name.
    pub fn find_by_name(&self, name: &str) -> Option<Registered<T>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.item.name() == name)
            .cloned()
    }

    /// Find by fully qualified (dot-separated lineage) name.
    pub fn find_by_qualified_name(&self, qualified: &str) -> Option<Registered<T>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.qualified_name == qualified)
            .cloned()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Freeze registration.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Subscribe to change notifications.
    pub fn subscribe<F>(&self, options: SubscribeOptions, callback: F)
    where
        F: Fn(RegistryChange, &str) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .push((options, Arc::new(callback)));
    }

    fn notify(&self, change: RegistryChange, qualified: &str) {
        for (options, callback) in self.subscribers.read().iter() {
            let matches = options
                .name_prefix
                .as_deref()
                .is_none_or(|prefix| qualified.starts_with(prefix));
            if matches {
                callback(change, qualified);
            }
        }
    }

    /// Adopt a child registry's records under a parent segment.
    ///
    /// Qualified names become `parent.child`, each new segment clamped to
    /// the identifier budget with a deterministic hash suffix.
    pub fn adopt_from(&self, child: &Registry<T>, parent_segment: &str) -> CoreResult<()> {
        let parent = clamp_segment(parent_segment);
        for entry in child.list() {
            let qualified = format!("{parent}.{}", entry.qualified_name);
            self.insert_qualified(entry.item, qualified)?;
        }
        Ok(())
    }

    /// Initialize records in dependency order, awaiting each `ready`.
    pub async fn initialize(&self) -> CoreResult<()> {
        let order = self.topological_order()?;
        for entry in order {
            entry.item.ready().await?;
            tracing::debug!(
                registry = self.label,
                record = %entry.qualified_name,
                "record ready"
            );
        }
        Ok(())
    }

    /// Kahn's algorithm over declared `depends_on` names; registration
    /// order breaks ties so initialization is deterministic.
    fn topological_order(&self) -> CoreResult<Vec<Registered<T>>> {
        let entries = self.list();
        let index: HashMap<String, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.item.name().to_string(), i))
            .collect();

        let mut in_degree = vec![0usize; entries.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
        for (i, entry) in entries.iter().enumerate() {
            for dep in entry.item.depends_on() {
                let Some(&dep_idx) = index.get(&dep) else {
                    return Err(CoreError::registry(format!(
                        "{} '{}' depends on unknown record '{}'",
                        self.label,
                        entry.item.name(),
                        dep
                    )));
                };
                in_degree[i] += 1;
                dependents[dep_idx].push(i);
            }
        }

        let mut queue: VecDeque<usize> = (0..entries.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(entries.len());
        while let Some(i) = queue.pop_front() {
            order.push(entries[i].clone());
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() != entries.len() {
            return Err(CoreError::registry(format!(
                "{} registry has a dependency cycle",
                self.label
            )));
        }
        Ok(order)
    }
}

/// Clamp one qualified-name segment to the identifier budget.
///
/// Over-budget segments keep their prefix and gain an 8-hex-character
/// suffix of their SHA-256, so the result is deterministic and distinct
/// per original segment.
pub fn clamp_segment(segment: &str) -> String {
    if segment.len() <= MAX_SEGMENT_LEN {
        return segment.to_string();
    }
    let digest = Sha256::digest(segment.as_bytes());
    let suffix: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
    // Keep the prefix on a char boundary; names are not ASCII-only.
    let mut end = MAX_SEGMENT_LEN - suffix.len() - 1;
    while end > 0 && !segment.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}-{suffix}", &segment[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Item {
        name: String,
        deps: Vec<String>,
        readied: Arc<AtomicUsize>,
        ready_seq: Arc<RwLock<Vec<String>>>,
    }

    impl Item {
        fn new(name: &str, deps: &[&str], seq: &Arc<RwLock<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                deps: deps.iter().map(|d| d.to_string()).collect(),
                readied: Arc::new(AtomicUsize::new(0)),
                ready_seq: Arc::clone(seq),
            }
        }
    }

    #[async_trait]
    impl RegistryItem for Item {
        fn name(&self) -> &str {
            &self.name
        }

        fn depends_on(&self) -> Vec<String> {
            self.deps.clone()
        }

        async fn ready(&self) -> CoreResult<()> {
            self.readied.fetch_add(1, Ordering::SeqCst);
            self.ready_seq.write().push(self.name.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn initializes_in_dependency_order() {
        let seq = Arc::new(RwLock::new(Vec::new()));
        let registry = Registry::new("test");
        registry.insert(Item::new("c", &["b"], &seq)).unwrap();
        registry.insert(Item::new("a", &[], &seq)).unwrap();
        registry.insert(Item::new("b", &["a"], &seq)).unwrap();

        registry.initialize().await.unwrap();
        assert_eq!(*seq.read(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn cycle_is_rejected() {
        let seq = Arc::new(RwLock::new(Vec::new()));
        let registry = Registry::new("test");
        registry.insert(Item::new("a", &["b"], &seq)).unwrap();
        registry.insert(Item::new("b", &["a"], &seq)).unwrap();

        assert!(registry.initialize().await.is_err());
    }

    #[test]
    fn duplicate_names_rejected() {
        let seq = Arc::new(RwLock::new(Vec::new()));
        let registry = Registry::new("test");
        registry.insert(Item::new("a", &[], &seq)).unwrap();
        assert!(registry.insert(Item::new("a", &[], &seq)).is_err());
    }

    #[test]
    fn adoption_requalifies_names() {
        let seq = Arc::new(RwLock::new(Vec::new()));
        let child = Registry::new("test");
        child.insert(Item::new("search", &[], &seq)).unwrap();

        let parent = Registry::new("test");
        parent.adopt_from(&child, "crm-app").unwrap();

        let adopted = parent.find_by_qualified_name("crm-app.search").unwrap();
        assert_eq!(adopted.item.name(), "search");
        // Plain-name lookup still works on the adopting registry.
        assert!(parent.find_by_name("search").is_some());
    }

    #[test]
    fn long_segments_are_clamped_deterministically() {
        let long = "x".repeat(200);
        let clamped = clamp_segment(&long);
        assert_eq!(clamped.len(), MAX_SEGMENT_LEN);
        assert_eq!(clamped, clamp_segment(&long));
        assert_ne!(clamped, clamp_segment(&"y".repeat(200)));
    }

    #[test]
    fn multi_byte_segments_are_clamped_on_char_boundaries() {
        // 70 three-byte characters: 210 bytes, and byte 55 falls inside
        // a codepoint.
        let long = "\u{65e5}".repeat(70);
        let clamped = clamp_segment(&long);
        assert!(clamped.len() <= MAX_SEGMENT_LEN);
        assert!(clamped.chars().all(|c| c == '\u{65e5}' || c == '-' || c.is_ascii_hexdigit()));
        assert_eq!(clamped, clamp_segment(&long));

        // Mixed-width names clamp too, and stay distinct per input.
        let mixed = format!("caf\u{e9}-{}", "\u{65e5}".repeat(60));
        let clamped_mixed = clamp_segment(&mixed);
        assert!(clamped_mixed.len() <= MAX_SEGMENT_LEN);
        assert_ne!(clamped, clamped_mixed);
    }

    #[test]
    fn subscriptions_filter_by_prefix() {
        let seq = Arc::new(RwLock::new(Vec::new()));
        let registry = Registry::new("test");
        let seen: Arc<RwLock<Vec<String>>> = Arc::new(RwLock::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.subscribe(
            SubscribeOptions {
                name_prefix: Some("crm".into()),
            },
            move |change, name| {
                if change == RegistryChange::Added {
                    sink.write().push(name.to_string());
                }
            },
        );

        registry.insert(Item::new("other", &[], &seq)).unwrap();
        let child = Registry::new("test");
        child.insert(Item::new("lookup", &[], &seq)).unwrap();
        registry.adopt_from(&child, "crm").unwrap();

        assert_eq!(*seen.read(), vec!["crm.lookup"]);
    }

    #[test]
    fn sealed_registry_rejects_inserts() {
        let seq = Arc::new(RwLock::new(Vec::new()));
        let registry = Registry::new("test");
        registry.seal();
        assert!(registry.insert(Item::new("late", &[], &seq)).is_err());
    }
}
