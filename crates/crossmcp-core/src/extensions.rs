//! A typed, concurrency-safe property map.
//!
//! Used to hang per-scope and per-invocation state (flow registries,
//! invocation records) off structs without hard-wiring every consumer's
//! types into this crate.

use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-keyed map of shared values.
#[derive(Default)]
pub struct Extensions {
    entries: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.entries.read().len())
            .finish()
    }
}

impl Extensions {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value of the same type.
    pub fn insert<T: Any + Send + Sync>(&self, value: Arc<T>) {
        self.entries.write().insert(TypeId::of::<T>(), value);
    }

    /// Fetch a value by type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.entries
            .read()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    /// Remove a value by type.
    pub fn remove<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.entries
            .write()
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
    }
}
