//! Per-process credential cache.
//!
//! Caches resolved credentials keyed by provider id. Reads miss on
//! TTL-expired, past-`expires_at`, or invalidated entries, and every such
//! miss evicts the stale entry and counts toward `evictions`. When full,
//! the least-recently-used entry is evicted on insert.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How broadly a credential applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScope {
    /// Shared by every caller
    Global,
    /// Bound to one user
    User,
    /// Bound to one session
    Session,
}

/// A credential as resolved by an auth provider.
#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    /// Opaque credential material
    pub value: Value,
    /// Applicability scope
    pub scope: CredentialScope,
    /// Hard expiry set by the issuer
    pub expires_at: Option<Instant>,
    /// Cleared when the provider reports the credential revoked
    pub is_valid: bool,
}

impl ResolvedCredential {
    /// Valid credential with no issuer expiry.
    pub fn new(value: Value, scope: CredentialScope) -> Self {
        Self {
            value,
            scope,
            expires_at: None,
            is_valid: true,
        }
    }

    /// Set the issuer expiry.
    pub fn expires_at(mut self, at: Instant) -> Self {
        self.expires_at = Some(at);
        self
    }
}

struct Entry {
    resolved: ResolvedCredential,
    acquired_at: Instant,
    ttl: Option<Duration>,
    last_used: u64,
}

impl Entry {
    fn is_stale(&self, now: Instant) -> bool {
        if !self.resolved.is_valid {
            return true;
        }
        if let Some(expiry) = self.resolved.expires_at
            && now >= expiry
        {
            return true;
        }
        if let Some(ttl) = self.ttl
            && now.duration_since(self.acquired_at) >= ttl
        {
            return true;
        }
        false
    }
}

/// Cache counters, snapshotted by [`CredentialCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Successful reads
    pub hits: u64,
    /// Missing or stale reads
    pub misses: u64,
    /// Entries dropped for staleness or capacity
    pub evictions: u64,
    /// Live entries
    pub size: usize,
}

/// LRU + TTL credential cache.
pub struct CredentialCache {
    entries: Mutex<HashMap<String, Entry>>,
    capacity: usize,
    default_ttl: Option<Duration>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCache")
            .field("capacity", &self.capacity)
            .field("size", &self.entries.lock().len())
            .finish()
    }
}

impl CredentialCache {
    /// Cache holding up to `capacity` credentials.
    pub fn new(capacity: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            default_ttl,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Read a credential; stale entries are evicted and count as misses.
    pub fn get(&self, key: &str) -> Option<ResolvedCredential> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.is_stale(now) => {
                entries.remove(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                entry.last_used = self.clock.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.resolved.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a credential, evicting the LRU entry when full.
    pub fn set(&self, key: impl Into<String>, resolved: ResolvedCredential, ttl: Option<Duration>) {
        let key = key.into();
        let mut entries = self.entries.lock();

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let lru = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(lru_key) = lru {
                entries.remove(&lru_key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        entries.insert(
            key,
            Entry {
                resolved,
                acquired_at: Instant::now(),
                ttl: ttl.or(self.default_ttl),
                last_used: self.clock.fetch_add(1, Ordering::Relaxed),
            },
        );
    }

    /// Whether a fresh credential exists, without touching LRU order.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .is_some_and(|e| !e.is_stale(now))
    }

    /// Drop one credential.
    pub fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Drop every credential of a scope.
    pub fn invalidate_by_scope(&self, scope: CredentialScope) {
        self.entries
            .lock()
            .retain(|_, e| e.resolved.scope != scope);
    }

    /// Purge stale entries; returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_stale(now));
        let dropped = before - entries.len();
        self.evictions.fetch_add(dropped as u64, Ordering::Relaxed);
        dropped
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.entries.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn credential() -> ResolvedCredential {
        ResolvedCredential::new(json!({"token": "abc"}), CredentialScope::User)
    }

    #[test]
    fn hit_and_miss_accounting() {
        let cache = CredentialCache::new(4, None);
        assert!(cache.get("github").is_none());
        cache.set("github", credential(), None);
        assert!(cache.get("github").is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn ttl_expiry_is_a_miss_and_an_eviction() {
        let cache = CredentialCache::new(4, None);
        cache.set("slack", credential(), Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(2));

        assert!(cache.get("slack").is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn invalidated_credential_misses() {
        let cache = CredentialCache::new(4, None);
        let mut revoked = credential();
        revoked.is_valid = false;
        cache.set("jira", revoked, None);

        assert!(cache.get("jira").is_none());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn invalidate_then_get_misses() {
        let cache = CredentialCache::new(4, None);
        cache.set("github", credential(), None);
        cache.invalidate("github");
        assert!(cache.get("github").is_none());
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache = CredentialCache::new(2, None);
        cache.set("a", credential(), None);
        cache.set("b", credential(), None);
        cache.get("a");
        cache.set("c", credential(), None);

        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn scope_invalidation() {
        let cache = CredentialCache::new(4, None);
        cache.set("user-cred", credential(), None);
        cache.set(
            "session-cred",
            ResolvedCredential::new(json!({}), CredentialScope::Session),
            None,
        );

        cache.invalidate_by_scope(CredentialScope::Session);
        assert!(cache.has("user-cred"));
        assert!(!cache.has("session-cred"));
    }

    #[test]
    fn cleanup_purges_stale() {
        let cache = CredentialCache::new(4, None);
        cache.set("fresh", credential(), None);
        cache.set("stale", credential(), Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(2));

        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.stats().size, 1);
    }
}
