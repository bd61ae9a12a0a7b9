//! Epoch counters for identity-scoped cache invalidation.
//!
//! Every cache namespace has a monotonically increasing epoch. Cached entries
//! remember the epoch they were written under and are stale once the namespace
//! moves past it. Namespaces registered as identity-scoped are bumped on every
//! effective-identity change; the rest are left alone.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::principal::Identity;

pub const IDENTITY_NAMESPACE: &str = "identity";

#[derive(Default)]
pub struct InvalidationCoordinator {
    epochs: RwLock<HashMap<String, u64>>,
    identity_scoped: RwLock<HashSet<String>>,
}

impl InvalidationCoordinator {
    pub fn new() -> Self { Self::default() }

    /// Coordinator with the given namespaces already registered as identity-scoped.
    pub fn with_identity_namespaces<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let c = Self::new();
        for ns in namespaces { c.register_identity_scoped(ns); }
        c
    }

    pub fn register_identity_scoped(&self, namespace: impl Into<String>) {
        self.identity_scoped.write().insert(namespace.into());
    }

    pub fn is_identity_scoped(&self, namespace: &str) -> bool {
        self.identity_scoped.read().contains(namespace)
    }

    pub fn epoch(&self, namespace: &str) -> u64 {
        *self.epochs.read().get(namespace).unwrap_or(&1)
    }

    pub fn bump(&self, namespace: &str) -> u64 {
        let mut m = self.epochs.write();
        let v = m.get(namespace).copied().unwrap_or(1) + 1;
        m.insert(namespace.to_string(), v);
        v
    }

    /// Called by the session manager whenever the effective identity changes.
    /// Returns the namespaces that were invalidated.
    pub fn on_identity_changed(&self, identity: Option<&Identity>) -> Vec<String> {
        let scoped: Vec<String> = self.identity_scoped.read().iter().cloned().collect();
        {
            let mut m = self.epochs.write();
            for ns in scoped.iter() {
                let v = m.get(ns.as_str()).copied().unwrap_or(1) + 1;
                m.insert(ns.clone(), v);
            }
        }
        debug!(
            target: "sessiongate",
            "invalidate identity-scoped namespaces={:?} new_identity={}",
            scoped,
            identity.map(|i| i.id.as_str()).unwrap_or("<none>")
        );
        scoped
    }
}

#[derive(Clone)]
struct CacheEntry<V> {
    epoch: u64,
    value: V,
}

/// Epoch snapshot taken before a value is computed. Passed back to
/// [`ScopedCache::put_at`] so a value fetched under an older identity is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTicket {
    epoch: u64,
}

impl CacheTicket {
    pub fn epoch(&self) -> u64 { self.epoch }
}

/// Small epoch-tagged cache bound to one namespace. Stale entries are never served.
pub struct ScopedCache<K, V> {
    namespace: String,
    coordinator: Arc<InvalidationCoordinator>,
    max_entries: usize,
    map: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> ScopedCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(namespace: impl Into<String>, coordinator: Arc<InvalidationCoordinator>, max_entries: usize) -> Self {
        Self { namespace: namespace.into(), coordinator, max_entries: max_entries.max(1), map: RwLock::new(HashMap::new()) }
    }

    pub fn namespace(&self) -> &str { &self.namespace }

    /// Capture the current epoch. Take it before starting the fetch whose result will be cached.
    pub fn ticket(&self) -> CacheTicket {
        CacheTicket { epoch: self.coordinator.epoch(&self.namespace) }
    }

    /// Store a value computed under `ticket`. Returns false and stores nothing when
    /// the namespace has moved on since the ticket was taken.
    pub fn put_at(&self, ticket: CacheTicket, key: K, value: V) -> bool {
        let mut m = self.map.write();
        // Epoch read under the map lock so a concurrent bump cannot slip between check and insert
        let epoch = self.coordinator.epoch(&self.namespace);
        if ticket.epoch != epoch {
            debug!(target: "sessiongate::epochs", "drop write: ns='{}' ticket={} epoch={}", self.namespace, ticket.epoch, epoch);
            return false;
        }
        // Drop everything on overflow or once the namespace has moved on
        if m.len() >= self.max_entries || m.values().any(|e| e.epoch != epoch) {
            m.clear();
        }
        m.insert(key, CacheEntry { epoch, value });
        true
    }

    /// Store a value tagged with the current epoch. Only for values computed without
    /// awaiting; anything fetched across an await goes through [`ticket`](Self::ticket) and `put_at`.
    pub fn put(&self, key: K, value: V) {
        self.put_at(self.ticket(), key, value);
    }

    /// Return the cached value, or run `fetch` and store its result under the epoch
    /// observed before the fetch started.
    pub async fn get_or_insert_with<F, Fut>(&self, key: K, fetch: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = V>,
    {
        let ticket = self.ticket();
        if let Some(v) = self.get(&key) { return v; }
        let value = fetch().await;
        self.put_at(ticket, key, value.clone());
        value
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let epoch = self.coordinator.epoch(&self.namespace);
        let m = self.map.read();
        m.get(key).filter(|e| e.epoch == epoch).map(|e| e.value.clone())
    }

    /// True when an entry exists but was written under an older epoch.
    pub fn is_stale(&self, key: &K) -> bool {
        let epoch = self.coordinator.epoch(&self.namespace);
        self.map.read().get(key).map(|e| e.epoch != epoch).unwrap_or(false)
    }

    pub fn len(&self) -> usize { self.map.read().len() }

    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }
}
