//! Session core configuration. Loaded from an optional JSON file, then
//! overridden by `SESSIONGATE_*` environment variables.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::identity::{
    ConcurrentLoginPolicy, CredentialStore, FileCredentialStore, InvalidationCoordinator, MemoryCredentialStore,
    ScopedCache, SessionManager, Verifier, IDENTITY_NAMESPACE,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Logical session the persisted token is keyed by.
    pub session_key: String,
    /// Directory for the file-backed credential store; in-memory when absent.
    pub credential_dir: Option<PathBuf>,
    pub verify_timeout_ms: u64,
    /// Token lifetime for the in-process verifier.
    pub token_ttl_secs: u64,
    pub concurrent_login: ConcurrentLoginPolicy,
    /// Cache namespaces invalidated on every identity change.
    pub identity_namespaces: Vec<String>,
    pub cache_max_entries: usize,
    /// Base URL of a remote verification API.
    pub verifier_url: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_key: "default".to_string(),
            credential_dir: None,
            verify_timeout_ms: 10_000,
            token_ttl_secs: 3_600,
            concurrent_login: ConcurrentLoginPolicy::Supersede,
            identity_namespaces: vec![IDENTITY_NAMESPACE.to_string()],
            cache_max_entries: 512,
            verifier_url: None,
        }
    }
}

fn parse_policy(s: &str) -> Result<ConcurrentLoginPolicy> {
    match s.trim().to_ascii_lowercase().as_str() {
        "supersede" => Ok(ConcurrentLoginPolicy::Supersede),
        "reject" => Ok(ConcurrentLoginPolicy::Reject),
        other => Err(anyhow!("unknown concurrent login policy '{}'", other)),
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parse config {}", path.display()))
    }

    /// Apply overrides from a variable lookup. Split out from `apply_env` for tests.
    pub fn apply_overrides<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("SESSIONGATE_SESSION_KEY") { self.session_key = v; }
        if let Some(v) = get("SESSIONGATE_CREDENTIAL_DIR") { self.credential_dir = Some(PathBuf::from(v)); }
        if let Some(v) = get("SESSIONGATE_VERIFY_TIMEOUT_MS") {
            self.verify_timeout_ms = v.trim().parse().context("SESSIONGATE_VERIFY_TIMEOUT_MS")?;
        }
        if let Some(v) = get("SESSIONGATE_CONCURRENT_LOGIN") { self.concurrent_login = parse_policy(&v)?; }
        if let Some(v) = get("SESSIONGATE_VERIFIER_URL") { self.verifier_url = Some(v); }
        Ok(())
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|k| std::env::var(k).ok())
    }

    pub fn verify_timeout(&self) -> Duration { Duration::from_millis(self.verify_timeout_ms) }

    pub fn token_ttl(&self) -> Duration { Duration::from_secs(self.token_ttl_secs) }

    pub fn credential_store(&self) -> Arc<dyn CredentialStore> {
        match &self.credential_dir {
            Some(dir) => Arc::new(FileCredentialStore::new(dir.clone(), &self.session_key)),
            None => Arc::new(MemoryCredentialStore::new()),
        }
    }

    pub fn coordinator(&self) -> Arc<InvalidationCoordinator> {
        Arc::new(InvalidationCoordinator::with_identity_namespaces(self.identity_namespaces.iter().cloned()))
    }

    pub fn scoped_cache<K, V>(&self, namespace: &str, coordinator: Arc<InvalidationCoordinator>) -> ScopedCache<K, V>
    where
        K: Eq + std::hash::Hash,
        V: Clone,
    {
        ScopedCache::new(namespace, coordinator, self.cache_max_entries)
    }

    /// Wire a session manager from this config around the given verifier.
    pub fn session_manager(&self, verifier: Arc<dyn Verifier>) -> SessionManager {
        SessionManager::new(verifier, self.credential_store(), self.coordinator())
            .with_policy(self.concurrent_login)
            .with_verify_timeout(self.verify_timeout())
    }
}
