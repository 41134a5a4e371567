//! Key-value storage seam for sessions, caches, and A2A task context.
//!
//! Keys are namespaced under `lucia:`; values are JSON strings with a TTL per
//! namespace.  Deployments back this with an external key-value server for
//! crash resilience; the in-memory implementation covers tests and single-node
//! setups where losing short-lived state on restart is acceptable.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::lucia::store::StoreError;

/// Key for a session history document.
pub fn session_key(session_id: &str) -> String {
    format!("lucia:session:{}", session_id)
}

/// Key for a cached routing decision.
pub fn router_cache_key(fingerprint: &str) -> String {
    format!("lucia:cache:router:{}", fingerprint)
}

/// Key for a cached agent response.
pub fn agent_cache_key(agent_id: &str, fingerprint: &str) -> String {
    format!("lucia:cache:agent:{}:{}", agent_id, fingerprint)
}

/// Key for persisted A2A task context.
pub fn task_key(task_id: &str) -> String {
    format!("lucia:task:{}", task_id)
}

/// JSON-string key-value store with per-entry TTLs.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Insert or replace `key`, expiring it after `ttl` when given.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Delete `key`; returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// Volatile TTL-aware store.
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, KvEntry>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drop every expired entry; called opportunistically by writers.
    async fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| !entry.expired(now));
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.expired(now))
            .map(|entry| entry.value.clone()))
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.sweep().await;
        let entry = KvEntry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}
