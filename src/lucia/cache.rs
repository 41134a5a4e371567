//! Routing and response caches: fingerprinted, LRU-bounded, TTL-expired.
//!
//! Two logically separate namespaces — routing decisions and agent responses —
//! share one bounded-LRU-plus-TTL implementation so operators can clear them
//! independently.  Keys are SHA-256 fingerprints of the normalised prompt plus
//! a namespace salt (the routing model id for router entries, agent id plus
//! model id for agent entries), which keeps the two keyspaces mutually
//! exclusive.
//!
//! The cache stores only structured, JSON-serialisable payloads and only
//! semantically deterministic inputs: callers must strip volatile context
//! (time of day, presence snapshots) before fingerprinting — the cache itself
//! does not know those semantics.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::lucia::config::CacheConfig;

/// The two cache keyspaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheNamespace {
    Router,
    Agent,
}

/// Collapse whitespace and trim; the canonical prompt form used for
/// fingerprinting and session storage.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable fingerprint over the normalised prompt and a namespace salt.
pub fn fingerprint(normalized_prompt: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(normalized_prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Point-in-time counters for one namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
}

struct CacheEntry {
    payload: serde_json::Value,
    created_at: Instant,
    hit_count: u64,
    last_hit_at: Option<Instant>,
}

struct NamespaceState {
    entries: HashMap<String, CacheEntry>,
    /// Recency order, least-recent first.
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl NamespaceState {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }
}

/// Bounded LRU + TTL cache with per-namespace stats.
pub struct PromptCache {
    config: CacheConfig,
    router: Mutex<NamespaceState>,
    agent: Mutex<NamespaceState>,
}

impl PromptCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            router: Mutex::new(NamespaceState::new()),
            agent: Mutex::new(NamespaceState::new()),
        }
    }

    fn state(&self, namespace: CacheNamespace) -> &Mutex<NamespaceState> {
        match namespace {
            CacheNamespace::Router => &self.router,
            CacheNamespace::Agent => &self.agent,
        }
    }

    /// Look up a fingerprint; hits bump the entry's counters and recency.
    pub async fn get(&self, namespace: CacheNamespace, fp: &str) -> Option<serde_json::Value> {
        let mut state = self.state(namespace).lock().await;
        let now = Instant::now();

        let expired = match state.entries.get(fp) {
            Some(entry) => now.duration_since(entry.created_at) >= self.config.ttl,
            None => {
                state.misses += 1;
                return None;
            }
        };
        if expired {
            state.entries.remove(fp);
            if let Some(pos) = state.order.iter().position(|k| k == fp) {
                state.order.remove(pos);
            }
            state.misses += 1;
            return None;
        }

        state.hits += 1;
        state.touch(fp);
        let entry = state.entries.get_mut(fp).expect("entry checked above");
        entry.hit_count += 1;
        entry.last_hit_at = Some(now);
        Some(entry.payload.clone())
    }

    /// Insert a payload, evicting least-recently-used entries past capacity.
    pub async fn put(&self, namespace: CacheNamespace, fp: &str, payload: serde_json::Value) {
        let capacity = self.config.capacity;
        let mut state = self.state(namespace).lock().await;

        state.entries.insert(
            fp.to_string(),
            CacheEntry {
                payload,
                created_at: Instant::now(),
                hit_count: 0,
                last_hit_at: None,
            },
        );
        state.touch(fp);

        while state.entries.len() > capacity {
            match state.order.pop_front() {
                Some(oldest) => {
                    state.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Drop every entry in a namespace; counters are kept.
    pub async fn clear(&self, namespace: CacheNamespace) {
        let mut state = self.state(namespace).lock().await;
        state.entries.clear();
        state.order.clear();
    }

    /// Hit count recorded on one entry, for observability endpoints.
    pub async fn entry_hit_count(&self, namespace: CacheNamespace, fp: &str) -> Option<u64> {
        let state = self.state(namespace).lock().await;
        state.entries.get(fp).map(|e| e.hit_count)
    }

    pub async fn stats(&self, namespace: CacheNamespace) -> CacheStats {
        let state = self.state(namespace).lock().await;
        let total = state.hits + state.misses;
        CacheStats {
            entry_count: state.entries.len(),
            hit_count: state.hits,
            miss_count: state.misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                state.hits as f64 / total as f64
            },
        }
    }
}
