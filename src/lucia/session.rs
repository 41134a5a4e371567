//! Short-term conversation history per session.
//!
//! Sessions are created lazily on first use, keep their turns in insertion
//! order, and are evicted after the configured idle window.  Every completed
//! turn is written through to the key-value store under
//! `lucia:session:{id}` so a restart can pick up mid-conversation; reads fall
//! back to the store when the in-memory map is cold.
//!
//! The store also hands out one fair lock per session id — the façade holds it
//! for the duration of a turn so parallel requests on the same session are
//! processed first-come, first-served.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::lucia::client_wrapper::Message;
use crate::lucia::config::SessionConfig;
use crate::lucia::kv::{session_key, KeyValueStore};

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTurn {
    /// `"user"` or `"assistant"`.
    pub role: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// The stored state of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session_id: String,
    pub turns: Vec<SessionTurn>,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
    /// Sticky routing target, when the dashboard pinned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_agent_id: Option<String>,
}

impl SessionContext {
    fn new(session_id: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            turns: Vec::new(),
            created_at: now,
            last_touched_at: now,
            pinned_agent_id: None,
        }
    }

    /// Render the turns as chat messages for an agent invocation.
    pub fn history_messages(&self) -> Vec<Message> {
        self.turns
            .iter()
            .map(|turn| {
                if turn.role == "assistant" {
                    Message::assistant(&turn.text)
                } else {
                    Message::user(&turn.text)
                }
            })
            .collect()
    }
}

/// TTL-bounded session store with KV write-through and per-session locks.
pub struct SessionStore {
    config: SessionConfig,
    sessions: RwLock<HashMap<String, SessionContext>>,
    kv: Option<Arc<dyn KeyValueStore>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            kv: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Back the store with an external key-value store (builder pattern).
    pub fn with_kv(mut self, kv: Arc<dyn KeyValueStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// The serialization lock for one session id.
    ///
    /// tokio's mutex wakes waiters in FIFO order, which gives the fair
    /// first-come ordering the pipeline requires.
    pub async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn is_expired(&self, session: &SessionContext, now: DateTime<Utc>) -> bool {
        let idle = now.signed_duration_since(session.last_touched_at);
        idle.to_std()
            .map(|idle| idle >= self.config.idle_ttl)
            .unwrap_or(false)
    }

    /// Fetch a session, falling back to the KV store for cold entries.
    pub async fn get(&self, session_id: &str) -> Option<SessionContext> {
        let now = Utc::now();
        if let Some(session) = self.sessions.read().await.get(session_id) {
            if self.is_expired(session, now) {
                return None;
            }
            return Some(session.clone());
        }

        let kv = self.kv.as_ref()?;
        let raw = kv.get(&session_key(session_id)).await.ok()??;
        let session: SessionContext = serde_json::from_str(&raw).ok()?;
        if self.is_expired(&session, now) {
            return None;
        }
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), session.clone());
        Some(session)
    }

    /// Append one turn, creating the session lazily.
    pub async fn append_turn(&self, session_id: &str, role: &str, text: &str) {
        let max_turns = self.config.max_turns;
        let snapshot = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .entry(session_id.to_string())
                .or_insert_with(|| SessionContext::new(session_id));
            session.turns.push(SessionTurn {
                role: role.to_string(),
                text: text.to_string(),
                timestamp: Utc::now(),
            });
            let len = session.turns.len();
            if len > max_turns {
                session.turns.drain(0..len - max_turns);
            }
            session.last_touched_at = Utc::now();
            session.clone()
        };
        self.write_through(&snapshot).await;
    }

    /// Pin an agent for sticky routing on this session.
    pub async fn pin_agent(&self, session_id: &str, agent_id: Option<String>) {
        let snapshot = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .entry(session_id.to_string())
                .or_insert_with(|| SessionContext::new(session_id));
            session.pinned_agent_id = agent_id;
            session.last_touched_at = Utc::now();
            session.clone()
        };
        self.write_through(&snapshot).await;
    }

    async fn write_through(&self, session: &SessionContext) {
        if let Some(kv) = &self.kv {
            match serde_json::to_string(session) {
                Ok(raw) => {
                    let result = kv
                        .put(&session_key(&session.session_id), raw, Some(self.config.idle_ttl))
                        .await;
                    if let Err(e) = result {
                        log::warn!("session: write-through failed for {}: {}", session.session_id, e);
                    }
                }
                Err(e) => log::warn!("session: failed to serialise {}: {}", session.session_id, e),
            }
        }
    }

    /// Drop expired sessions and their locks.
    pub async fn evict_idle(&self) {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| self.is_expired(s, now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        drop(sessions);

        if !expired.is_empty() {
            let mut locks = self.locks.lock().await;
            for id in &expired {
                locks.remove(id);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lucia::kv::InMemoryKvStore;
    use std::time::Duration;

    #[tokio::test]
    async fn turns_keep_insertion_order() {
        let store = SessionStore::new(SessionConfig::default());
        store.append_turn("s1", "user", "turn on the lights").await;
        store.append_turn("s1", "assistant", "Done.").await;
        store.append_turn("s1", "user", "and the fan").await;

        let session = store.get("s1").await.unwrap();
        let texts: Vec<&str> = session.turns.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["turn on the lights", "Done.", "and the fan"]);
        assert_eq!(session.history_messages().len(), 3);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        let store = SessionStore::new(SessionConfig {
            idle_ttl: Duration::from_millis(20),
            max_turns: 10,
        });
        store.append_turn("s1", "user", "hello").await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.get("s1").await.is_none());
        store.evict_idle().await;
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn cold_sessions_reload_from_kv() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKvStore::new());
        let store = SessionStore::new(SessionConfig::default()).with_kv(kv.clone());
        store.append_turn("s2", "user", "hello").await;

        // A fresh store over the same KV sees the persisted session.
        let rehydrated = SessionStore::new(SessionConfig::default()).with_kv(kv);
        let session = rehydrated.get("s2").await.unwrap();
        assert_eq!(session.turns.len(), 1);
    }

    #[tokio::test]
    async fn turn_count_is_bounded() {
        let store = SessionStore::new(SessionConfig {
            idle_ttl: Duration::from_secs(60),
            max_turns: 2,
        });
        store.append_turn("s3", "user", "one").await;
        store.append_turn("s3", "assistant", "two").await;
        store.append_turn("s3", "user", "three").await;

        let session = store.get("s3").await.unwrap();
        let texts: Vec<&str> = session.turns.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
    }
}
