//! In-memory agent registry.
//!
//! The registry maps agent ids to `(card, backend)` pairs, where the backend is
//! either an in-process [`LocalAgent`] or a remote endpoint descriptor.  Readers
//! get cloned `Arc` snapshots, so a hot-reload that replaces an entry never
//! disturbs an in-flight invocation: whoever already looked an agent up keeps
//! the old instance until they drop it, and everyone else sees the new one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::lucia::agent::{AgentCard, LocalAgent};

/// How an agent is invoked.
#[derive(Clone)]
pub enum AgentBackend {
    /// In-process invokable.
    Local(Arc<LocalAgent>),
    /// Satellite agent reachable over the agent-to-agent protocol.
    Remote { url: String },
}

/// One registry entry.
pub struct RegisteredAgent {
    pub card: AgentCard,
    pub backend: AgentBackend,
    /// Excluded from routing catalogs; set for the orchestrator's own entry.
    pub is_orchestrator: bool,
    /// Last-known reachability for remote backends; local agents are always
    /// reachable.  Flipped by the dispatcher on connection failures.
    reachable: AtomicBool,
}

impl RegisteredAgent {
    pub fn new(card: AgentCard, backend: AgentBackend) -> Self {
        Self {
            card,
            backend,
            is_orchestrator: false,
            reachable: AtomicBool::new(true),
        }
    }

    pub fn orchestrator(mut self) -> Self {
        self.is_orchestrator = true;
        self
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Relaxed)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Relaxed);
    }
}

/// Concurrent id → agent index.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<RegisteredAgent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or atomically replace the entry under the card's name.
    pub async fn register(&self, entry: RegisteredAgent) {
        let id = entry.card.name.clone();
        self.agents.write().await.insert(id, Arc::new(entry));
    }

    /// Remove an entry; in-flight holders of the `Arc` are unaffected.
    pub async fn remove(&self, agent_id: &str) -> bool {
        self.agents.write().await.remove(agent_id).is_some()
    }

    /// Look up one agent.
    pub async fn get(&self, agent_id: &str) -> Option<Arc<RegisteredAgent>> {
        self.agents.read().await.get(agent_id).cloned()
    }

    /// Whether an id is currently registered.
    pub async fn contains(&self, agent_id: &str) -> bool {
        self.agents.read().await.contains_key(agent_id)
    }

    /// Every registered card.
    pub async fn cards(&self) -> Vec<AgentCard> {
        self.agents
            .read()
            .await
            .values()
            .map(|a| a.card.clone())
            .collect()
    }

    /// Agents eligible for routing: not the orchestrator, and — for remote
    /// backends — currently reachable.
    pub async fn routable(&self) -> Vec<Arc<RegisteredAgent>> {
        let mut entries: Vec<Arc<RegisteredAgent>> = self
            .agents
            .read()
            .await
            .values()
            .filter(|a| !a.is_orchestrator)
            .filter(|a| match a.backend {
                AgentBackend::Local(_) => true,
                AgentBackend::Remote { .. } => a.is_reachable(),
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.card.name.cmp(&b.card.name));
        entries
    }

    /// Drop every entry whose id is not in `keep`; used by the loader after a
    /// rebuild to clear deleted definitions.
    pub async fn retain_ids(&self, keep: &[String]) {
        self.agents
            .write()
            .await
            .retain(|id, _| keep.iter().any(|k| k == id));
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routable_excludes_orchestrator_and_unreachable_remotes() {
        let registry = AgentRegistry::new();
        registry
            .register(
                RegisteredAgent::new(
                    AgentCard::new("orchestrator", "Orchestrator", "routes requests"),
                    AgentBackend::Remote {
                        url: "http://localhost/a2a/orchestrator".to_string(),
                    },
                )
                .orchestrator(),
            )
            .await;

        let remote = RegisteredAgent::new(
            AgentCard::new("satellite", "Satellite", "remote helper"),
            AgentBackend::Remote {
                url: "http://satellite/a2a/satellite".to_string(),
            },
        );
        remote.set_reachable(false);
        registry.register(remote).await;

        assert_eq!(registry.len().await, 2);
        assert!(registry.routable().await.is_empty());
    }

    #[tokio::test]
    async fn replacement_is_atomic_per_entry() {
        let registry = AgentRegistry::new();
        registry
            .register(RegisteredAgent::new(
                AgentCard::new("a", "A", "first"),
                AgentBackend::Remote {
                    url: "http://one".to_string(),
                },
            ))
            .await;

        let before = registry.get("a").await.unwrap();
        registry
            .register(RegisteredAgent::new(
                AgentCard::new("a", "A", "second"),
                AgentBackend::Remote {
                    url: "http://two".to_string(),
                },
            ))
            .await;

        // The old handle stays valid for in-flight work; new lookups see the
        // replacement.
        assert_eq!(before.card.description, "first");
        assert_eq!(registry.get("a").await.unwrap().card.description, "second");
    }
}
