//! Agent-definition records and their repository.
//!
//! Definitions are the persisted recipe for an agent: instruction text, model
//! connection, tool references, flags.  The repository performs CRUD against
//! the document store, seeds the built-in set on first start, and notifies the
//! hot-reload loader through a watch channel whenever anything changes.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::lucia::agent::AgentSkill;
use crate::lucia::store::{collections, DocumentStore, StoreError};

/// Reference to one tool on one tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolReference {
    pub server_id: String,
    pub tool_name: String,
}

/// Persisted recipe for materialising an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    /// Stable identifier; doubles as the agent-card name.
    pub id: String,
    pub display_name: String,
    pub description: String,
    /// System-instruction text.  Canonical (server-owned) for built-ins.
    pub instructions: String,
    /// Model-provider id; `None` falls back to the `default-chat` provider.
    #[serde(default)]
    pub model_connection_name: Option<String>,
    #[serde(default)]
    pub embedding_provider_name: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolReference>,
    /// Skills surfaced on the agent card; the router samples their examples.
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    #[serde(default)]
    pub is_built_in: bool,
    /// The agent lives in a satellite process and is dispatched over A2A.
    #[serde(default)]
    pub is_remote: bool,
    /// Endpoint of the satellite process; required when `is_remote`.
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub is_orchestrator: bool,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentDefinition {
    /// Minimal enabled definition; timestamps are set to now.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            display_name: display_name.into(),
            description: description.into(),
            instructions: instructions.into(),
            model_connection_name: None,
            embedding_provider_name: None,
            tools: Vec::new(),
            skills: Vec::new(),
            is_built_in: false,
            is_remote: false,
            remote_url: None,
            is_orchestrator: false,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn built_in(mut self) -> Self {
        self.is_built_in = true;
        self
    }

    pub fn with_tool(mut self, server_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        self.tools.push(ToolReference {
            server_id: server_id.into(),
            tool_name: tool_name.into(),
        });
        self
    }

    pub fn with_model_connection(mut self, provider_id: impl Into<String>) -> Self {
        self.model_connection_name = Some(provider_id.into());
        self
    }

    pub fn with_skill(mut self, skill: AgentSkill) -> Self {
        self.skills.push(skill);
        self
    }
}

/// Errors surfaced by the repository.
#[derive(Debug)]
pub enum DefinitionError {
    NotFound(String),
    /// Built-in definitions cannot be deleted.
    BuiltInProtected(String),
    Store(StoreError),
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionError::NotFound(id) => write!(f, "agent definition not found: {}", id),
            DefinitionError::BuiltInProtected(id) => {
                write!(f, "agent definition {} is built-in and cannot be deleted", id)
            }
            DefinitionError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl Error for DefinitionError {}

impl From<StoreError> for DefinitionError {
    fn from(e: StoreError) -> Self {
        DefinitionError::Store(e)
    }
}

/// CRUD over agent definitions with change notification.
pub struct AgentDefinitionRepository {
    store: Arc<dyn DocumentStore>,
    changes: watch::Sender<u64>,
}

impl AgentDefinitionRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (changes, _) = watch::channel(0);
        Self { store, changes }
    }

    /// Subscribe to change notifications; the value is a monotonically bumped
    /// generation counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    pub async fn list(&self) -> Result<Vec<AgentDefinition>, DefinitionError> {
        let docs = self.store.list(collections::AGENT_DEFINITIONS).await?;
        let mut definitions = Vec::with_capacity(docs.len());
        for doc in docs {
            match serde_json::from_value::<AgentDefinition>(doc) {
                Ok(def) => definitions.push(def),
                Err(e) => log::warn!("definition: skipping malformed document: {}", e),
            }
        }
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(definitions)
    }

    pub async fn get(&self, id: &str) -> Result<Option<AgentDefinition>, DefinitionError> {
        let doc = self.store.get(collections::AGENT_DEFINITIONS, id).await?;
        match doc {
            Some(doc) => {
                let def = serde_json::from_value(doc)
                    .map_err(|e| DefinitionError::Store(StoreError::Serialization(e.to_string())))?;
                Ok(Some(def))
            }
            None => Ok(None),
        }
    }

    /// Insert or update a definition.
    ///
    /// Built-in records keep their canonical instruction text and their
    /// built-in flag across dashboard edits.
    pub async fn upsert(&self, mut definition: AgentDefinition) -> Result<(), DefinitionError> {
        if let Some(existing) = self.get(&definition.id).await? {
            if existing.is_built_in {
                definition.is_built_in = true;
                definition.instructions = existing.instructions;
            }
            definition.created_at = existing.created_at;
        }
        definition.updated_at = Utc::now();

        let doc = serde_json::to_value(&definition)
            .map_err(|e| DefinitionError::Store(StoreError::Serialization(e.to_string())))?;
        self.store
            .put(collections::AGENT_DEFINITIONS, &definition.id, doc)
            .await?;
        self.notify();
        Ok(())
    }

    /// Delete a definition; built-ins are protected.
    pub async fn delete(&self, id: &str) -> Result<(), DefinitionError> {
        match self.get(id).await? {
            None => Err(DefinitionError::NotFound(id.to_string())),
            Some(def) if def.is_built_in => Err(DefinitionError::BuiltInProtected(id.to_string())),
            Some(_) => {
                self.store.delete(collections::AGENT_DEFINITIONS, id).await?;
                self.notify();
                Ok(())
            }
        }
    }

    /// Seed the built-in set.
    ///
    /// Missing definitions are inserted; present ones get their instruction and
    /// description text refreshed to the canonical version while user-editable
    /// fields (enabled flag, model connection, tool list) are preserved.
    pub async fn seed_builtins(
        &self,
        builtins: Vec<AgentDefinition>,
    ) -> Result<(), DefinitionError> {
        for mut canonical in builtins {
            canonical.is_built_in = true;
            match self.get(&canonical.id).await? {
                None => {
                    let doc = serde_json::to_value(&canonical).map_err(|e| {
                        DefinitionError::Store(StoreError::Serialization(e.to_string()))
                    })?;
                    self.store
                        .put(collections::AGENT_DEFINITIONS, &canonical.id, doc)
                        .await?;
                }
                Some(mut existing) => {
                    existing.is_built_in = true;
                    existing.instructions = canonical.instructions;
                    existing.description = canonical.description;
                    existing.updated_at = Utc::now();
                    let doc = serde_json::to_value(&existing).map_err(|e| {
                        DefinitionError::Store(StoreError::Serialization(e.to_string()))
                    })?;
                    self.store
                        .put(collections::AGENT_DEFINITIONS, &existing.id, doc)
                        .await?;
                }
            }
        }
        self.notify();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lucia::store::InMemoryDocumentStore;

    fn repository() -> AgentDefinitionRepository {
        AgentDefinitionRepository::new(Arc::new(InMemoryDocumentStore::new()))
    }

    #[tokio::test]
    async fn builtins_cannot_be_deleted() {
        let repo = repository();
        repo.seed_builtins(vec![AgentDefinition::new(
            "general-assistant",
            "General Assistant",
            "Handles anything",
            "You are a helpful assistant.",
        )])
        .await
        .unwrap();

        match repo.delete("general-assistant").await {
            Err(DefinitionError::BuiltInProtected(id)) => assert_eq!(id, "general-assistant"),
            other => panic!("expected BuiltInProtected, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn builtin_instructions_are_canonical() {
        let repo = repository();
        repo.seed_builtins(vec![AgentDefinition::new(
            "light-agent",
            "Light Agent",
            "Controls lights",
            "canonical instructions",
        )])
        .await
        .unwrap();

        let mut edited = repo.get("light-agent").await.unwrap().unwrap();
        edited.instructions = "user override".to_string();
        edited.enabled = false;
        repo.upsert(edited).await.unwrap();

        let stored = repo.get("light-agent").await.unwrap().unwrap();
        assert_eq!(stored.instructions, "canonical instructions");
        assert!(!stored.enabled, "user-editable fields must persist");
    }

    #[tokio::test]
    async fn mutations_notify_subscribers() {
        let repo = repository();
        let rx = repo.subscribe();
        let before = *rx.borrow();

        repo.upsert(AgentDefinition::new("a", "A", "desc", "inst"))
            .await
            .unwrap();
        assert!(*rx.borrow() > before);
    }
}
