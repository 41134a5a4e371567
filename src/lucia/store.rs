//! Durable document storage seam.
//!
//! The orchestration core persists its records — scheduled tasks, alarm clocks,
//! alarm sounds, agent definitions, tool servers, model providers, traces — as
//! JSON documents in named collections behind the [`DocumentStore`] trait.  The
//! deployment wires a real database adapter; the in-memory and file-backed
//! implementations here cover tests and single-node setups.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Collection names used by the core.
pub mod collections {
    pub const SCHEDULED_TASKS: &str = "scheduled_tasks";
    pub const ALARM_CLOCKS: &str = "alarm_clocks";
    pub const ALARM_SOUNDS: &str = "alarm_sounds";
    pub const AGENT_DEFINITIONS: &str = "agent_definitions";
    pub const TOOL_SERVERS: &str = "tool_servers";
    pub const MODEL_PROVIDERS: &str = "model_providers";
    pub const TRACES: &str = "traces";
}

/// Errors produced by document-store operations.
#[derive(Debug, Clone)]
pub enum StoreError {
    Io(String),
    Serialization(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(msg) => write!(f, "store I/O error: {}", msg),
            StoreError::Serialization(msg) => write!(f, "store serialization error: {}", msg),
        }
    }
}

impl Error for StoreError {}

/// A JSON document store with named collections and stable string ids.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the document under `(collection, id)`.
    async fn put(
        &self,
        collection: &str,
        id: &str,
        document: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Fetch one document.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// Delete one document; returns whether it existed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// List every document in a collection.
    async fn list(&self, collection: &str) -> Result<Vec<serde_json::Value>, StoreError>;
}

/// Volatile store used by tests and as the default when no adapter is wired.
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, HashMap<String, serde_json::Value>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn put(
        &self,
        collection: &str,
        id: &str,
        document: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_insert_with(HashMap::new)
            .insert(id.to_string(), document);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .map(|docs| docs.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn list(&self, collection: &str) -> Result<Vec<serde_json::Value>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }
}

/// Single-node store persisting each collection as one JSON file under a
/// directory.  Writes rewrite the whole collection file; adequate for the small
/// record counts a home deployment carries.
pub struct FileDocumentStore {
    dir: PathBuf,
    /// Serializes file rewrites per process.
    lock: RwLock<()>,
}

impl FileDocumentStore {
    /// Open (creating the directory if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self {
            dir,
            lock: RwLock::new(()),
        })
    }

    fn path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.json", collection))
    }

    fn read_collection(&self, collection: &str) -> Result<HashMap<String, serde_json::Value>, StoreError> {
        let path = self.path(collection);
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| StoreError::Io(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn write_collection(
        &self,
        collection: &str,
        docs: &HashMap<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(docs)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        std::fs::write(self.path(collection), raw).map_err(|e| StoreError::Io(e.to_string()))
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn put(
        &self,
        collection: &str,
        id: &str,
        document: serde_json::Value,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        let mut docs = self.read_collection(collection)?;
        docs.insert(id.to_string(), document);
        self.write_collection(collection, &docs)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let _guard = self.lock.read().await;
        Ok(self.read_collection(collection)?.get(id).cloned())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.write().await;
        let mut docs = self.read_collection(collection)?;
        let existed = docs.remove(id).is_some();
        if existed {
            self.write_collection(collection, &docs)?;
        }
        Ok(existed)
    }

    async fn list(&self, collection: &str) -> Result<Vec<serde_json::Value>, StoreError> {
        let _guard = self.lock.read().await;
        Ok(self.read_collection(collection)?.into_iter().map(|(_, v)| v).collect())
    }
}
