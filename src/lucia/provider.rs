//! Model-provider records and the resolver that turns them into clients.
//!
//! A [`ModelProvider`] row describes where a model lives (provider type,
//! endpoint, model name, credentials); the [`ModelProviderResolver`] turns a row
//! into a ready-to-use [`ChatClient`] or [`EmbeddingGenerator`].  Constructed
//! clients are memoized per provider id and invalidated when the record is
//! updated, so agent rebuilds reuse warm HTTP state.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::lucia::agent::LocalAgent;
use crate::lucia::client_wrapper::{ChatClient, EmbeddingGenerator};
use crate::lucia::clients::azure::{AzureInferenceClient, AzureOpenAiClient};
use crate::lucia::clients::common::get_shared_http_client;
use crate::lucia::clients::ollama::OllamaClient;
use crate::lucia::clients::openai_compat::OpenAiCompatClient;

/// Well-known id of the provider used when an agent definition names no model
/// connection.
pub const DEFAULT_CHAT_PROVIDER_ID: &str = "default-chat";

/// The upstream dialect a provider record speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Any endpoint speaking the OpenAI Chat Completions dialect.
    OpenAiCompatible,
    /// Azure OpenAI resource (deployment in the URL path, `api-key` header).
    AzureOpenAi,
    /// Azure AI Inference catalog endpoint.
    AzureInference,
    /// Local or remote Ollama daemon.
    Ollama,
    /// Provider that yields a pre-built agent rather than a raw chat client.
    AgentProvider,
}

/// What the provider is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPurpose {
    Chat,
    Embedding,
}

/// Credential material attached to a provider record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum ProviderAuth {
    /// Explicit API key stored with the record.
    ApiKey { api_key: String },
    /// Resolve a token from the process's ambient identity at construction time.
    DefaultCredentials,
}

/// Persisted description of one model connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProvider {
    /// Stable identifier; at most one enabled record may carry it.
    pub id: String,
    pub kind: ProviderKind,
    pub purpose: ProviderPurpose,
    /// Endpoint root, e.g. `"https://api.openai.com/v1"` or a resource URL.
    pub endpoint: String,
    /// Model identifier or Azure deployment name.
    pub model_name: String,
    pub auth: ProviderAuth,
    pub enabled: bool,
    pub is_built_in: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Errors surfaced while resolving a provider record into a client.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// No enabled record exists under the requested id.
    NotFound(String),
    /// The record exists but is disabled.
    Disabled(String),
    /// The record asks for ambient credentials and no credential provider is wired.
    NoCredentialSource(String),
    /// The record's kind/purpose combination cannot produce the requested client.
    WrongPurpose { id: String, expected: &'static str },
    /// An `agent-provider` record has no pre-built agent registered.
    AgentNotRegistered(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::NotFound(id) => write!(f, "model provider not found: {}", id),
            ProviderError::Disabled(id) => write!(f, "model provider disabled: {}", id),
            ProviderError::NoCredentialSource(id) => write!(
                f,
                "model provider {} requires default credentials but no credential source is configured",
                id
            ),
            ProviderError::WrongPurpose { id, expected } => {
                write!(f, "model provider {} is not a {} provider", id, expected)
            }
            ProviderError::AgentNotRegistered(id) => {
                write!(f, "no pre-built agent registered for provider {}", id)
            }
        }
    }
}

impl Error for ProviderError {}

/// Source of ambient identity tokens for records using
/// [`ProviderAuth::DefaultCredentials`].
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Obtain a bearer token for the given endpoint.
    async fn access_token(&self, endpoint: &str) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// Outcome of resolving a chat provider.
///
/// Almost all records yield a plain client; `agent-provider` records yield a
/// pre-built agent, and the agent builder skips its own composition for those.
#[derive(Clone)]
pub enum ChatResolution {
    Client(Arc<dyn ChatClient>),
    Agent(Arc<LocalAgent>),
}

/// Resolves provider records into memoized clients.
pub struct ModelProviderResolver {
    records: RwLock<HashMap<String, ModelProvider>>,
    chat_cache: RwLock<HashMap<String, Arc<dyn ChatClient>>>,
    embedding_cache: RwLock<HashMap<String, Arc<dyn EmbeddingGenerator>>>,
    prebuilt_agents: RwLock<HashMap<String, Arc<LocalAgent>>>,
    credential_source: Option<Arc<dyn CredentialSource>>,
}

impl ModelProviderResolver {
    /// Create an empty resolver with no credential source.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            chat_cache: RwLock::new(HashMap::new()),
            embedding_cache: RwLock::new(HashMap::new()),
            prebuilt_agents: RwLock::new(HashMap::new()),
            credential_source: None,
        }
    }

    /// Attach an ambient-identity credential source (builder pattern).
    pub fn with_credential_source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.credential_source = Some(source);
        self
    }

    /// Insert or replace a provider record, invalidating any memoized client.
    pub async fn upsert(&self, record: ModelProvider) {
        let id = record.id.clone();
        self.records.write().await.insert(id.clone(), record);
        self.chat_cache.write().await.remove(&id);
        self.embedding_cache.write().await.remove(&id);
    }

    /// Remove a provider record and its memoized client.
    pub async fn remove(&self, id: &str) {
        self.records.write().await.remove(id);
        self.chat_cache.write().await.remove(id);
        self.embedding_cache.write().await.remove(id);
    }

    /// Fetch a copy of the record under `id`, if any.
    pub async fn get(&self, id: &str) -> Option<ModelProvider> {
        self.records.read().await.get(id).cloned()
    }

    /// Register a pre-built agent to back an `agent-provider` record.
    pub async fn register_prebuilt_agent(&self, provider_id: &str, agent: Arc<LocalAgent>) {
        self.prebuilt_agents
            .write()
            .await
            .insert(provider_id.to_string(), agent);
    }

    async fn enabled_record(&self, id: &str) -> Result<ModelProvider, ProviderError> {
        let records = self.records.read().await;
        match records.get(id) {
            None => Err(ProviderError::NotFound(id.to_string())),
            Some(r) if !r.enabled => Err(ProviderError::Disabled(id.to_string())),
            Some(r) => Ok(r.clone()),
        }
    }

    async fn api_key_for(&self, record: &ModelProvider) -> Result<String, Box<dyn Error + Send + Sync>> {
        match &record.auth {
            ProviderAuth::ApiKey { api_key } => Ok(api_key.clone()),
            ProviderAuth::DefaultCredentials => match &self.credential_source {
                Some(source) => source.access_token(&record.endpoint).await,
                None => Err(Box::new(ProviderError::NoCredentialSource(record.id.clone()))),
            },
        }
    }

    /// Resolve a chat client (or pre-built agent) for the record under `id`.
    ///
    /// Plain clients are memoized per provider id; the cache entry is dropped
    /// whenever [`upsert`](Self::upsert) touches the record.
    pub async fn chat_client(
        &self,
        id: &str,
    ) -> Result<ChatResolution, Box<dyn Error + Send + Sync>> {
        let record = self.enabled_record(id).await?;
        if record.purpose != ProviderPurpose::Chat {
            return Err(Box::new(ProviderError::WrongPurpose {
                id: id.to_string(),
                expected: "chat",
            }));
        }

        if record.kind == ProviderKind::AgentProvider {
            let agents = self.prebuilt_agents.read().await;
            return match agents.get(id) {
                Some(agent) => Ok(ChatResolution::Agent(agent.clone())),
                None => Err(Box::new(ProviderError::AgentNotRegistered(id.to_string()))),
            };
        }

        if let Some(client) = self.chat_cache.read().await.get(id) {
            return Ok(ChatResolution::Client(client.clone()));
        }

        let client: Arc<dyn ChatClient> = match record.kind {
            ProviderKind::OpenAiCompatible => {
                let key = self.api_key_for(&record).await?;
                Arc::new(OpenAiCompatClient::new(&record.endpoint, &key, &record.model_name))
            }
            ProviderKind::AzureOpenAi => {
                let key = self.api_key_for(&record).await?;
                Arc::new(AzureOpenAiClient::new(&record.endpoint, &key, &record.model_name))
            }
            ProviderKind::AzureInference => {
                let key = self.api_key_for(&record).await?;
                Arc::new(AzureInferenceClient::new(&record.endpoint, &key, &record.model_name))
            }
            ProviderKind::Ollama => {
                Arc::new(OllamaClient::new(&record.endpoint, &record.model_name))
            }
            ProviderKind::AgentProvider => unreachable!("handled above"),
        };

        // Double-checked under the write lock so concurrent resolvers agree on
        // one instance.
        let mut cache = self.chat_cache.write().await;
        let entry = cache.entry(id.to_string()).or_insert_with(|| client);
        Ok(ChatResolution::Client(entry.clone()))
    }

    /// Resolve an embedding generator for the record under `id`.
    pub async fn embedding_client(
        &self,
        id: &str,
    ) -> Result<Arc<dyn EmbeddingGenerator>, Box<dyn Error + Send + Sync>> {
        let record = self.enabled_record(id).await?;
        if record.purpose != ProviderPurpose::Embedding {
            return Err(Box::new(ProviderError::WrongPurpose {
                id: id.to_string(),
                expected: "embedding",
            }));
        }

        if let Some(client) = self.embedding_cache.read().await.get(id) {
            return Ok(client.clone());
        }

        let key = match record.kind {
            ProviderKind::Ollama => String::from("ollama"),
            _ => self.api_key_for(&record).await?,
        };
        let client: Arc<dyn EmbeddingGenerator> =
            Arc::new(HttpEmbeddingClient::new(&record, &key));

        let mut cache = self.embedding_cache.write().await;
        let entry = cache.entry(id.to_string()).or_insert_with(|| client);
        Ok(entry.clone())
    }
}

impl Default for ModelProviderResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Embedding generator speaking the OpenAI-compatible `/embeddings` dialect.
///
/// Azure endpoints authenticate with the `api-key` header; everything else uses
/// a bearer token.  Ollama serves the same dialect under `/v1`.
struct HttpEmbeddingClient {
    url: String,
    model: String,
    headers: Vec<(String, String)>,
}

impl HttpEmbeddingClient {
    fn new(record: &ModelProvider, api_key: &str) -> Self {
        let root = record.endpoint.trim_end_matches('/');
        let (url, headers) = match record.kind {
            ProviderKind::AzureOpenAi => (
                format!(
                    "{}/openai/deployments/{}/embeddings?api-version={}",
                    root, record.model_name, AZURE_EMBEDDINGS_API_VERSION
                ),
                vec![("api-key".to_string(), api_key.to_string())],
            ),
            ProviderKind::Ollama => (
                format!("{}/v1/embeddings", root),
                vec![("Authorization".to_string(), "Bearer ollama".to_string())],
            ),
            _ => (
                format!("{}/embeddings", root),
                vec![(
                    "Authorization".to_string(),
                    format!("Bearer {}", api_key),
                )],
            ),
        };
        Self {
            url,
            model: record.model_name.clone(),
            headers,
        }
    }
}

const AZURE_EMBEDDINGS_API_VERSION: &str = "2024-06-01";

#[async_trait]
impl EmbeddingGenerator for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, Box<dyn Error + Send + Sync>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let mut request = get_shared_http_client().post(&self.url).json(&body);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let resp = request.send().await?;
        let status = resp.status();
        let parsed: serde_json::Value = resp.json().await?;
        if !status.is_success() {
            return Err(format!("embeddings endpoint returned HTTP {}", status).into());
        }

        let vector = parsed
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|d| d.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| -> Box<dyn Error + Send + Sync> {
                "embeddings response carried no vector".into()
            })?
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect();

        Ok(vector)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, kind: ProviderKind, purpose: ProviderPurpose, enabled: bool) -> ModelProvider {
        ModelProvider {
            id: id.to_string(),
            kind,
            purpose,
            endpoint: "http://localhost:1234/v1".to_string(),
            model_name: "test-model".to_string(),
            auth: ProviderAuth::ApiKey {
                api_key: "k".to_string(),
            },
            enabled,
            is_built_in: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn chat_client_is_memoized_until_upsert() {
        let resolver = ModelProviderResolver::new();
        resolver
            .upsert(record("p1", ProviderKind::OpenAiCompatible, ProviderPurpose::Chat, true))
            .await;

        let first = match resolver.chat_client("p1").await.unwrap() {
            ChatResolution::Client(c) => c,
            ChatResolution::Agent(_) => panic!("expected client"),
        };
        let second = match resolver.chat_client("p1").await.unwrap() {
            ChatResolution::Client(c) => c,
            ChatResolution::Agent(_) => panic!("expected client"),
        };
        assert!(Arc::ptr_eq(&first, &second));

        resolver
            .upsert(record("p1", ProviderKind::OpenAiCompatible, ProviderPurpose::Chat, true))
            .await;
        let third = match resolver.chat_client("p1").await.unwrap() {
            ChatResolution::Client(c) => c,
            ChatResolution::Agent(_) => panic!("expected client"),
        };
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn disabled_and_missing_records_are_rejected() {
        let resolver = ModelProviderResolver::new();
        resolver
            .upsert(record("off", ProviderKind::Ollama, ProviderPurpose::Chat, false))
            .await;

        assert!(resolver.chat_client("off").await.is_err());
        assert!(resolver.chat_client("absent").await.is_err());
    }

    #[tokio::test]
    async fn purpose_mismatch_is_rejected() {
        let resolver = ModelProviderResolver::new();
        resolver
            .upsert(record("e1", ProviderKind::OpenAiCompatible, ProviderPurpose::Embedding, true))
            .await;

        assert!(resolver.chat_client("e1").await.is_err());
        assert!(resolver.embedding_client("e1").await.is_ok());
    }
}
