//! Agent construction and hot reload.
//!
//! The [`AgentBuilder`] turns one [`AgentDefinition`] into a registry entry:
//! chat client resolved (with fallback to the `default-chat` provider), tool
//! references resolved against their servers (unresolved ones skipped with a
//! log line), the client wrapped for tracing, and an [`AgentCard`] produced.
//! Remote definitions get a card pointing at their satellite endpoint and no
//! local invokable.
//!
//! The [`AgentLoader`] is the long-running service around the builder: it
//! rebuilds the registry on startup and on every repository change
//! notification.  Because the registry swaps entries atomically, a rebuild
//! never disturbs in-flight invocations.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::lucia::agent::{AgentCard, LocalAgent, ResolvedTool};
use crate::lucia::definition::{AgentDefinition, AgentDefinitionRepository};
use crate::lucia::provider::{ChatResolution, ModelProviderResolver, DEFAULT_CHAT_PROVIDER_ID};
use crate::lucia::registry::{AgentBackend, AgentRegistry, RegisteredAgent};
use crate::lucia::tool_server::ToolServerRegistry;
use crate::lucia::trace::{TraceStore, TracingChatClient};

/// Errors surfaced while materialising one agent.
#[derive(Debug)]
pub enum BuildError {
    /// Neither the named provider nor the default-chat fallback could be resolved.
    NoChatClient {
        agent_id: String,
        detail: String,
    },
    /// A remote definition carries no endpoint.
    MissingRemoteUrl(String),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::NoChatClient { agent_id, detail } => {
                write!(f, "no chat client for agent {}: {}", agent_id, detail)
            }
            BuildError::MissingRemoteUrl(id) => {
                write!(f, "remote agent {} has no endpoint URL", id)
            }
        }
    }
}

impl Error for BuildError {}

/// Composes registry entries out of definitions.
pub struct AgentBuilder {
    resolver: Arc<ModelProviderResolver>,
    tool_servers: Arc<ToolServerRegistry>,
    trace_store: Arc<TraceStore>,
}

impl AgentBuilder {
    pub fn new(
        resolver: Arc<ModelProviderResolver>,
        tool_servers: Arc<ToolServerRegistry>,
        trace_store: Arc<TraceStore>,
    ) -> Self {
        Self {
            resolver,
            tool_servers,
            trace_store,
        }
    }

    fn card_for(definition: &AgentDefinition) -> AgentCard {
        let mut card = AgentCard::new(
            definition.id.clone(),
            definition.display_name.clone(),
            definition.description.clone(),
        );
        card.skills = definition.skills.clone();
        if let Some(url) = &definition.remote_url {
            card.url = url.clone();
        }
        card
    }

    /// Resolve each tool reference, skipping ones the server cannot describe.
    async fn resolve_tools(&self, definition: &AgentDefinition) -> Vec<ResolvedTool> {
        let mut resolved = Vec::with_capacity(definition.tools.len());
        for reference in &definition.tools {
            match self
                .tool_servers
                .describe_tool(&reference.server_id, &reference.tool_name)
                .await
            {
                Ok(metadata) => resolved.push(ResolvedTool {
                    server_id: reference.server_id.clone(),
                    metadata,
                }),
                Err(e) => {
                    log::warn!(
                        "builder: agent {} skipping unresolved tool {}/{}: {}",
                        definition.id,
                        reference.server_id,
                        reference.tool_name,
                        e
                    );
                }
            }
        }
        resolved
    }

    /// Materialise one definition into a registry entry.
    pub async fn build(&self, definition: &AgentDefinition) -> Result<RegisteredAgent, BuildError> {
        if definition.is_remote {
            let url = definition
                .remote_url
                .clone()
                .ok_or_else(|| BuildError::MissingRemoteUrl(definition.id.clone()))?;
            let card = Self::card_for(definition).with_url(url.clone());
            let mut entry = RegisteredAgent::new(card, AgentBackend::Remote { url });
            if definition.is_orchestrator {
                entry = entry.orchestrator();
            }
            return Ok(entry);
        }

        let provider_id = definition
            .model_connection_name
            .as_deref()
            .unwrap_or(DEFAULT_CHAT_PROVIDER_ID);

        let resolution = match self.resolver.chat_client(provider_id).await {
            Ok(resolution) => resolution,
            Err(first_error) if provider_id != DEFAULT_CHAT_PROVIDER_ID => {
                // Named connection missing or disabled: fall back to default-chat.
                log::warn!(
                    "builder: agent {} provider {} unavailable ({}); falling back to {}",
                    definition.id,
                    provider_id,
                    first_error,
                    DEFAULT_CHAT_PROVIDER_ID
                );
                self.resolver
                    .chat_client(DEFAULT_CHAT_PROVIDER_ID)
                    .await
                    .map_err(|e| BuildError::NoChatClient {
                        agent_id: definition.id.clone(),
                        detail: e.to_string(),
                    })?
            }
            Err(e) => {
                return Err(BuildError::NoChatClient {
                    agent_id: definition.id.clone(),
                    detail: e.to_string(),
                })
            }
        };

        let agent: Arc<LocalAgent> = match resolution {
            // Agent-producing providers hand back a pre-built agent; the
            // normal composition path is skipped entirely.
            ChatResolution::Agent(prebuilt) => prebuilt,
            ChatResolution::Client(client) => {
                let traced = Arc::new(TracingChatClient::new(
                    client,
                    definition.id.clone(),
                    self.trace_store.clone(),
                ));
                let tools = self.resolve_tools(definition).await;
                Arc::new(LocalAgent::new(
                    definition.id.clone(),
                    definition.display_name.clone(),
                    definition.description.clone(),
                    definition.instructions.clone(),
                    traced,
                    tools,
                    self.tool_servers.clone(),
                ))
            }
        };

        let mut entry = RegisteredAgent::new(Self::card_for(definition), AgentBackend::Local(agent));
        if definition.is_orchestrator {
            entry = entry.orchestrator();
        }
        Ok(entry)
    }
}

/// Background service keeping the registry in sync with the repository.
pub struct AgentLoader {
    repository: Arc<AgentDefinitionRepository>,
    builder: AgentBuilder,
    registry: Arc<AgentRegistry>,
}

impl AgentLoader {
    pub fn new(
        repository: Arc<AgentDefinitionRepository>,
        builder: AgentBuilder,
        registry: Arc<AgentRegistry>,
    ) -> Self {
        Self {
            repository,
            builder,
            registry,
        }
    }

    /// Rebuild the registry from the repository; returns how many agents were
    /// registered.  Definitions that fail to build are skipped with a log line
    /// so one bad record never takes down the rest of the catalog.
    pub async fn rebuild(&self) -> usize {
        let definitions = match self.repository.list().await {
            Ok(defs) => defs,
            Err(e) => {
                log::error!("loader: failed to list agent definitions: {}", e);
                return self.registry.len().await;
            }
        };

        let mut registered_ids = Vec::new();
        for definition in definitions.iter().filter(|d| d.enabled) {
            match self.builder.build(definition).await {
                Ok(entry) => {
                    registered_ids.push(definition.id.clone());
                    self.registry.register(entry).await;
                }
                Err(e) => {
                    log::error!("loader: skipping agent {}: {}", definition.id, e);
                }
            }
        }

        self.registry.retain_ids(&registered_ids).await;
        if log::log_enabled!(log::Level::Info) {
            log::info!("loader: registry rebuilt with {} agents", registered_ids.len());
        }
        registered_ids.len()
    }

    /// Run until shutdown: initial rebuild, then one rebuild per repository
    /// change notification.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut changes = self.repository.subscribe();
        self.rebuild().await;

        loop {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    self.rebuild().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
