//! Orchestrator façade: the `Router → Dispatch → Aggregate` pipeline.
//!
//! One call to [`Orchestrator::handle`] takes an utterance from the hub through
//! normalisation, the per-session lock, the routing cache, the router, parallel
//! dispatch, and aggregation, then persists the turn and a pipeline-level trace
//! record.  A routing-cache hit skips the router but never the dispatcher — the
//! decision is cached, the action still runs.
//!
//! The façade is re-entrant: deferred agent tasks call
//! [`Orchestrator::handle`] (or [`Orchestrator::handle_directed`] when they
//! carry an explicit target) exactly the way a live request does.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::lucia::agent::AgentResponse;
use crate::lucia::aggregate::{AggregatedReply, ResultAggregator};
use crate::lucia::cache::{fingerprint, normalize_prompt, CacheNamespace, PromptCache};
use crate::lucia::dispatch::Dispatcher;
use crate::lucia::router::{Router, RouterError, RoutingDecision};
use crate::lucia::session::SessionStore;
use crate::lucia::trace::{TraceRecord, TraceStore};

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReply {
    /// Aggregated user-facing text.
    pub text: String,
    /// The decision that drove dispatch (cached or fresh).
    pub decision: RoutingDecision,
    /// Individual agent responses in declaration order.
    pub responses: Vec<AgentResponse>,
    /// Whether the decision came from the routing cache.
    pub routed_from_cache: bool,
}

/// The pipeline entry point.
pub struct Orchestrator {
    router: Router,
    dispatcher: Dispatcher,
    aggregator: ResultAggregator,
    sessions: Arc<SessionStore>,
    cache: Arc<PromptCache>,
    trace_store: Arc<TraceStore>,
    /// Salt for routing-cache fingerprints; the routing model id.
    routing_salt: String,
    /// When set, successful single-agent replies are also cached in the agent
    /// namespace and replayed on identical prompts.  Off by default: device
    /// commands must re-run even when the wording repeats.
    response_cache_enabled: bool,
}

impl Orchestrator {
    pub fn new(
        router: Router,
        dispatcher: Dispatcher,
        aggregator: ResultAggregator,
        sessions: Arc<SessionStore>,
        cache: Arc<PromptCache>,
        trace_store: Arc<TraceStore>,
        routing_salt: impl Into<String>,
    ) -> Self {
        Self {
            router,
            dispatcher,
            aggregator,
            sessions,
            cache,
            trace_store,
            routing_salt: routing_salt.into(),
            response_cache_enabled: false,
        }
    }

    /// Enable replaying cached agent responses (builder pattern).
    pub fn with_response_cache(mut self) -> Self {
        self.response_cache_enabled = true;
        self
    }

    /// Handle one utterance end to end.
    pub async fn handle(
        &self,
        prompt: &str,
        session_id: Option<&str>,
    ) -> Result<PipelineReply, RouterError> {
        let normalized = normalize_prompt(prompt);
        if normalized.is_empty() {
            return Err(RouterError::EmptyMessage);
        }

        // Serialize turns per session, first-come first-served.
        let session_lock = match session_id {
            Some(id) => Some(self.sessions.lock_for(id).await),
            None => None,
        };
        let _session_guard = match &session_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let session = match session_id {
            Some(id) => self.sessions.get(id).await,
            None => None,
        };
        let pinned = session.as_ref().and_then(|s| s.pinned_agent_id.clone());

        // Volatile context never enters the fingerprint: only the normalised
        // prompt and the pin participate.
        let salt = match &pinned {
            Some(agent) => format!("{}\u{1f}{}", self.routing_salt, agent),
            None => self.routing_salt.clone(),
        };
        let fp = fingerprint(&normalized, &salt);

        let (decision, routed_from_cache) = match self.lookup_cached_decision(&fp).await {
            Some(decision) => (decision, true),
            None => {
                let decision = match &pinned {
                    Some(agent) => RoutingDecision::direct(agent.clone()),
                    None => self.router.route(&normalized).await?,
                };
                self.store_decision(&fp, &decision).await;
                (decision, false)
            }
        };

        let history = session
            .as_ref()
            .map(|s| s.history_messages())
            .unwrap_or_default();

        if self.response_cache_enabled && decision.additional_agents.is_empty() {
            let agent_fp = fingerprint(&normalized, &self.agent_salt(&decision.agent_id));
            if let Some(cached) = self.cache.get(CacheNamespace::Agent, &agent_fp).await {
                if let Some(text) = cached.as_str() {
                    return Ok(self
                        .finish(
                            prompt,
                            session_id,
                            decision,
                            Vec::new(),
                            text.to_string(),
                            routed_from_cache,
                        )
                        .await);
                }
            }
        }

        let started = Instant::now();
        let responses = self
            .dispatcher
            .dispatch(&decision, &normalized, &history, session_id)
            .await;
        let reply = self.aggregator.aggregate(&responses);

        if self.response_cache_enabled
            && decision.additional_agents.is_empty()
            && responses.len() == 1
            && responses[0].success
        {
            let agent_fp = fingerprint(&normalized, &self.agent_salt(&decision.agent_id));
            self.cache
                .put(CacheNamespace::Agent, &agent_fp, serde_json::json!(reply.text))
                .await;
        }

        self.record_pipeline_trace(&normalized, &reply, started.elapsed().as_millis() as u64)
            .await;

        Ok(self
            .finish(prompt, session_id, decision, responses, reply.text, routed_from_cache)
            .await)
    }

    /// Handle an utterance with a pre-decided target, bypassing the router.
    ///
    /// Used by deferred agent tasks that carry a `target_agent_id`.
    pub async fn handle_directed(
        &self,
        prompt: &str,
        session_id: Option<&str>,
        target_agent_id: &str,
    ) -> Result<PipelineReply, RouterError> {
        let normalized = normalize_prompt(prompt);
        if normalized.is_empty() {
            return Err(RouterError::EmptyMessage);
        }

        let decision = RoutingDecision::direct(target_agent_id);
        let history = match session_id {
            Some(id) => self
                .sessions
                .get(id)
                .await
                .map(|s| s.history_messages())
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let started = Instant::now();
        let responses = self
            .dispatcher
            .dispatch(&decision, &normalized, &history, session_id)
            .await;
        let reply = self.aggregator.aggregate(&responses);
        self.record_pipeline_trace(&normalized, &reply, started.elapsed().as_millis() as u64)
            .await;

        Ok(self
            .finish(prompt, session_id, decision, responses, reply.text, false)
            .await)
    }

    fn agent_salt(&self, agent_id: &str) -> String {
        format!("{}\u{1f}{}", agent_id, self.routing_salt)
    }

    async fn lookup_cached_decision(&self, fp: &str) -> Option<RoutingDecision> {
        let payload = self.cache.get(CacheNamespace::Router, fp).await?;
        match serde_json::from_value(payload) {
            Ok(decision) => Some(decision),
            Err(e) => {
                log::warn!("orchestrator: dropping malformed cached decision: {}", e);
                None
            }
        }
    }

    async fn store_decision(&self, fp: &str, decision: &RoutingDecision) {
        match serde_json::to_value(decision) {
            Ok(payload) => self.cache.put(CacheNamespace::Router, fp, payload).await,
            Err(e) => log::warn!("orchestrator: failed to serialise decision: {}", e),
        }
    }

    async fn record_pipeline_trace(&self, prompt: &str, reply: &AggregatedReply, duration_ms: u64) {
        self.trace_store
            .record(TraceRecord {
                trace_id: Uuid::new_v4().to_string(),
                agent_id: reply
                    .succeeded
                    .first()
                    .or_else(|| reply.failed.first())
                    .cloned()
                    .unwrap_or_else(|| "orchestrator".to_string()),
                timestamp: Utc::now(),
                prompt: prompt.to_string(),
                response: reply.text.clone(),
                tool_calls: Vec::new(),
                duration_ms,
                success: !reply.succeeded.is_empty(),
                label: Some("pipeline".to_string()),
            })
            .await;
    }

    async fn finish(
        &self,
        prompt: &str,
        session_id: Option<&str>,
        decision: RoutingDecision,
        responses: Vec<AgentResponse>,
        text: String,
        routed_from_cache: bool,
    ) -> PipelineReply {
        if let Some(id) = session_id {
            self.sessions.append_turn(id, "user", prompt).await;
            self.sessions.append_turn(id, "assistant", &text).await;
        }

        PipelineReply {
            text,
            decision,
            responses,
            routed_from_cache,
        }
    }

    /// Cache statistics for the admin channel.
    pub async fn cache_stats(&self, namespace: CacheNamespace) -> crate::lucia::cache::CacheStats {
        self.cache.stats(namespace).await
    }

    /// Clear one cache namespace from the admin channel.
    pub async fn clear_cache(&self, namespace: CacheNamespace) {
        self.cache.clear(namespace).await;
    }
}
