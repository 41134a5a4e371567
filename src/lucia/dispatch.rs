//! Dispatch executor: runs the agents a routing decision selected.
//!
//! Local agents are invoked in-process with the caller's session history;
//! remote agents are reached through the A2A client.  Every invocation runs
//! under the configured timeout, transient failures (connection resets, HTTP
//! 5xx, network timeouts) are retried on a fixed delay, and everything else
//! fails fast.  Multiple agents dispatch concurrently but results come back in
//! the decision's declaration order, and dropping the dispatch future cancels
//! every in-flight call.
//!
//! Each invocation leaves a span in the trace store tagged `agent.id`,
//! `agent.local`, `agent.success`, and `agent.duration_ms`.

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::future::join_all;

use crate::lucia::a2a::{A2aClient, A2aError};
use crate::lucia::agent::AgentResponse;
use crate::lucia::client_wrapper::Message;
use crate::lucia::config::DispatchConfig;
use crate::lucia::registry::{AgentBackend, AgentRegistry, RegisteredAgent};
use crate::lucia::router::RoutingDecision;
use crate::lucia::trace::{SpanRecord, TraceStore};

/// Decide whether an invocation failure may be retried.
///
/// Transient classes are connection-level failures, network timeouts, and
/// server-side 5xx answers.  Logical failures — tool errors, malformed
/// payloads, unknown agents — are not retried at this layer.
fn is_transient(error: &(dyn Error + 'static)) -> bool {
    if let Some(a2a) = error.downcast_ref::<A2aError>() {
        return a2a.is_transient();
    }
    if let Some(req) = error.downcast_ref::<reqwest::Error>() {
        if req.is_timeout() || req.is_connect() {
            return true;
        }
        if let Some(status) = req.status() {
            return status.is_server_error();
        }
        return false;
    }
    // Wire helpers fold HTTP failures into message strings; recognise the
    // server-error shape they produce.
    error.to_string().contains("HTTP 5")
}

/// Runs routing decisions against the registry.
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    config: DispatchConfig,
    trace_store: Arc<TraceStore>,
}

impl Dispatcher {
    pub fn new(registry: Arc<AgentRegistry>, config: DispatchConfig, trace_store: Arc<TraceStore>) -> Self {
        Self {
            registry,
            config,
            trace_store,
        }
    }

    /// Invoke every agent in `[primary, ...additional]` concurrently and return
    /// their responses in declaration order.
    pub async fn dispatch(
        &self,
        decision: &RoutingDecision,
        prompt: &str,
        history: &[Message],
        session_id: Option<&str>,
    ) -> Vec<AgentResponse> {
        let mut agent_ids = Vec::with_capacity(1 + decision.additional_agents.len());
        agent_ids.push(decision.agent_id.clone());
        agent_ids.extend(decision.additional_agents.iter().cloned());

        // Concurrency without detaching: dropping this future drops the joined
        // invocations, which cancels their in-flight calls.
        let invocations = agent_ids
            .iter()
            .map(|agent_id| self.invoke_agent(agent_id, prompt, history, session_id));
        join_all(invocations).await
    }

    /// Invoke one agent with timeout, retry, and span capture.
    pub async fn invoke_agent(
        &self,
        agent_id: &str,
        prompt: &str,
        history: &[Message],
        session_id: Option<&str>,
    ) -> AgentResponse {
        let started = Instant::now();
        let started_at = Utc::now();

        let entry = match self.registry.get(agent_id).await {
            Some(entry) => entry,
            None => {
                return AgentResponse::failure(
                    agent_id,
                    format!("agent not found: {}", agent_id),
                    started.elapsed().as_millis() as u64,
                );
            }
        };

        let is_local = matches!(entry.backend, AgentBackend::Local(_));
        let mut response = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }

            let outcome = self
                .invoke_once(&entry, agent_id, prompt, history, session_id, started)
                .await;

            match outcome {
                Ok(success) => {
                    response = Some(success);
                    break;
                }
                Err(RetryVerdict::Fatal(failed)) => {
                    response = Some(failed);
                    break;
                }
                Err(RetryVerdict::Transient(failed)) => {
                    log::warn!(
                        "dispatch: transient failure from {} (attempt {}): {}",
                        agent_id,
                        attempt + 1,
                        failed.error.as_deref().unwrap_or("unknown")
                    );
                    response = Some(failed);
                }
            }
        }

        let response = response.unwrap_or_else(|| {
            AgentResponse::failure(agent_id, "no invocation attempted", 0)
        });

        let mut tags = HashMap::new();
        tags.insert("agent.id".to_string(), serde_json::json!(agent_id));
        tags.insert("agent.local".to_string(), serde_json::json!(is_local));
        tags.insert("agent.success".to_string(), serde_json::json!(response.success));
        tags.insert(
            "agent.duration_ms".to_string(),
            serde_json::json!(response.duration_ms),
        );
        self.trace_store
            .record_span(SpanRecord {
                name: "agent.invoke".to_string(),
                started_at,
                duration_ms: response.duration_ms,
                tags,
            })
            .await;

        response
    }

    async fn invoke_once(
        &self,
        entry: &Arc<RegisteredAgent>,
        agent_id: &str,
        prompt: &str,
        history: &[Message],
        session_id: Option<&str>,
        started: Instant,
    ) -> Result<AgentResponse, RetryVerdict> {
        let elapsed = |started: Instant| started.elapsed().as_millis() as u64;

        match &entry.backend {
            AgentBackend::Local(agent) => {
                let call = agent.invoke(prompt, history);
                match tokio::time::timeout(self.config.default_timeout, call).await {
                    Ok(Ok(output)) => Ok(AgentResponse {
                        agent_id: agent_id.to_string(),
                        content: output.content,
                        success: true,
                        error: None,
                        duration_ms: elapsed(started),
                        tool_calls: output.tool_calls,
                    }),
                    Ok(Err(e)) => {
                        let failed = AgentResponse::failure(agent_id, e.to_string(), elapsed(started));
                        if is_transient(e.as_ref()) {
                            Err(RetryVerdict::Transient(failed))
                        } else {
                            Err(RetryVerdict::Fatal(failed))
                        }
                    }
                    Err(_) => Err(RetryVerdict::Fatal(AgentResponse::failure(
                        agent_id,
                        format!("agent timed out after {:?}", self.config.default_timeout),
                        elapsed(started),
                    ))),
                }
            }
            AgentBackend::Remote { url } => {
                let client = A2aClient::new(url.as_str()).with_timeout(self.config.default_timeout);
                match client
                    .send_message(prompt, session_id.map(|s| s.to_string()))
                    .await
                {
                    Ok(content) => {
                        entry.set_reachable(true);
                        Ok(AgentResponse {
                            agent_id: agent_id.to_string(),
                            content,
                            success: true,
                            error: None,
                            duration_ms: elapsed(started),
                            tool_calls: Vec::new(),
                        })
                    }
                    Err(e) => {
                        let transient = e.is_transient();
                        if transient {
                            entry.set_reachable(false);
                        }
                        let failed = AgentResponse::failure(agent_id, e.to_string(), elapsed(started));
                        if transient {
                            Err(RetryVerdict::Transient(failed))
                        } else {
                            Err(RetryVerdict::Fatal(failed))
                        }
                    }
                }
            }
        }
    }
}

/// Retry classification carrying the failed response for when the budget runs out.
enum RetryVerdict {
    Transient(AgentResponse),
    Fatal(AgentResponse),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_covers_the_retry_taxonomy() {
        let reset: Box<dyn Error + Send + Sync> =
            Box::new(A2aError::Transport("connection reset".to_string()));
        assert!(is_transient(reset.as_ref()));

        let five_xx: Box<dyn Error + Send + Sync> = Box::new(A2aError::ServerStatus(502));
        assert!(is_transient(five_xx.as_ref()));

        let rpc: Box<dyn Error + Send + Sync> = Box::new(A2aError::Rpc {
            code: -32601,
            message: "method not found".to_string(),
        });
        assert!(!is_transient(rpc.as_ref()));

        let wire: Box<dyn Error + Send + Sync> =
            "chat endpoint returned HTTP 503 — overloaded".into();
        assert!(is_transient(wire.as_ref()));

        let logical: Box<dyn Error + Send + Sync> = "tool not found: lights".into();
        assert!(!is_transient(logical.as_ref()));
    }
}
