//! Request router: one LLM call that picks the agent(s) for an utterance.
//!
//! The router renders the live agent catalog (id, description, sampled example
//! utterances), sends it with the user's request to the routing model as a
//! JSON-constrained low-temperature call, and validates the returned
//! [`RoutingDecision`] against the registry.  Unknown agents are replaced with
//! the configured fallback, low confidence is converted into a clarification
//! decision, and a routing model that times out or keeps producing garbage
//! never surfaces an error — the caller always gets a usable decision.
//!
//! Only input validation is allowed to fail: an empty message is rejected
//! before any model call is made.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::lucia::client_wrapper::{ChatClient, Message};
use crate::lucia::config::RouterConfig;
use crate::lucia::registry::AgentRegistry;

/// Structured routing decision emitted by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub agent_id: String,
    /// Model confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Extra agents to dispatch after the primary, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_agents: Vec<String>,
}

impl RoutingDecision {
    /// Decision pointing at a single agent with full confidence; used when a
    /// deferred task carries an explicit target and the router is bypassed.
    pub fn direct(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            confidence: 1.0,
            reasoning: None,
            additional_agents: Vec::new(),
        }
    }

    fn fallback(agent_id: &str, reasoning: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            confidence: 0.0,
            reasoning: Some(reasoning.into()),
            additional_agents: Vec::new(),
        }
    }
}

/// Validation errors; the only router failures visible at the interface boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// The message was empty or whitespace-only.
    EmptyMessage,
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::EmptyMessage => write!(f, "message must not be empty"),
        }
    }
}

impl Error for RouterError {}

const ROUTER_SYSTEM_PROMPT: &str = "You are the request router for a home-automation assistant. \
Given a user request and a catalog of available agents, pick the single agent best suited to \
handle the request. Respond ONLY with a JSON object of the form \
{\"agentId\": string, \"confidence\": number between 0 and 1, \"reasoning\": string, \
\"additionalAgents\": [string]}. Use additionalAgents only when the request genuinely needs \
more than one agent.";

/// The request router.
pub struct Router {
    registry: Arc<AgentRegistry>,
    chat: Arc<dyn ChatClient>,
    config: RouterConfig,
}

impl Router {
    pub fn new(registry: Arc<AgentRegistry>, chat: Arc<dyn ChatClient>, config: RouterConfig) -> Self {
        Self {
            registry,
            chat,
            config,
        }
    }

    /// Route one user message to a validated decision.
    pub async fn route(&self, message: &str) -> Result<RoutingDecision, RouterError> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(RouterError::EmptyMessage);
        }

        let agents = self.registry.routable().await;
        if agents.is_empty() {
            return Ok(RoutingDecision::fallback(
                &self.config.fallback_agent_id,
                "no agents available",
            ));
        }

        let catalog: Vec<CatalogEntry> = agents
            .iter()
            .map(|a| CatalogEntry::from_card(&a.card, self.config.max_catalog_examples))
            .collect();
        let known_ids: Vec<&str> = catalog.iter().map(|c| c.id.as_str()).collect();

        let messages = [
            Message::system(ROUTER_SYSTEM_PROMPT),
            Message::user(render_routing_prompt(trimmed, &catalog)),
        ];

        let mut decision = None;
        for attempt in 1..=self.config.max_attempts {
            let call = self.chat.send_json(&messages, self.config.temperature);
            let response = match tokio::time::timeout(self.config.call_timeout, call).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    log::warn!("router: routing call failed (attempt {}): {}", attempt, e);
                    continue;
                }
                Err(_) => {
                    log::warn!("router: routing call timed out (attempt {})", attempt);
                    return Ok(RoutingDecision::fallback(
                        &self.config.fallback_agent_id,
                        "routing model timed out",
                    ));
                }
            };

            match parse_decision(&response.content) {
                Some(parsed) => {
                    decision = Some(parsed);
                    break;
                }
                None => {
                    log::warn!(
                        "router: malformed routing response (attempt {}): {}",
                        attempt,
                        response.content
                    );
                }
            }
        }

        let decision = match decision {
            Some(d) => d,
            None => RoutingDecision::fallback(
                &self.config.fallback_agent_id,
                "routing model returned no valid decision",
            ),
        };

        Ok(self.validate(decision, &known_ids))
    }

    /// Normalise a raw decision against the enumerated agent set.
    fn validate(&self, mut decision: RoutingDecision, known_ids: &[&str]) -> RoutingDecision {
        decision.confidence = decision.confidence.clamp(0.0, 1.0);

        if !known_ids.contains(&decision.agent_id.as_str()) {
            let unknown = std::mem::take(&mut decision.agent_id);
            return RoutingDecision::fallback(
                &self.config.fallback_agent_id,
                format!("unknown agent id: {}", unknown),
            );
        }

        // Dedupe the extras, drop the primary and anything not in the catalog.
        let primary = decision.agent_id.clone();
        let mut seen = Vec::new();
        decision.additional_agents.retain(|id| {
            let keep = *id != primary && known_ids.contains(&id.as_str()) && !seen.contains(id);
            if keep {
                seen.push(id.clone());
            }
            keep
        });

        if decision.confidence < self.config.confidence_threshold {
            return RoutingDecision {
                agent_id: self.config.clarification_agent_id.clone(),
                confidence: decision.confidence,
                reasoning: decision.reasoning,
                additional_agents: Vec::new(),
            };
        }

        decision
    }
}

/// One catalog line shown to the routing model.
struct CatalogEntry {
    id: String,
    description: String,
    examples: Vec<String>,
}

impl CatalogEntry {
    fn from_card(card: &crate::lucia::agent::AgentCard, max_examples: usize) -> Self {
        let examples = card
            .skills
            .iter()
            .flat_map(|skill| skill.examples.iter().cloned())
            .take(max_examples)
            .collect();
        Self {
            id: card.name.clone(),
            description: card.description.clone(),
            examples,
        }
    }
}

fn render_routing_prompt(message: &str, catalog: &[CatalogEntry]) -> String {
    let mut prompt = String::new();
    prompt.push_str("User request:\n");
    prompt.push_str(message);
    prompt.push_str("\n\nAvailable agents:\n");
    for entry in catalog {
        prompt.push_str("- ");
        prompt.push_str(&entry.id);
        prompt.push_str(": ");
        prompt.push_str(&entry.description);
        prompt.push('\n');
        for example in &entry.examples {
            prompt.push_str("  example: \"");
            prompt.push_str(example);
            prompt.push_str("\"\n");
        }
    }
    prompt
}

/// Extract and deserialise the first JSON object embedded in `text`.
///
/// Routing models occasionally wrap their JSON in prose or code fences even
/// with a response-format constraint, so the parser scans for a balanced
/// object instead of trusting the whole body.
fn parse_decision(text: &str) -> Option<RoutingDecision> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + offset + ch.len_utf8()];
                    return serde_json::from_str::<RoutingDecision>(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}
