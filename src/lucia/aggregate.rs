//! Result aggregation: agent responses → one user-facing message.
//!
//! The aggregator is deliberately dumb.  All-success runs concatenate the
//! agents' confirmations with punctuation normalised; partial failures explain
//! which parts failed using each failed response's error text; total failure
//! and empty dispatches render the configured fallback message.  Output is
//! plain text — structured artifacts ride along as metadata, never rendered.

use crate::lucia::agent::AgentResponse;
use crate::lucia::config::AggregatorConfig;

/// The aggregated reply handed back to the hub.
#[derive(Debug, Clone)]
pub struct AggregatedReply {
    pub text: String,
    /// Agent ids that answered successfully, in dispatch order.
    pub succeeded: Vec<String>,
    /// Agent ids that failed, in dispatch order.
    pub failed: Vec<String>,
}

/// Collapses dispatch results into a single reply.
pub struct ResultAggregator {
    config: AggregatorConfig,
}

impl ResultAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    /// Render the responses; order is preserved from the decision.
    pub fn aggregate(&self, responses: &[AgentResponse]) -> AggregatedReply {
        let succeeded: Vec<&AgentResponse> = responses.iter().filter(|r| r.success).collect();
        let failed: Vec<&AgentResponse> = responses.iter().filter(|r| !r.success).collect();

        let text = if responses.is_empty() || succeeded.is_empty() {
            self.config.fallback_message.clone()
        } else if failed.is_empty() {
            join_sentences(succeeded.iter().map(|r| r.content.as_str()))
        } else {
            let mut text = join_sentences(succeeded.iter().map(|r| r.content.as_str()));
            text.push(' ');
            text.push_str(&join_sentences(failed.iter().map(|r| {
                r.error.as_deref().unwrap_or("an unknown error occurred")
            })));
            text
        };

        AggregatedReply {
            text,
            succeeded: succeeded.iter().map(|r| r.agent_id.clone()).collect(),
            failed: failed.iter().map(|r| r.agent_id.clone()).collect(),
        }
    }
}

/// Join fragments into one paragraph, normalising terminal punctuation.
fn join_sentences<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for part in parts {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(trimmed);
        if !trimmed.ends_with('.') && !trimmed.ends_with('!') && !trimmed.ends_with('?') {
            out.push('.');
        }
    }
    out
}
