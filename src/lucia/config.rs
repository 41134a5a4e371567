//! Configuration for the orchestration core.
//!
//! Plain structs with sensible defaults; the embedding application constructs
//! them however it wants — no config-file parsing dependencies are introduced
//! here.

use std::time::Duration;

/// Router tuning.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum example utterances per agent in the rendered catalog.
    pub max_catalog_examples: usize,
    /// Sampling temperature for the routing call.
    pub temperature: f32,
    /// Parse/retry budget for malformed routing responses.
    pub max_attempts: usize,
    /// Decisions below this confidence become clarification decisions.
    pub confidence_threshold: f64,
    /// Budget for the routing LLM call; expiry yields a fallback decision.
    pub call_timeout: Duration,
    /// Agent substituted when the routing model fails or names an unknown agent.
    pub fallback_agent_id: String,
    /// Agent that asks the user to disambiguate low-confidence requests.
    pub clarification_agent_id: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_catalog_examples: 3,
            temperature: 0.3,
            max_attempts: 3,
            confidence_threshold: 0.7,
            call_timeout: Duration::from_secs(5),
            fallback_agent_id: "general-assistant".to_string(),
            clarification_agent_id: "general-assistant".to_string(),
        }
    }
}

/// Dispatch tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Per-agent invocation budget.
    pub default_timeout: Duration,
    /// Retry budget for transient failures.
    pub max_retries: usize,
    /// Fixed delay between retries.
    pub retry_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Bounded-LRU-plus-TTL cache tuning, shared by both cache namespaces.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry-count bound per namespace.
    pub capacity: usize,
    /// Per-entry time to live.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Session-history tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sessions idle longer than this are evicted.
    pub idle_ttl: Duration,
    /// Turns retained per session.
    pub max_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(30 * 60),
            max_turns: 40,
        }
    }
}

/// Scheduled-task engine tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Polling cadence of the firing loop.
    pub poll_interval: Duration,
    /// Tasks found more than this far past their fire time at startup are
    /// marked failed instead of rehydrated.
    pub max_recovery_age: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_recovery_age: Duration::from_secs(30 * 60),
        }
    }
}

/// Outbound hub connection settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Hub base URL, e.g. `"http://homeassistant.local:8123"`.
    pub base_url: String,
    /// Long-lived access token sent as a bearer credential.
    pub token: String,
    /// Whether to validate the hub's TLS certificate.
    pub validate_ssl: bool,
}

impl HubConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            validate_ssl: true,
        }
    }
}

/// Aggregator wording.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Message rendered when no agent produced a usable response.
    pub fallback_message: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            fallback_message: "Sorry, I wasn't able to complete that request.".to_string(),
        }
    }
}
