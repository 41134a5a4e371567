// src/lib.rs

// Import the top-level `lucia` module.
pub mod lucia;

// Re-export the module tree at the crate root so callers write
// `lucia::router::Router` instead of `lucia::lucia::router::Router`.
pub use lucia::a2a;
#[cfg(feature = "a2a-server")]
pub use lucia::a2a_server;
pub use lucia::agent;
pub use lucia::aggregate;
pub use lucia::alarm;
pub use lucia::builder;
pub use lucia::cache;
pub use lucia::client_wrapper;
pub use lucia::clients;
pub use lucia::config;
pub use lucia::cron;
pub use lucia::definition;
pub use lucia::dispatch;
pub use lucia::hub;
pub use lucia::kv;
pub use lucia::orchestrator;
pub use lucia::provider;
pub use lucia::registry;
pub use lucia::router;
pub use lucia::scheduled;
pub use lucia::session;
pub use lucia::store;
pub use lucia::tool_protocol;
pub use lucia::tool_server;
pub use lucia::trace;

// Re-exporting key items for easier external access.
pub use lucia::agent::{AgentCard, AgentResponse, LocalAgent};
pub use lucia::client_wrapper::{ChatClient, Message, Role};
pub use lucia::orchestrator::Orchestrator;
pub use lucia::router::{Router, RoutingDecision};
