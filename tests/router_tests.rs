use async_trait::async_trait;
use lucia::agent::{AgentCard, AgentSkill};
use lucia::client_wrapper::{ChatClient, Message, ToolDefinition};
use lucia::config::RouterConfig;
use lucia::registry::{AgentBackend, AgentRegistry, RegisteredAgent};
use lucia::router::{Router, RouterError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Scripted routing model: returns its responses in order, then repeats the
/// last one.
struct MockRoutingClient {
    responses: Vec<String>,
    calls: AtomicUsize,
}

impl MockRoutingClient {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: responses.into_iter().map(|r| r.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatClient for MockRoutingClient {
    async fn send_message(
        &self,
        _messages: &[Message],
        _tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .responses
            .get(index)
            .or_else(|| self.responses.last())
            .cloned()
            .unwrap_or_default();
        Ok(Message::assistant(&response))
    }

    fn model_name(&self) -> &str {
        "mock-router"
    }
}

async fn registry_with(agents: &[(&str, &str)]) -> Arc<AgentRegistry> {
    let registry = Arc::new(AgentRegistry::new());
    for (id, description) in agents {
        let card = AgentCard::new(*id, *id, *description).with_skill(AgentSkill {
            id: format!("{}-skill", id),
            name: id.to_string(),
            description: description.to_string(),
            tags: vec![],
            examples: vec![format!("use {}", id)],
        });
        registry
            .register(RegisteredAgent::new(
                card,
                AgentBackend::Remote {
                    url: format!("http://localhost/a2a/{}", id),
                },
            ))
            .await;
    }
    registry
}

fn router_with(registry: Arc<AgentRegistry>, client: Arc<MockRoutingClient>) -> Router {
    Router::new(registry, client, RouterConfig::default())
}

#[tokio::test]
async fn routes_to_the_agent_named_by_the_model() {
    let registry = registry_with(&[
        ("light-agent", "Controls lights"),
        ("music-agent", "Plays music"),
    ])
    .await;
    let client = Arc::new(MockRoutingClient::new(vec![
        r#"{"agentId": "light-agent", "confidence": 0.93, "reasoning": "lights request"}"#,
    ]));
    let router = router_with(registry, client.clone());

    let decision = router.route("turn on the kitchen lights").await.unwrap();
    assert_eq!(decision.agent_id, "light-agent");
    assert!(decision.confidence >= 0.7);
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn unknown_agent_id_becomes_the_fallback() {
    let registry = registry_with(&[("general-assistant", "Handles anything")]).await;
    let client = Arc::new(MockRoutingClient::new(vec![
        r#"{"agentId": "nonexistent", "confidence": 0.99}"#,
    ]));
    let router = router_with(registry, client);

    let decision = router.route("do something").await.unwrap();
    assert_eq!(decision.agent_id, "general-assistant");
    assert!(decision
        .reasoning
        .as_deref()
        .unwrap_or("")
        .contains("nonexistent"));
}

#[tokio::test]
async fn low_confidence_becomes_a_clarification_decision() {
    let registry = registry_with(&[
        ("light-agent", "Controls lights"),
        ("general-assistant", "Handles anything"),
    ])
    .await;
    let client = Arc::new(MockRoutingClient::new(vec![
        r#"{"agentId": "light-agent", "confidence": 0.35, "reasoning": "ambiguous"}"#,
    ]));
    let mut config = RouterConfig::default();
    config.clarification_agent_id = "general-assistant".to_string();
    let router = Router::new(registry, client, config);

    let decision = router.route("do the thing").await.unwrap();
    assert_eq!(decision.agent_id, "general-assistant");
    assert!(decision.confidence < 0.7);
}

#[tokio::test]
async fn empty_message_is_rejected_before_the_model_is_called() {
    let registry = registry_with(&[("light-agent", "Controls lights")]).await;
    let client = Arc::new(MockRoutingClient::new(vec![r#"{"agentId":"light-agent","confidence":1.0}"#]));
    let router = router_with(registry, client.clone());

    assert_eq!(router.route("   ").await.unwrap_err(), RouterError::EmptyMessage);
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn zero_agents_yields_the_fallback_without_a_model_call() {
    let registry = Arc::new(AgentRegistry::new());
    let client = Arc::new(MockRoutingClient::new(vec![r#"{"agentId":"x","confidence":1.0}"#]));
    let router = router_with(registry, client.clone());

    let decision = router.route("hello").await.unwrap();
    assert_eq!(decision.agent_id, "general-assistant");
    assert_eq!(decision.reasoning.as_deref(), Some("no agents available"));
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn malformed_responses_are_retried_then_fall_back() {
    let registry = registry_with(&[("light-agent", "Controls lights")]).await;
    let client = Arc::new(MockRoutingClient::new(vec![
        "not json at all",
        "still not json",
        "nope",
    ]));
    let router = router_with(registry, client.clone());

    let decision = router.route("turn on the lights").await.unwrap();
    assert_eq!(decision.agent_id, "general-assistant");
    assert!((decision.confidence - 0.0).abs() < f64::EPSILON);
    // One call per configured attempt.
    assert_eq!(client.call_count(), RouterConfig::default().max_attempts);
}

#[tokio::test]
async fn retry_recovers_when_a_later_attempt_parses() {
    let registry = registry_with(&[("light-agent", "Controls lights")]).await;
    let client = Arc::new(MockRoutingClient::new(vec![
        "garbage",
        r#"{"agentId": "light-agent", "confidence": 0.88}"#,
    ]));
    let router = router_with(registry, client.clone());

    let decision = router.route("turn on the lights").await.unwrap();
    assert_eq!(decision.agent_id, "light-agent");
    assert_eq!(client.call_count(), 2);
}

#[tokio::test]
async fn additional_agents_are_deduplicated_and_validated() {
    let registry = registry_with(&[
        ("light-agent", "Controls lights"),
        ("music-agent", "Plays music"),
        ("climate-agent", "Adjusts climate"),
    ])
    .await;
    let client = Arc::new(MockRoutingClient::new(vec![
        r#"{"agentId": "light-agent", "confidence": 0.9,
            "additionalAgents": ["music-agent", "light-agent", "music-agent", "ghost", "climate-agent"]}"#,
    ]));
    let router = router_with(registry, client);

    let decision = router.route("movie night scene").await.unwrap();
    assert_eq!(decision.agent_id, "light-agent");
    assert_eq!(
        decision.additional_agents,
        vec!["music-agent".to_string(), "climate-agent".to_string()]
    );
}
