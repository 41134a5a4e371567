use async_trait::async_trait;
use lucia::agent::{AgentCard, LocalAgent};
use lucia::client_wrapper::{ChatClient, Message, ToolDefinition};
use lucia::config::DispatchConfig;
use lucia::dispatch::Dispatcher;
use lucia::registry::{AgentBackend, AgentRegistry, RegisteredAgent};
use lucia::router::RoutingDecision;
use lucia::tool_server::ToolServerRegistry;
use lucia::trace::TraceStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Chat client driven by a script of outcomes, with an optional fixed delay.
struct ScriptedClient {
    script: Vec<Result<String, String>>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl ScriptedClient {
    fn new(script: Vec<Result<String, String>>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                script,
                delay: Duration::from_millis(0),
                calls: calls.clone(),
            },
            calls,
        )
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn send_message(
        &self,
        _messages: &[Message],
        _tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = self
            .script
            .get(index)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or_else(|| Ok(String::new()));
        match outcome {
            Ok(content) => Ok(Message::assistant(&content)),
            Err(error) => Err(error.into()),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

async fn register_local(
    registry: &Arc<AgentRegistry>,
    id: &str,
    client: ScriptedClient,
) {
    let agent = LocalAgent::new(
        id,
        id,
        format!("{} description", id),
        "",
        Arc::new(client),
        Vec::new(),
        Arc::new(ToolServerRegistry::new()),
    );
    registry
        .register(RegisteredAgent::new(
            AgentCard::new(id, id, format!("{} description", id)),
            AgentBackend::Local(Arc::new(agent)),
        ))
        .await;
}

fn dispatcher(registry: Arc<AgentRegistry>, config: DispatchConfig) -> Dispatcher {
    Dispatcher::new(registry, config, Arc::new(TraceStore::new(64)))
}

#[tokio::test]
async fn unknown_agent_produces_a_failed_response() {
    let registry = Arc::new(AgentRegistry::new());
    let dispatcher = dispatcher(registry, DispatchConfig::default());

    let decision = RoutingDecision::direct("ghost");
    let responses = dispatcher.dispatch(&decision, "hello", &[], None).await;

    assert_eq!(responses.len(), 1);
    assert!(!responses[0].success);
    assert!(responses[0].error.as_deref().unwrap().contains("ghost"));
}

#[tokio::test]
async fn results_come_back_in_declaration_order() {
    let registry = Arc::new(AgentRegistry::new());
    let (slow, _) = ScriptedClient::new(vec![Ok("slow done".to_string())]);
    register_local(&registry, "slow-agent", slow.with_delay(Duration::from_millis(150))).await;
    let (fast, _) = ScriptedClient::new(vec![Ok("fast done".to_string())]);
    register_local(&registry, "fast-agent", fast).await;

    let dispatcher = dispatcher(registry, DispatchConfig::default());
    let mut decision = RoutingDecision::direct("slow-agent");
    decision.additional_agents = vec!["fast-agent".to_string()];

    let responses = dispatcher.dispatch(&decision, "go", &[], None).await;
    let order: Vec<&str> = responses.iter().map(|r| r.agent_id.as_str()).collect();
    assert_eq!(order, vec!["slow-agent", "fast-agent"]);
    assert!(responses.iter().all(|r| r.success));
}

#[tokio::test]
async fn slow_agents_time_out_without_retry() {
    let registry = Arc::new(AgentRegistry::new());
    let (client, calls) = ScriptedClient::new(vec![Ok("too late".to_string())]);
    register_local(&registry, "sleepy", client.with_delay(Duration::from_secs(5))).await;

    let config = DispatchConfig {
        default_timeout: Duration::from_millis(100),
        max_retries: 2,
        retry_delay: Duration::from_millis(10),
    };
    let dispatcher = dispatcher(registry, config);

    let responses = dispatcher
        .dispatch(&RoutingDecision::direct("sleepy"), "go", &[], None)
        .await;
    assert!(!responses[0].success);
    assert!(responses[0].error.as_deref().unwrap().contains("timed out"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_failures_are_retried_within_budget() {
    let registry = Arc::new(AgentRegistry::new());
    let (client, calls) = ScriptedClient::new(vec![
        Err("chat endpoint returned HTTP 503 — overloaded".to_string()),
        Ok("recovered".to_string()),
    ]);
    register_local(&registry, "flaky", client).await;

    let config = DispatchConfig {
        default_timeout: Duration::from_secs(5),
        max_retries: 2,
        retry_delay: Duration::from_millis(10),
    };
    let dispatcher = dispatcher(registry, config);

    let responses = dispatcher
        .dispatch(&RoutingDecision::direct("flaky"), "go", &[], None)
        .await;
    assert!(responses[0].success);
    assert_eq!(responses[0].content, "recovered");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn logical_failures_are_not_retried() {
    let registry = Arc::new(AgentRegistry::new());
    let (client, calls) = ScriptedClient::new(vec![Err("tool not found: lights".to_string())]);
    register_local(&registry, "broken", client).await;

    let config = DispatchConfig {
        default_timeout: Duration::from_secs(5),
        max_retries: 2,
        retry_delay: Duration::from_millis(10),
    };
    let dispatcher = dispatcher(registry, config);

    let responses = dispatcher
        .dispatch(&RoutingDecision::direct("broken"), "go", &[], None)
        .await;
    assert!(!responses[0].success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invocation_spans_carry_stable_tags() {
    let registry = Arc::new(AgentRegistry::new());
    let (client, _) = ScriptedClient::new(vec![Ok("done".to_string())]);
    register_local(&registry, "tagged", client).await;

    let trace_store = Arc::new(TraceStore::new(64));
    let dispatcher = Dispatcher::new(registry, DispatchConfig::default(), trace_store.clone());
    dispatcher
        .dispatch(&RoutingDecision::direct("tagged"), "go", &[], None)
        .await;

    let spans = trace_store.spans().await;
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert_eq!(span.name, "agent.invoke");
    assert_eq!(span.tags["agent.id"], serde_json::json!("tagged"));
    assert_eq!(span.tags["agent.local"], serde_json::json!(true));
    assert_eq!(span.tags["agent.success"], serde_json::json!(true));
    assert!(span.tags.contains_key("agent.duration_ms"));
}
