use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use lucia::aggregate::ResultAggregator;
use lucia::alarm::AlarmClockService;
use lucia::cache::PromptCache;
use lucia::client_wrapper::{ChatClient, Message, ToolDefinition};
use lucia::config::{
    AggregatorConfig, CacheConfig, DispatchConfig, RouterConfig, SchedulerConfig, SessionConfig,
};
use lucia::dispatch::Dispatcher;
use lucia::hub::{EntityLocator, HubError, HubService, OccupiedArea, PresenceService};
use lucia::orchestrator::Orchestrator;
use lucia::registry::AgentRegistry;
use lucia::router::Router;
use lucia::scheduled::runner::TaskRunner;
use lucia::scheduled::service::SchedulerService;
use lucia::scheduled::store::ScheduledTaskStore;
use lucia::scheduled::task::{ScheduledTask, TaskKind, TimerSpec};
use lucia::session::SessionStore;
use lucia::store::{collections, DocumentStore, InMemoryDocumentStore};
use lucia::trace::TraceStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Hub double that records every service call and can fail the first N.
struct RecordingHub {
    calls: Mutex<Vec<(String, String, serde_json::Value)>>,
    fail_first: AtomicUsize,
}

impl RecordingHub {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_first: AtomicUsize::new(0),
        })
    }

    fn failing_first(n: usize) -> Arc<Self> {
        let hub = Self::new();
        hub.fail_first.store(n, Ordering::SeqCst);
        hub
    }

    async fn calls(&self) -> Vec<(String, String, serde_json::Value)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl HubService for RecordingHub {
    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        payload: serde_json::Value,
    ) -> Result<(), HubError> {
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(HubError::Status(502));
        }
        self.calls
            .lock()
            .await
            .push((domain.to_string(), service.to_string(), payload));
        Ok(())
    }
}

struct NoPresence;

#[async_trait]
impl PresenceService for NoPresence {
    async fn occupied_areas(
        &self,
    ) -> Result<Vec<OccupiedArea>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Vec::new())
    }
}

struct NoLocator;

#[async_trait]
impl EntityLocator for NoLocator {
    async fn media_player_in_area(
        &self,
        _area_id: &str,
    ) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(None)
    }
}

struct SilentRouterClient;

#[async_trait]
impl ChatClient for SilentRouterClient {
    async fn send_message(
        &self,
        _messages: &[Message],
        _tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Message::assistant(
            r#"{"agentId": "general-assistant", "confidence": 1.0}"#,
        ))
    }

    fn model_name(&self) -> &str {
        "mock-router"
    }
}

struct Fixture {
    service: Arc<SchedulerService>,
    store: Arc<ScheduledTaskStore>,
    documents: Arc<dyn DocumentStore>,
    hub: Arc<RecordingHub>,
}

fn fixture_with_hub(hub: Arc<RecordingHub>) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let documents: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let store = Arc::new(ScheduledTaskStore::new());
    let registry = Arc::new(AgentRegistry::new());
    let trace_store = Arc::new(TraceStore::new(64));

    let orchestrator = Arc::new(Orchestrator::new(
        Router::new(registry.clone(), Arc::new(SilentRouterClient), RouterConfig::default()),
        Dispatcher::new(registry, DispatchConfig::default(), trace_store.clone()),
        ResultAggregator::new(AggregatorConfig::default()),
        Arc::new(SessionStore::new(SessionConfig::default())),
        Arc::new(PromptCache::new(CacheConfig::default())),
        trace_store,
        "mock-router",
    ));

    let alarms = Arc::new(AlarmClockService::new(documents.clone()));
    let runner = Arc::new(TaskRunner::new(
        hub.clone(),
        Arc::new(NoPresence),
        Arc::new(NoLocator),
        orchestrator,
        alarms.clone(),
    ));

    let service = Arc::new(SchedulerService::new(
        store.clone(),
        documents.clone(),
        runner,
        alarms,
        SchedulerConfig {
            poll_interval: Duration::from_millis(50),
            max_recovery_age: Duration::from_secs(30 * 60),
        },
    ));

    Fixture {
        service,
        store,
        documents,
        hub,
    }
}

fn due_timer(id: &str) -> ScheduledTask {
    ScheduledTask::new(
        id,
        "tea timer",
        Utc::now() - ChronoDuration::seconds(1),
        TaskKind::Timer(TimerSpec {
            message: "Tea is ready".to_string(),
            entity_id: "assist_satellite.kitchen".to_string(),
            duration_seconds: 180,
        }),
    )
    .unwrap()
}

async fn wait_for_drain(fx: &Fixture) {
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if fx.store.is_empty().await {
            // Give the fire-and-forget execution a beat to persist.
            tokio::time::sleep(Duration::from_millis(50)).await;
            return;
        }
    }
}

#[tokio::test]
async fn expired_timer_fires_exactly_once() {
    let fx = fixture_with_hub(RecordingHub::new());
    fx.service.schedule(due_timer("t1")).await.unwrap();

    // Several ticks observe the expired task; only the remover fires it.
    fx.service.tick().await;
    fx.service.tick().await;
    fx.service.tick().await;
    wait_for_drain(&fx).await;

    let calls = fx.hub.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "assist_satellite");
    assert_eq!(calls[0].1, "announce");
    assert_eq!(calls[0].2["message"], "Tea is ready");
}

#[tokio::test]
async fn completed_status_is_persisted() {
    let fx = fixture_with_hub(RecordingHub::new());
    fx.service.schedule(due_timer("t2")).await.unwrap();
    fx.service.tick().await;
    wait_for_drain(&fx).await;

    let doc = fx
        .documents
        .get(collections::SCHEDULED_TASKS, "t2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc["status"], "Completed");
}

#[tokio::test]
async fn hub_failure_marks_the_task_failed() {
    let fx = fixture_with_hub(RecordingHub::failing_first(10));
    fx.service.schedule(due_timer("t3")).await.unwrap();
    fx.service.tick().await;
    wait_for_drain(&fx).await;

    let doc = fx
        .documents
        .get(collections::SCHEDULED_TASKS, "t3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc["status"], "Failed");
    assert!(fx.hub.calls().await.is_empty());
}

#[tokio::test]
async fn future_tasks_do_not_fire() {
    let fx = fixture_with_hub(RecordingHub::new());
    let mut task = due_timer("t4");
    task.fire_at = Utc::now() + ChronoDuration::hours(1);
    fx.service.schedule(task).await.unwrap();

    fx.service.tick().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(fx.store.len().await, 1);
    assert!(fx.hub.calls().await.is_empty());
}

#[tokio::test]
async fn cancelled_tasks_never_execute() {
    let fx = fixture_with_hub(RecordingHub::new());
    let mut task = due_timer("t5");
    task.fire_at = Utc::now() + ChronoDuration::hours(1);
    fx.service.schedule(task).await.unwrap();

    assert!(fx.service.cancel("t5").await);
    fx.service.tick().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(fx.hub.calls().await.is_empty());
    let doc = fx
        .documents
        .get(collections::SCHEDULED_TASKS, "t5")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc["status"], "Cancelled");
}
