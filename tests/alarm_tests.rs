use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use lucia::aggregate::ResultAggregator;
use lucia::alarm::{AlarmClock, AlarmClockService, AlarmSound};
use lucia::cache::PromptCache;
use lucia::client_wrapper::{ChatClient, Message, ToolDefinition};
use lucia::config::{
    AggregatorConfig, CacheConfig, DispatchConfig, RouterConfig, SessionConfig,
};
use lucia::dispatch::Dispatcher;
use lucia::hub::{EntityLocator, HubError, HubService, OccupiedArea, PresenceService};
use lucia::orchestrator::Orchestrator;
use lucia::registry::AgentRegistry;
use lucia::router::Router;
use lucia::scheduled::runner::TaskRunner;
use lucia::scheduled::store::ScheduledTaskStore;
use lucia::scheduled::task::{AlarmSpec, ScheduledTask, TaskKind, TaskStatus, PRESENCE_TARGET};
use lucia::session::SessionStore;
use lucia::store::{DocumentStore, InMemoryDocumentStore};
use lucia::trace::TraceStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

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

struct FixedPresence(Vec<OccupiedArea>);

#[async_trait]
impl PresenceService for FixedPresence {
    async fn occupied_areas(
        &self,
    ) -> Result<Vec<OccupiedArea>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.0.clone())
    }
}

struct FixedLocator(Option<String>);

#[async_trait]
impl EntityLocator for FixedLocator {
    async fn media_player_in_area(
        &self,
        _area_id: &str,
    ) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.0.clone())
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
    runner: Arc<TaskRunner>,
    alarms: Arc<AlarmClockService>,
    hub: Arc<RecordingHub>,
}

fn fixture(
    hub: Arc<RecordingHub>,
    presence: Vec<OccupiedArea>,
    locator: Option<String>,
) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let documents: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
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
        Arc::new(FixedPresence(presence)),
        Arc::new(FixedLocator(locator)),
        orchestrator,
        alarms.clone(),
    ));

    Fixture { runner, alarms, hub }
}

fn alarm_task(id: &str, spec: AlarmSpec) -> ScheduledTask {
    ScheduledTask::new(id, "wake up", Utc::now(), TaskKind::Alarm(spec)).unwrap()
}

fn basic_spec(auto_dismiss_secs: u64, interval_secs: u64) -> AlarmSpec {
    AlarmSpec {
        alarm_clock_id: "clock-1".to_string(),
        target_entity: "media_player.bedroom".to_string(),
        alarm_sound_uri: Some("media-source://sounds/gentle.wav".to_string()),
        playback_interval_seconds: interval_secs,
        auto_dismiss_after_seconds: auto_dismiss_secs,
        volume_start: None,
        volume_end: None,
        volume_ramp_seconds: None,
    }
}

#[tokio::test]
async fn auto_dismiss_bounds_the_loop_even_with_a_huge_interval() {
    let fx = fixture(RecordingHub::new(), vec![], None);
    let task = alarm_task("a1", basic_spec(1, 300));

    let started = Instant::now();
    let status = fx.runner.execute(&task).await.unwrap();

    assert_eq!(status, TaskStatus::AutoDismissed);
    assert!(started.elapsed() < Duration::from_secs(3));

    let calls = fx.hub.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, "play_media");
    assert_eq!(calls[0].2["entity_id"], "media_player.bedroom");
    assert_eq!(calls[0].2["announce"], true);
}

#[tokio::test]
async fn volume_ramp_precedes_each_playback_and_rises() {
    let fx = fixture(RecordingHub::new(), vec![], None);
    let mut spec = basic_spec(3, 1);
    spec.volume_start = Some(0.1);
    spec.volume_end = Some(0.8);
    spec.volume_ramp_seconds = Some(2);

    let status = fx.runner.execute(&alarm_task("a2", spec)).await.unwrap();
    assert_eq!(status, TaskStatus::AutoDismissed);

    let calls = fx.hub.calls().await;
    assert!(calls.len() >= 4, "expected several ramp/play pairs, got {}", calls.len());

    // Calls alternate volume_set → play_media with a non-decreasing volume.
    let mut volumes = Vec::new();
    for pair in calls.chunks(2) {
        assert_eq!(pair[0].1, "volume_set");
        if pair.len() == 2 {
            assert_eq!(pair[1].1, "play_media");
        }
        volumes.push(pair[0].2["volume_level"].as_f64().unwrap());
    }
    assert!((volumes[0] - 0.1).abs() < 0.05);
    assert!(volumes.windows(2).all(|w| w[1] >= w[0] - 1e-9));
    assert!(*volumes.last().unwrap() <= 0.8 + 1e-9);
}

#[tokio::test]
async fn playback_failure_in_one_iteration_does_not_stop_the_alarm() {
    let fx = fixture(RecordingHub::failing_first(1), vec![], None);
    let status = fx
        .runner
        .execute(&alarm_task("a3", basic_spec(2, 1)))
        .await
        .unwrap();

    assert_eq!(status, TaskStatus::AutoDismissed);
    // First play_media failed; later iterations still reached the hub.
    let calls = fx.hub.calls().await;
    assert!(calls.iter().any(|c| c.1 == "play_media"));
}

#[tokio::test]
async fn presence_target_with_no_occupancy_aborts_without_hub_calls() {
    let fx = fixture(RecordingHub::new(), vec![], None);
    let mut spec = basic_spec(1, 1);
    spec.target_entity = PRESENCE_TARGET.to_string();

    let status = fx.runner.execute(&alarm_task("a4", spec)).await.unwrap();
    assert_eq!(status, TaskStatus::Failed);
    assert!(fx.hub.calls().await.is_empty());
}

#[tokio::test]
async fn presence_target_resolves_the_most_confident_area() {
    let fx = fixture(
        RecordingHub::new(),
        vec![
            OccupiedArea {
                area_id: "kitchen".to_string(),
                name: "Kitchen".to_string(),
                confidence: 0.4,
            },
            OccupiedArea {
                area_id: "bedroom".to_string(),
                name: "Bedroom".to_string(),
                confidence: 0.9,
            },
        ],
        Some("media_player.bedroom_speaker".to_string()),
    );
    let mut spec = basic_spec(1, 300);
    spec.target_entity = PRESENCE_TARGET.to_string();

    let status = fx.runner.execute(&alarm_task("a5", spec)).await.unwrap();
    assert_eq!(status, TaskStatus::AutoDismissed);

    let calls = fx.hub.calls().await;
    assert_eq!(calls[0].2["entity_id"], "media_player.bedroom_speaker");
}

#[tokio::test]
async fn missing_sound_uri_falls_back_to_a_tts_announcement() {
    let fx = fixture(RecordingHub::new(), vec![], None);
    let mut spec = basic_spec(1, 300);
    spec.alarm_sound_uri = None;

    fx.runner.execute(&alarm_task("a6", spec)).await.unwrap();

    let calls = fx.hub.calls().await;
    assert_eq!(calls[0].0, "assist_satellite");
    assert_eq!(calls[0].1, "announce");
    assert_eq!(calls[0].2["message"], "Alarm: wake up");
}

#[tokio::test]
async fn dismissal_stops_the_loop_and_records_the_clock() {
    let fx = fixture(RecordingHub::new(), vec![], None);
    fx.alarms
        .upsert_clock(AlarmClock {
            id: "clock-1".to_string(),
            name: "weekday wake".to_string(),
            target_entity: "media_player.bedroom".to_string(),
            alarm_sound_id: None,
            cron_schedule: None,
            next_fire_at: Some(Utc::now()),
            playback_interval_seconds: 30,
            auto_dismiss_after_seconds: 600,
            volume_start: None,
            volume_end: None,
            volume_ramp_seconds: None,
            last_dismissed_at: None,
            is_enabled: true,
        })
        .await
        .unwrap();

    let task = alarm_task("a7", basic_spec(30, 300));
    let runner = fx.runner.clone();
    let task_clone = task.clone();
    let handle = tokio::spawn(async move { runner.execute(&task_clone).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(fx.alarms.dismiss("a7").await);

    let status = handle.await.unwrap().unwrap();
    assert_eq!(status, TaskStatus::Dismissed);

    let clock = fx.alarms.get_clock("clock-1").await.unwrap().unwrap();
    assert!(clock.last_dismissed_at.is_some());
    // One-shot clock: firing clears the schedule and disables it.
    assert_eq!(clock.next_fire_at, None);
    assert!(!clock.is_enabled);
}

#[tokio::test]
async fn snooze_reopens_the_task_with_a_future_fire_time() {
    let fx = fixture(RecordingHub::new(), vec![], None);
    let task_store = ScheduledTaskStore::new();

    let task = alarm_task("a8", basic_spec(30, 300));
    let runner = fx.runner.clone();
    let task_clone = task.clone();
    let handle = tokio::spawn(async move { runner.execute(&task_clone).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        fx.alarms
            .snooze(&task_store, "a8", Duration::from_secs(540))
            .await
    );

    let status = handle.await.unwrap().unwrap();
    assert_eq!(status, TaskStatus::Snoozed);

    let reopened = task_store.get("a8").await.unwrap();
    assert_eq!(reopened.status, TaskStatus::Pending);
    assert!(reopened.fire_at > Utc::now() + ChronoDuration::minutes(8));
}

#[tokio::test]
async fn recurring_clock_advances_after_the_alarm_finishes() {
    let fx = fixture(RecordingHub::new(), vec![], None);
    fx.alarms
        .upsert_clock(AlarmClock {
            id: "clock-1".to_string(),
            name: "weekday wake".to_string(),
            target_entity: "media_player.bedroom".to_string(),
            alarm_sound_id: None,
            cron_schedule: Some("0 7 * * 1-5".to_string()),
            next_fire_at: None,
            playback_interval_seconds: 30,
            auto_dismiss_after_seconds: 600,
            volume_start: None,
            volume_end: None,
            volume_ramp_seconds: None,
            last_dismissed_at: None,
            is_enabled: true,
        })
        .await
        .unwrap();

    fx.runner
        .execute(&alarm_task("a9", basic_spec(1, 300)))
        .await
        .unwrap();

    let clock = fx.alarms.get_clock("clock-1").await.unwrap().unwrap();
    assert!(clock.is_enabled);
    let next = clock.next_fire_at.unwrap();
    assert!(next > Utc::now());
}

#[tokio::test]
async fn due_clocks_spawn_alarm_tasks_with_their_sound() {
    let fx = fixture(RecordingHub::new(), vec![], None);
    let task_store = ScheduledTaskStore::new();

    fx.alarms
        .upsert_sound(AlarmSound {
            id: "gentle".to_string(),
            name: "Gentle".to_string(),
            media_uri: "media-source://sounds/gentle.wav".to_string(),
            uploaded_via_lucia: true,
            is_default: true,
        })
        .await
        .unwrap();

    fx.alarms
        .upsert_clock(AlarmClock {
            id: "clock-2".to_string(),
            name: "nap end".to_string(),
            target_entity: "media_player.bedroom".to_string(),
            alarm_sound_id: None,
            cron_schedule: None,
            next_fire_at: Some(Utc::now() - ChronoDuration::seconds(1)),
            playback_interval_seconds: 30,
            auto_dismiss_after_seconds: 600,
            volume_start: None,
            volume_end: None,
            volume_ramp_seconds: None,
            last_dismissed_at: None,
            is_enabled: true,
        })
        .await
        .unwrap();

    let spawned = fx.alarms.spawn_due_tasks(&task_store, Utc::now()).await;
    assert_eq!(spawned, 1);

    let tasks = task_store.snapshot().await;
    assert_eq!(tasks.len(), 1);
    match &tasks[0].kind {
        TaskKind::Alarm(spec) => {
            assert_eq!(
                spec.alarm_sound_uri.as_deref(),
                Some("media-source://sounds/gentle.wav")
            );
            assert_eq!(spec.alarm_clock_id, "clock-2");
        }
        other => panic!("expected an alarm task, got {:?}", other),
    }

    // One-shot clock disabled itself after spawning.
    let clock = fx.alarms.get_clock("clock-2").await.unwrap().unwrap();
    assert!(!clock.is_enabled);
    assert_eq!(clock.next_fire_at, None);

    // Deleting the uploaded sound hands the record back for media cleanup.
    let removed = fx.alarms.delete_sound("gentle").await.unwrap().unwrap();
    assert!(removed.uploaded_via_lucia);
}
