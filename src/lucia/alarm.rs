//! Alarm clocks and alarm sounds.
//!
//! An [`AlarmClock`] is the persisted definition — recurring (cron) or
//! one-shot — that spawns alarm scheduled-tasks when `next_fire_at` arrives.
//! The [`AlarmClockService`] owns clock and sound CRUD, spawns due tasks into
//! the scheduled-task store, tracks ringing alarms so they can be dismissed or
//! snoozed, and advances schedules after firing.
//!
//! Invariants: a cron clock's `next_fire_at` is always derived from the
//! expression, never set by hand; a one-shot clock clears `next_fire_at` and
//! disables itself after firing.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

use crate::lucia::cron;
use crate::lucia::scheduled::store::ScheduledTaskStore;
use crate::lucia::scheduled::task::{AlarmSpec, ScheduledTask, TaskKind, TaskStatus};
use crate::lucia::store::{collections, DocumentStore, StoreError};

/// Persisted alarm-clock definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmClock {
    pub id: String,
    pub name: String,
    /// Entity id, or `"presence"` for fire-time resolution.
    pub target_entity: String,
    /// Reference into the sound catalog; `None` uses the default sound, or TTS
    /// when no default exists.
    #[serde(default)]
    pub alarm_sound_id: Option<String>,
    /// Standard 5-field cron; `None` makes the clock one-shot.
    #[serde(default)]
    pub cron_schedule: Option<String>,
    #[serde(default)]
    pub next_fire_at: Option<DateTime<Utc>>,
    pub playback_interval_seconds: u64,
    pub auto_dismiss_after_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_end: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_ramp_seconds: Option<u64>,
    #[serde(default)]
    pub last_dismissed_at: Option<DateTime<Utc>>,
    pub is_enabled: bool,
}

/// Persisted alarm sound.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmSound {
    pub id: String,
    pub name: String,
    /// Hub media-source URI.
    pub media_uri: String,
    /// The file was stored through the platform and its media should be
    /// removed when the sound is deleted.
    #[serde(default)]
    pub uploaded_via_lucia: bool,
    #[serde(default)]
    pub is_default: bool,
}

/// Errors from alarm-clock operations.
#[derive(Debug)]
pub enum AlarmError {
    NotFound(String),
    InvalidCron(String),
    Store(StoreError),
}

impl fmt::Display for AlarmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmError::NotFound(id) => write!(f, "alarm clock not found: {}", id),
            AlarmError::InvalidCron(expr) => write!(f, "invalid cron expression: {}", expr),
            AlarmError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl Error for AlarmError {}

impl From<StoreError> for AlarmError {
    fn from(e: StoreError) -> Self {
        AlarmError::Store(e)
    }
}

/// Control signal delivered to a ringing alarm's playback loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmSignal {
    /// Still ringing.
    Ring,
    Dismiss,
    Snooze,
}

/// A ringing alarm: its control signal plus the fired task for snoozing.
struct ActiveAlarm {
    signal: watch::Sender<AlarmSignal>,
    task: ScheduledTask,
}

/// Clock/sound CRUD, due-task spawning, and ringing-alarm control.
pub struct AlarmClockService {
    store: Arc<dyn DocumentStore>,
    active: RwLock<HashMap<String, ActiveAlarm>>,
}

impl AlarmClockService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            active: RwLock::new(HashMap::new()),
        }
    }

    async fn persist_clock(&self, clock: &AlarmClock) -> Result<(), AlarmError> {
        let doc = serde_json::to_value(clock)
            .map_err(|e| AlarmError::Store(StoreError::Serialization(e.to_string())))?;
        self.store.put(collections::ALARM_CLOCKS, &clock.id, doc).await?;
        Ok(())
    }

    /// Insert or update a clock.
    ///
    /// Cron expressions are validated, and `next_fire_at` is re-derived from
    /// the schedule for recurring clocks — callers never set it by hand.
    pub async fn upsert_clock(&self, mut clock: AlarmClock) -> Result<AlarmClock, AlarmError> {
        if let Some(expression) = &clock.cron_schedule {
            if !cron::is_valid(expression) {
                return Err(AlarmError::InvalidCron(expression.clone()));
            }
            clock.next_fire_at = None;
            cron::initialize_next_fire_at(&mut clock);
        }
        self.persist_clock(&clock).await?;
        Ok(clock)
    }

    pub async fn get_clock(&self, id: &str) -> Result<Option<AlarmClock>, AlarmError> {
        let doc = self.store.get(collections::ALARM_CLOCKS, id).await?;
        match doc {
            Some(doc) => Ok(serde_json::from_value(doc).ok()),
            None => Ok(None),
        }
    }

    pub async fn list_clocks(&self) -> Result<Vec<AlarmClock>, AlarmError> {
        let docs = self.store.list(collections::ALARM_CLOCKS).await?;
        let mut clocks = Vec::with_capacity(docs.len());
        for doc in docs {
            match serde_json::from_value::<AlarmClock>(doc) {
                Ok(clock) => clocks.push(clock),
                Err(e) => log::warn!("alarm: skipping malformed clock document: {}", e),
            }
        }
        clocks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(clocks)
    }

    pub async fn delete_clock(&self, id: &str) -> Result<bool, AlarmError> {
        Ok(self.store.delete(collections::ALARM_CLOCKS, id).await?)
    }

    /// Resolve the sound URI a clock should play: its named sound, else the
    /// catalog default, else `None` (TTS fallback).
    async fn resolve_sound_uri(&self, clock: &AlarmClock) -> Option<String> {
        let sounds = self.list_sounds().await.ok()?;
        if let Some(sound_id) = &clock.alarm_sound_id {
            return sounds.iter().find(|s| &s.id == sound_id).map(|s| s.media_uri.clone());
        }
        sounds.iter().find(|s| s.is_default).map(|s| s.media_uri.clone())
    }

    /// Spawn scheduled tasks for every enabled clock whose fire time arrived,
    /// advancing each clock's schedule.  Returns how many tasks were spawned.
    pub async fn spawn_due_tasks(
        &self,
        task_store: &ScheduledTaskStore,
        now: DateTime<Utc>,
    ) -> usize {
        let clocks = match self.list_clocks().await {
            Ok(clocks) => clocks,
            Err(e) => {
                log::error!("alarm: failed to list clocks: {}", e);
                return 0;
            }
        };

        let mut spawned = 0;
        for mut clock in clocks {
            let due = clock.is_enabled
                && clock.next_fire_at.map(|at| at <= now).unwrap_or(false);
            if !due {
                continue;
            }

            let sound_uri = self.resolve_sound_uri(&clock).await;
            let spec = AlarmSpec {
                alarm_clock_id: clock.id.clone(),
                target_entity: clock.target_entity.clone(),
                alarm_sound_uri: sound_uri,
                playback_interval_seconds: clock.playback_interval_seconds,
                auto_dismiss_after_seconds: clock.auto_dismiss_after_seconds,
                volume_start: clock.volume_start,
                volume_end: clock.volume_end,
                volume_ramp_seconds: clock.volume_ramp_seconds,
            };
            let task_id = format!("alarm-{}-{}", clock.id, now.timestamp());
            let task = match ScheduledTask::new(task_id, clock.name.clone(), now, TaskKind::Alarm(spec)) {
                Ok(task) => task,
                Err(e) => {
                    log::error!("alarm: failed to build task for clock {}: {}", clock.id, e);
                    continue;
                }
            };

            if let Err(e) = self
                .store
                .put(collections::SCHEDULED_TASKS, &task.id, task.to_document())
                .await
            {
                log::error!("alarm: failed to persist task for clock {}: {}", clock.id, e);
                continue;
            }
            task_store.insert(task).await;
            spawned += 1;

            cron::advance_schedule(&mut clock);
            if let Err(e) = self.persist_clock(&clock).await {
                log::error!("alarm: failed to persist advanced clock {}: {}", clock.id, e);
            }
        }
        spawned
    }

    /// Called by the alarm runner when its loop starts; returns the control
    /// signal the loop selects on.
    pub async fn register_active(&self, task: &ScheduledTask) -> watch::Receiver<AlarmSignal> {
        let (tx, rx) = watch::channel(AlarmSignal::Ring);
        self.active.write().await.insert(
            task.id.clone(),
            ActiveAlarm {
                signal: tx,
                task: task.clone(),
            },
        );
        rx
    }

    /// Called by the alarm runner when its loop ends.
    pub async fn finish_active(&self, task_id: &str) {
        self.active.write().await.remove(task_id);
    }

    /// Dismiss a ringing alarm; records `last_dismissed_at` on its clock.
    ///
    /// The dismissal timestamp is persisted before the loop is signalled so
    /// the runner's schedule advance cannot clobber it with a stale read.
    pub async fn dismiss(&self, task_id: &str) -> bool {
        let clock_id = {
            let active = self.active.read().await;
            match active.get(task_id) {
                Some(alarm) => match &alarm.task.kind {
                    TaskKind::Alarm(spec) => Some(spec.alarm_clock_id.clone()),
                    _ => None,
                },
                None => return false,
            }
        };

        if let Some(clock_id) = clock_id {
            if let Ok(Some(mut clock)) = self.get_clock(&clock_id).await {
                clock.last_dismissed_at = Some(Utc::now());
                if let Err(e) = self.persist_clock(&clock).await {
                    log::warn!("alarm: failed to record dismissal on {}: {}", clock_id, e);
                }
            }
        }

        let active = self.active.read().await;
        match active.get(task_id) {
            Some(alarm) => {
                let _ = alarm.signal.send(AlarmSignal::Dismiss);
                true
            }
            None => false,
        }
    }

    /// Snooze a ringing alarm: stop the loop and re-open the task as `Pending`
    /// with a fire time `delay` from now.
    pub async fn snooze(
        &self,
        task_store: &ScheduledTaskStore,
        task_id: &str,
        delay: Duration,
    ) -> bool {
        let mut task = {
            let active = self.active.read().await;
            match active.get(task_id) {
                Some(alarm) => {
                    let _ = alarm.signal.send(AlarmSignal::Snooze);
                    alarm.task.clone()
                }
                None => return false,
            }
        };

        task.status = TaskStatus::Snoozed;
        let _ = self
            .store
            .put(collections::SCHEDULED_TASKS, &task.id, task.to_document())
            .await;

        task.status = TaskStatus::Pending;
        task.fire_at = Utc::now() + chrono::Duration::seconds(delay.as_secs() as i64);
        let _ = self
            .store
            .put(collections::SCHEDULED_TASKS, &task.id, task.to_document())
            .await;
        task_store.insert(task).await;
        true
    }

    /// Advance a clock's schedule after its alarm finished ringing.
    pub async fn advance_after_fire(&self, clock_id: &str) {
        match self.get_clock(clock_id).await {
            Ok(Some(mut clock)) => {
                cron::advance_schedule(&mut clock);
                if let Err(e) = self.persist_clock(&clock).await {
                    log::warn!("alarm: failed to persist advanced clock {}: {}", clock_id, e);
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("alarm: failed to load clock {}: {}", clock_id, e),
        }
    }

    // ---- Sound catalog ----

    pub async fn upsert_sound(&self, sound: AlarmSound) -> Result<(), AlarmError> {
        let doc = serde_json::to_value(&sound)
            .map_err(|e| AlarmError::Store(StoreError::Serialization(e.to_string())))?;
        self.store.put(collections::ALARM_SOUNDS, &sound.id, doc).await?;
        Ok(())
    }

    pub async fn list_sounds(&self) -> Result<Vec<AlarmSound>, AlarmError> {
        let docs = self.store.list(collections::ALARM_SOUNDS).await?;
        let mut sounds = Vec::with_capacity(docs.len());
        for doc in docs {
            match serde_json::from_value::<AlarmSound>(doc) {
                Ok(sound) => sounds.push(sound),
                Err(e) => log::warn!("alarm: skipping malformed sound document: {}", e),
            }
        }
        sounds.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sounds)
    }

    /// Delete a sound, returning the removed record so the platform can clean
    /// up media it uploaded (`uploaded_via_lucia`).
    pub async fn delete_sound(&self, id: &str) -> Result<Option<AlarmSound>, AlarmError> {
        let doc = self.store.get(collections::ALARM_SOUNDS, id).await?;
        let sound = match doc {
            Some(doc) => serde_json::from_value::<AlarmSound>(doc).ok(),
            None => None,
        };
        if sound.is_some() {
            self.store.delete(collections::ALARM_SOUNDS, id).await?;
        }
        Ok(sound)
    }
}
