//! Scheduled-task model: a tagged union persisted as one document shape.
//!
//! Every task shares `id`, `taskId`, `label`, `fireAt`, and `status`; the
//! `taskType` discriminator selects the type-specific fields.  Construction
//! from a document goes through [`ScheduledTask::from_document`], which
//! validates the type-specific requirements — recovery drops records that fail
//! here rather than aborting startup.
//!
//! The `"presence"` target sentinel is only meaningful for alarms, whose
//! runner resolves it against room occupancy at fire time; any other task type
//! carrying it is rejected at construction.

use std::error::Error;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel target resolved against room occupancy at fire time.
pub const PRESENCE_TARGET: &str = "presence";

/// Lifecycle of one scheduled task.
///
/// Transitions are monotonic except `Snoozed`, which re-opens the task into
/// `Pending` with a new fire time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Active,
    Completed,
    Dismissed,
    Snoozed,
    AutoDismissed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    /// Whether the task can still fire.
    pub fn is_live(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Active)
    }
}

/// Timer payload: announce `message` on `entity_id` when the timer elapses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSpec {
    pub message: String,
    pub entity_id: String,
    pub duration_seconds: u64,
}

/// Alarm payload: loop playback on the target until dismissed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmSpec {
    /// Backreference to the spawning alarm clock.
    pub alarm_clock_id: String,
    /// Entity id, or [`PRESENCE_TARGET`] for fire-time resolution.
    pub target_entity: String,
    /// Media URI; `None` falls back to a TTS announcement.
    #[serde(default)]
    pub alarm_sound_uri: Option<String>,
    pub playback_interval_seconds: u64,
    pub auto_dismiss_after_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_end: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_ramp_seconds: Option<u64>,
}

impl AlarmSpec {
    /// Whether a volume ramp is configured (start strictly below end).
    pub fn has_volume_ramp(&self) -> bool {
        match (self.volume_start, self.volume_end) {
            (Some(start), Some(end)) => start < end,
            _ => false,
        }
    }
}

/// Deferred-prompt payload: replay `prompt` through the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTaskSpec {
    pub prompt: String,
    /// Bypass the router and dispatch straight to this agent.
    #[serde(default)]
    pub target_agent_id: Option<String>,
    /// Serialized environmental snapshot prepended to the prompt.
    #[serde(default)]
    pub entity_context: Option<String>,
}

/// The type-specific half of a task document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "taskType")]
pub enum TaskKind {
    #[serde(rename = "timer")]
    Timer(TimerSpec),
    #[serde(rename = "alarm")]
    Alarm(AlarmSpec),
    #[serde(rename = "agent")]
    Agent(AgentTaskSpec),
}

/// A live scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: String,
    /// External A2A task id.
    pub task_id: String,
    pub label: String,
    pub fire_at: DateTime<Utc>,
    pub status: TaskStatus,
    #[serde(flatten)]
    pub kind: TaskKind,
}

/// Validation failures raised by the document factory.
#[derive(Debug, Clone)]
pub enum TaskDocError {
    Malformed(String),
    MissingField(&'static str),
    /// The presence sentinel appeared on a non-alarm task.
    PresenceNotAllowed(String),
}

impl fmt::Display for TaskDocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskDocError::Malformed(msg) => write!(f, "malformed task document: {}", msg),
            TaskDocError::MissingField(field) => {
                write!(f, "task document missing required field: {}", field)
            }
            TaskDocError::PresenceNotAllowed(id) => write!(
                f,
                "task {} uses the presence target but is not an alarm",
                id
            ),
        }
    }
}

impl Error for TaskDocError {}

impl ScheduledTask {
    /// Build a new pending task with a fresh external task id.
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        fire_at: DateTime<Utc>,
        kind: TaskKind,
    ) -> Result<Self, TaskDocError> {
        let task = Self {
            id: id.into(),
            task_id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            fire_at,
            status: TaskStatus::Pending,
            kind,
        };
        task.validate()?;
        Ok(task)
    }

    /// Whether the task is due at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.fire_at
    }

    /// Discriminator string as stored in documents.
    pub fn task_type(&self) -> &'static str {
        match self.kind {
            TaskKind::Timer(_) => "timer",
            TaskKind::Alarm(_) => "alarm",
            TaskKind::Agent(_) => "agent",
        }
    }

    /// Serialise into the persisted document shape.
    pub fn to_document(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Factory: parse and validate a persisted document.
    pub fn from_document(document: serde_json::Value) -> Result<Self, TaskDocError> {
        let task: ScheduledTask = serde_json::from_value(document)
            .map_err(|e| TaskDocError::Malformed(e.to_string()))?;
        task.validate()?;
        Ok(task)
    }

    fn validate(&self) -> Result<(), TaskDocError> {
        if self.id.is_empty() {
            return Err(TaskDocError::MissingField("id"));
        }
        match &self.kind {
            TaskKind::Timer(timer) => {
                if timer.entity_id.is_empty() {
                    return Err(TaskDocError::MissingField("entityId"));
                }
                if timer.entity_id == PRESENCE_TARGET {
                    return Err(TaskDocError::PresenceNotAllowed(self.id.clone()));
                }
                if timer.message.is_empty() {
                    return Err(TaskDocError::MissingField("message"));
                }
            }
            TaskKind::Alarm(alarm) => {
                if alarm.target_entity.is_empty() {
                    return Err(TaskDocError::MissingField("targetEntity"));
                }
                if alarm.alarm_clock_id.is_empty() {
                    return Err(TaskDocError::MissingField("alarmClockId"));
                }
                if alarm.playback_interval_seconds == 0 {
                    return Err(TaskDocError::MissingField("playbackIntervalSeconds"));
                }
            }
            TaskKind::Agent(agent) => {
                if agent.prompt.is_empty() {
                    return Err(TaskDocError::MissingField("prompt"));
                }
                if agent.target_agent_id.as_deref() == Some(PRESENCE_TARGET) {
                    return Err(TaskDocError::PresenceNotAllowed(self.id.clone()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer_doc() -> serde_json::Value {
        serde_json::json!({
            "id": "t1",
            "taskId": "a2a-1",
            "label": "pasta timer",
            "fireAt": "2025-03-03T18:00:00Z",
            "status": "Pending",
            "taskType": "timer",
            "message": "Pasta is ready",
            "entityId": "assist_satellite.kitchen",
            "durationSeconds": 600
        })
    }

    #[test]
    fn document_round_trip_preserves_the_discriminator() {
        let task = ScheduledTask::from_document(timer_doc()).unwrap();
        assert_eq!(task.task_type(), "timer");
        assert_eq!(task.status, TaskStatus::Pending);

        let doc = task.to_document();
        assert_eq!(doc["taskType"], "timer");
        assert_eq!(doc["entityId"], "assist_satellite.kitchen");
        assert_eq!(doc["status"], "Pending");
    }

    #[test]
    fn presence_sentinel_is_rejected_outside_alarms() {
        let mut doc = timer_doc();
        doc["entityId"] = serde_json::json!(PRESENCE_TARGET);
        match ScheduledTask::from_document(doc) {
            Err(TaskDocError::PresenceNotAllowed(id)) => assert_eq!(id, "t1"),
            other => panic!("expected PresenceNotAllowed, got {:?}", other),
        }
    }

    #[test]
    fn presence_sentinel_is_allowed_for_alarms() {
        let doc = serde_json::json!({
            "id": "a1",
            "taskId": "a2a-2",
            "label": "wake up",
            "fireAt": "2025-03-03T07:00:00Z",
            "status": "Pending",
            "taskType": "alarm",
            "alarmClockId": "clock-1",
            "targetEntity": PRESENCE_TARGET,
            "playbackIntervalSeconds": 30,
            "autoDismissAfterSeconds": 600
        });
        let task = ScheduledTask::from_document(doc).unwrap();
        assert_eq!(task.task_type(), "alarm");
    }

    #[test]
    fn missing_required_fields_fail_the_factory() {
        let doc = serde_json::json!({
            "id": "g1",
            "taskId": "a2a-3",
            "label": "later",
            "fireAt": "2025-03-03T07:00:00Z",
            "status": "Pending",
            "taskType": "agent",
            "prompt": ""
        });
        assert!(matches!(
            ScheduledTask::from_document(doc),
            Err(TaskDocError::MissingField("prompt"))
        ));
    }

    #[test]
    fn volume_ramp_requires_start_below_end() {
        let mut alarm = AlarmSpec {
            alarm_clock_id: "c".to_string(),
            target_entity: "media_player.bedroom".to_string(),
            alarm_sound_uri: None,
            playback_interval_seconds: 30,
            auto_dismiss_after_seconds: 600,
            volume_start: Some(0.1),
            volume_end: Some(0.8),
            volume_ramp_seconds: Some(30),
        };
        assert!(alarm.has_volume_ramp());

        alarm.volume_end = Some(0.1);
        assert!(!alarm.has_volume_ramp());
        alarm.volume_start = None;
        assert!(!alarm.has_volume_ramp());
    }

    #[test]
    fn expiry_is_inclusive_of_the_fire_instant() {
        let task = ScheduledTask::from_document(timer_doc()).unwrap();
        assert!(task.is_expired(task.fire_at));
        assert!(!task.is_expired(task.fire_at - chrono::Duration::seconds(1)));
    }
}
