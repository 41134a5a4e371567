//! Execution of fired scheduled tasks.
//!
//! The [`TaskRunner`] owns what happens after the polling loop removes a due
//! task from the store.  Timers announce once on their hub entity.  Alarms
//! resolve their target (presence-routed ones against current room occupancy),
//! then loop media playback with an optional linear volume ramp until
//! dismissed, snoozed, or auto-dismissed; per-iteration hub failures are
//! swallowed so a flaky speaker cannot silence a wake-up alarm.  Agent tasks
//! replay their captured prompt through the orchestrator façade, optionally
//! bypassing the router when they carry an explicit target.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use crate::lucia::alarm::{AlarmClockService, AlarmSignal};
use crate::lucia::hub::{EntityLocator, HubService, PresenceService};
use crate::lucia::orchestrator::Orchestrator;
use crate::lucia::scheduled::task::{
    AgentTaskSpec, AlarmSpec, ScheduledTask, TaskKind, TaskStatus, TimerSpec, PRESENCE_TARGET,
};

/// Marker prepended to agent-task prompts that carry an environmental snapshot.
pub const CONTEXT_MARKER: &str = "[Context]";

/// Render an agent-task prompt: marker + snapshot, then the user prompt
/// verbatim.
pub fn render_agent_prompt(spec: &AgentTaskSpec) -> String {
    match spec.entity_context.as_deref().filter(|c| !c.is_empty()) {
        Some(context) => format!("{} {}\n\n{}", CONTEXT_MARKER, context, spec.prompt),
        None => spec.prompt.clone(),
    }
}

/// Linear volume interpolation over the ramp window, clamped to the end value.
pub fn ramp_volume(spec: &AlarmSpec, elapsed: Duration) -> Option<f64> {
    if !spec.has_volume_ramp() {
        return None;
    }
    let start = spec.volume_start?;
    let end = spec.volume_end?;
    let ramp_secs = spec.volume_ramp_seconds? as f64;
    if ramp_secs <= 0.0 {
        return Some(end);
    }
    let progress = (elapsed.as_secs_f64() / ramp_secs).min(1.0);
    Some(start + (end - start) * progress)
}

/// Executes fired tasks against their collaborators.
pub struct TaskRunner {
    hub: Arc<dyn HubService>,
    presence: Arc<dyn PresenceService>,
    locator: Arc<dyn EntityLocator>,
    orchestrator: Arc<Orchestrator>,
    alarms: Arc<AlarmClockService>,
}

impl TaskRunner {
    pub fn new(
        hub: Arc<dyn HubService>,
        presence: Arc<dyn PresenceService>,
        locator: Arc<dyn EntityLocator>,
        orchestrator: Arc<Orchestrator>,
        alarms: Arc<AlarmClockService>,
    ) -> Self {
        Self {
            hub,
            presence,
            locator,
            orchestrator,
            alarms,
        }
    }

    /// Run one fired task to completion and return its final status.
    pub async fn execute(
        &self,
        task: &ScheduledTask,
    ) -> Result<TaskStatus, Box<dyn Error + Send + Sync>> {
        match &task.kind {
            TaskKind::Timer(spec) => self.run_timer(spec).await,
            TaskKind::Alarm(spec) => self.run_alarm(task, spec).await,
            TaskKind::Agent(spec) => self.run_agent_task(task, spec).await,
        }
    }

    async fn run_timer(&self, spec: &TimerSpec) -> Result<TaskStatus, Box<dyn Error + Send + Sync>> {
        self.hub.announce(&spec.entity_id, &spec.message).await?;
        Ok(TaskStatus::Completed)
    }

    /// Resolve the playback entity, honouring the presence sentinel.
    async fn resolve_alarm_target(
        &self,
        spec: &AlarmSpec,
    ) -> Result<Option<String>, Box<dyn Error + Send + Sync>> {
        if spec.target_entity != PRESENCE_TARGET {
            return Ok(Some(spec.target_entity.clone()));
        }

        let mut areas = self.presence.occupied_areas().await?;
        areas.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let best = match areas.first() {
            Some(area) => area.clone(),
            None => return Ok(None),
        };
        self.locator.media_player_in_area(&best.area_id).await
    }

    async fn run_alarm(
        &self,
        task: &ScheduledTask,
        spec: &AlarmSpec,
    ) -> Result<TaskStatus, Box<dyn Error + Send + Sync>> {
        let entity = match self.resolve_alarm_target(spec).await? {
            Some(entity) => entity,
            None => {
                // Nobody home: abort without touching any hub service.
                log::warn!(
                    "alarm: no presence target resolved for task {}; not firing",
                    task.id
                );
                return Ok(TaskStatus::Failed);
            }
        };

        let mut signal = self.alarms.register_active(task).await;
        let auto_dismiss = Duration::from_secs(spec.auto_dismiss_after_seconds);
        let interval = Duration::from_secs(spec.playback_interval_seconds);
        let started = std::time::Instant::now();

        // The auto-dismiss deadline is a cancel-after around the whole loop;
        // hitting it is normal termination, not an error.
        let loop_result = tokio::time::timeout(auto_dismiss, async {
            loop {
                if let Some(volume) = ramp_volume(spec, started.elapsed()) {
                    if let Err(e) = self.hub.volume_set(&entity, volume).await {
                        log::warn!("alarm: volume_set failed on {}: {}", entity, e);
                    }
                }

                let playback = match &spec.alarm_sound_uri {
                    Some(uri) => self.hub.play_media(&entity, uri).await,
                    None => {
                        self.hub
                            .announce(&entity, &format!("Alarm: {}", task.label))
                            .await
                    }
                };
                if let Err(e) = playback {
                    // Transient playback failures must not stop the alarm.
                    log::warn!("alarm: playback failed on {}: {}", entity, e);
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = signal.changed() => {
                        if changed.is_err() {
                            return TaskStatus::Dismissed;
                        }
                        match *signal.borrow() {
                            AlarmSignal::Dismiss => return TaskStatus::Dismissed,
                            AlarmSignal::Snooze => return TaskStatus::Snoozed,
                            AlarmSignal::Ring => {}
                        }
                    }
                }
            }
        })
        .await;

        self.alarms.finish_active(&task.id).await;

        let status = match loop_result {
            Ok(status) => status,
            Err(_) => TaskStatus::AutoDismissed,
        };

        self.alarms.advance_after_fire(&spec.alarm_clock_id).await;
        Ok(status)
    }

    async fn run_agent_task(
        &self,
        task: &ScheduledTask,
        spec: &AgentTaskSpec,
    ) -> Result<TaskStatus, Box<dyn Error + Send + Sync>> {
        let prompt = render_agent_prompt(spec);
        let session = format!("task:{}", task.id);

        let reply = match &spec.target_agent_id {
            Some(target) => {
                self.orchestrator
                    .handle_directed(&prompt, Some(&session), target)
                    .await?
            }
            None => self.orchestrator.handle(&prompt, Some(&session)).await?,
        };

        if reply.responses.iter().any(|r| r.success) || reply.responses.is_empty() {
            Ok(TaskStatus::Completed)
        } else {
            Err(format!(
                "agent task produced no successful response: {}",
                reply.text
            )
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_spec(prompt: &str, context: Option<&str>) -> AgentTaskSpec {
        AgentTaskSpec {
            prompt: prompt.to_string(),
            target_agent_id: None,
            entity_context: context.map(|c| c.to_string()),
        }
    }

    #[test]
    fn agent_prompt_prefixes_context_and_keeps_prompt_verbatim() {
        let spec = agent_spec("turn off living room lights", Some("living room lights on at 80%"));
        let prompt = render_agent_prompt(&spec);
        assert!(prompt.starts_with(CONTEXT_MARKER));
        assert!(prompt.ends_with("turn off living room lights"));
        assert!(prompt.contains("living room lights on at 80%"));
    }

    #[test]
    fn agent_prompt_without_context_is_untouched() {
        let spec = agent_spec("water the plants", None);
        assert_eq!(render_agent_prompt(&spec), "water the plants");
    }

    #[test]
    fn volume_ramp_interpolates_and_clamps() {
        let spec = AlarmSpec {
            alarm_clock_id: "c".to_string(),
            target_entity: "media_player.bedroom".to_string(),
            alarm_sound_uri: None,
            playback_interval_seconds: 30,
            auto_dismiss_after_seconds: 600,
            volume_start: Some(0.1),
            volume_end: Some(0.8),
            volume_ramp_seconds: Some(30),
        };

        let at_start = ramp_volume(&spec, Duration::from_secs(0)).unwrap();
        assert!((at_start - 0.1).abs() < 1e-9);

        let mid = ramp_volume(&spec, Duration::from_secs(15)).unwrap();
        assert!((mid - 0.45).abs() < 1e-9);

        let past_end = ramp_volume(&spec, Duration::from_secs(300)).unwrap();
        assert!((past_end - 0.8).abs() < 1e-9);
    }

    #[test]
    fn no_ramp_when_unconfigured() {
        let spec = AlarmSpec {
            alarm_clock_id: "c".to_string(),
            target_entity: "media_player.bedroom".to_string(),
            alarm_sound_uri: None,
            playback_interval_seconds: 30,
            auto_dismiss_after_seconds: 600,
            volume_start: None,
            volume_end: None,
            volume_ramp_seconds: None,
        };
        assert!(ramp_volume(&spec, Duration::from_secs(5)).is_none());
    }
}
