//! The scheduled-task polling loop.
//!
//! One loop per process, ticking at the configured cadence.  Each tick spawns
//! tasks for alarm clocks whose fire time arrived, then removes every expired
//! task from the store — removal is the fire-once point — and executes it
//! fire-and-forget on its own tokio task.  Final statuses are persisted:
//! `Completed` (or the alarm's dismissal status) on success, `Failed` on error.
//! Snoozed alarms are left alone because the alarm service already re-opened
//! their document as `Pending`.
//!
//! Shutdown is cooperative: the loop stops starting new work and in-flight
//! task executions are left to finish.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;

use crate::lucia::alarm::AlarmClockService;
use crate::lucia::config::SchedulerConfig;
use crate::lucia::scheduled::runner::TaskRunner;
use crate::lucia::scheduled::store::ScheduledTaskStore;
use crate::lucia::scheduled::task::{ScheduledTask, TaskStatus};
use crate::lucia::store::{collections, DocumentStore};

/// The polling scheduler.
pub struct SchedulerService {
    store: Arc<ScheduledTaskStore>,
    documents: Arc<dyn DocumentStore>,
    runner: Arc<TaskRunner>,
    alarms: Arc<AlarmClockService>,
    config: SchedulerConfig,
}

impl SchedulerService {
    pub fn new(
        store: Arc<ScheduledTaskStore>,
        documents: Arc<dyn DocumentStore>,
        runner: Arc<TaskRunner>,
        alarms: Arc<AlarmClockService>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            documents,
            runner,
            alarms,
            config,
        }
    }

    /// Add a task: persisted first, then inserted into the live store.
    pub async fn schedule(&self, task: ScheduledTask) -> Result<(), crate::lucia::store::StoreError> {
        self.documents
            .put(collections::SCHEDULED_TASKS, &task.id, task.to_document())
            .await?;
        self.store.insert(task).await;
        Ok(())
    }

    /// Cancel a pending task before it fires.
    pub async fn cancel(&self, task_id: &str) -> bool {
        match self.store.remove(task_id).await {
            Some(mut task) => {
                task.status = TaskStatus::Cancelled;
                persist_status(&self.documents, &task).await;
                true
            }
            None => false,
        }
    }

    /// Run the polling loop until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("scheduler: stopping; in-flight tasks may finish");
                        return;
                    }
                }
            }
        }
    }

    /// One scheduling pass; public so tests can drive time explicitly.
    pub async fn tick(&self) {
        let now = Utc::now();
        self.alarms.spawn_due_tasks(&self.store, now).await;

        for id in self.store.expired_ids(now).await {
            // remove() is the serialization point: only the tick that wins the
            // removal executes the task.
            if let Some(task) = self.store.remove(&id).await {
                let runner = self.runner.clone();
                let documents = self.documents.clone();
                tokio::spawn(async move {
                    execute_task(runner, documents, task).await;
                });
            }
        }
    }
}

async fn execute_task(
    runner: Arc<TaskRunner>,
    documents: Arc<dyn DocumentStore>,
    mut task: ScheduledTask,
) {
    task.status = TaskStatus::Active;
    persist_status(&documents, &task).await;

    match runner.execute(&task).await {
        Ok(TaskStatus::Snoozed) => {
            // The alarm service re-opened the document as Pending with a new
            // fire time; do not overwrite it.
        }
        Ok(status) => {
            task.status = status;
            persist_status(&documents, &task).await;
        }
        Err(e) => {
            log::error!("scheduler: task {} failed: {}", task.id, e);
            task.status = TaskStatus::Failed;
            persist_status(&documents, &task).await;
        }
    }
}

async fn persist_status(documents: &Arc<dyn DocumentStore>, task: &ScheduledTask) {
    if let Err(e) = documents
        .put(collections::SCHEDULED_TASKS, &task.id, task.to_document())
        .await
    {
        log::error!("scheduler: failed to persist status of {}: {}", task.id, e);
    }
}
