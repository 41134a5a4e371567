//! In-memory store of live scheduled tasks.
//!
//! The store is the authoritative active set: exactly one task per id, read by
//! the polling loop every tick.  [`ScheduledTaskStore::remove`] is the atomic
//! serialization point for firing — whichever tick removes the task is the only
//! one that executes it, so a task can never fire twice.  Because the store is
//! authoritative, only one orchestrator instance may run the scheduler;
//! deployments enforce single-replica.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::lucia::scheduled::task::ScheduledTask;

/// Concurrent id → task map.
pub struct ScheduledTaskStore {
    tasks: RwLock<HashMap<String, ScheduledTask>>,
}

impl ScheduledTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace the task under its id.
    pub async fn insert(&self, task: ScheduledTask) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    /// Atomically remove one task; the caller that gets `Some` owns the fire.
    pub async fn remove(&self, id: &str) -> Option<ScheduledTask> {
        self.tasks.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<ScheduledTask> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Ids of every task expired at `now`.
    pub async fn expired_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|task| task.is_expired(now))
            .map(|task| task.id.clone())
            .collect()
    }

    /// Snapshot of the whole active set.
    pub async fn snapshot(&self) -> Vec<ScheduledTask> {
        self.tasks.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

impl Default for ScheduledTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lucia::scheduled::task::{TaskKind, TimerSpec};

    fn timer(id: &str, fire_at: DateTime<Utc>) -> ScheduledTask {
        ScheduledTask::new(
            id,
            "test timer",
            fire_at,
            TaskKind::Timer(TimerSpec {
                message: "done".to_string(),
                entity_id: "assist_satellite.kitchen".to_string(),
                duration_seconds: 60,
            }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn remove_is_first_wins() {
        let store = ScheduledTaskStore::new();
        store.insert(timer("t1", Utc::now())).await;

        assert!(store.remove("t1").await.is_some());
        assert!(store.remove("t1").await.is_none());
    }

    #[tokio::test]
    async fn expired_ids_only_reports_due_tasks() {
        let store = ScheduledTaskStore::new();
        let now = Utc::now();
        store.insert(timer("past", now - chrono::Duration::seconds(5))).await;
        store.insert(timer("future", now + chrono::Duration::hours(1))).await;

        let expired = store.expired_ids(now).await;
        assert_eq!(expired, vec!["past".to_string()]);
    }
}
