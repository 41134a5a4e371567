//! Startup recovery of scheduled tasks.
//!
//! The in-memory store is rebuilt from the `scheduled_tasks` collection once
//! at startup.  Only `Pending` and `Active` documents are candidates; anything
//! whose fire time is further in the past than the recovery window is marked
//! `Failed` in place, and documents that fail factory validation are skipped
//! with a log line.  Recovery never aborts startup.

use std::sync::Arc;

use chrono::Utc;

use crate::lucia::config::SchedulerConfig;
use crate::lucia::scheduled::store::ScheduledTaskStore;
use crate::lucia::scheduled::task::{ScheduledTask, TaskStatus};
use crate::lucia::store::{collections, DocumentStore};

/// What one recovery pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Tasks put back into the live store.
    pub rehydrated: usize,
    /// Stale tasks marked `Failed`.
    pub expired: usize,
    /// Documents dropped for validation errors.
    pub skipped: usize,
}

/// Rehydrate live tasks from the durable store.
pub async fn recover(
    documents: &Arc<dyn DocumentStore>,
    store: &ScheduledTaskStore,
    config: &SchedulerConfig,
) -> RecoveryReport {
    let mut report = RecoveryReport::default();
    let now = Utc::now();

    let docs = match documents.list(collections::SCHEDULED_TASKS).await {
        Ok(docs) => docs,
        Err(e) => {
            log::error!("recovery: failed to list scheduled tasks: {}", e);
            return report;
        }
    };

    for doc in docs {
        let mut task = match ScheduledTask::from_document(doc) {
            Ok(task) => task,
            Err(e) => {
                log::warn!("recovery: skipping invalid task document: {}", e);
                report.skipped += 1;
                continue;
            }
        };

        if !task.status.is_live() {
            continue;
        }

        let age = now.signed_duration_since(task.fire_at);
        let too_old = age
            .to_std()
            .map(|age| age > config.max_recovery_age)
            .unwrap_or(false);

        if too_old {
            log::warn!(
                "recovery: task {} expired {}s ago; marking failed",
                task.id,
                age.num_seconds()
            );
            task.status = TaskStatus::Failed;
            if let Err(e) = documents
                .put(collections::SCHEDULED_TASKS, &task.id, task.to_document())
                .await
            {
                log::error!("recovery: failed to persist stale task {}: {}", task.id, e);
            }
            report.expired += 1;
            continue;
        }

        store.insert(task).await;
        report.rehydrated += 1;
    }

    log::info!(
        "recovery: rehydrated {} tasks, expired {}, skipped {}",
        report.rehydrated,
        report.expired,
        report.skipped
    );
    report
}
