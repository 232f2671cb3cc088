use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::error;

use replication_core::BrokerStatus;
use shared::{StatusEdit, TaskId, TaskStatus};

use crate::config::BrokerConfiguration;
use crate::heap::TasksHeap;

/// One purge pass: drop aged-out terminal tasks from memory, then expire the
/// signaled waiting tasks through the log and drop them from the heap.
pub(crate) async fn purge_once(
    status: &BrokerStatus,
    heap: &dyn TasksHeap,
    finished_tasks_retention_ms: i64,
    max_expired_per_cycle: usize,
) {
    let expired: Vec<TaskId> = status
        .purge_finished_tasks_and_signal_expired(finished_tasks_retention_ms, max_expired_per_cycle)
        .await;
    for task_id in expired {
        let edit = StatusEdit::TaskStatusChange {
            task_id,
            worker_id: None,
            task_status: TaskStatus::Error,
            result: "deadline_expired".to_string(),
        };
        match status.apply_modification(edit).await {
            Ok(_) => heap.remove_expired_task(task_id).await,
            Err(err) => error!("error while expiring task {}: {}", task_id, err),
        }
    }
}

pub(crate) fn spawn_checkpoint_scheduler(
    status: Arc<BrokerStatus>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = status.checkpoint().await {
                        error!("checkpoint failed: {}", err);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

pub(crate) fn spawn_finished_task_collector(
    status: Arc<BrokerStatus>,
    heap: Arc<dyn TasksHeap>,
    configuration: BrokerConfiguration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = configuration.purge_period;
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    purge_once(
                        &status,
                        heap.as_ref(),
                        configuration.finished_tasks_retention_ms,
                        configuration.max_expired_tasks_per_cycle,
                    )
                    .await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
