use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use replication_core::{BrokerStatus, LogError, StatusLog};
use shared::types::now_millis;
use shared::{StatusEdit, TaskId, TaskStatus};

use crate::config::BrokerConfiguration;
use crate::heap::TasksHeap;
use crate::schedulers;

/// Task lifecycle controller and process-level glue: submission, dispatch,
/// completion and retry, worker state transitions, background checkpointing
/// and purging. One instance per broker replica; whether it accepts writes is
/// decided by the log's leadership, tracked by the broker-life task.
pub struct Broker {
    configuration: BrokerConfiguration,
    status: Arc<BrokerStatus>,
    heap: Arc<dyn TasksHeap>,
    log: Arc<dyn StatusLog>,
    started: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Broker {
    pub fn new(
        configuration: BrokerConfiguration,
        log: Arc<dyn StatusLog>,
        heap: Arc<dyn TasksHeap>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            status: Arc::new(BrokerStatus::new(Arc::clone(&log))),
            heap,
            log,
            configuration,
            started: Arc::new(AtomicBool::new(false)),
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn broker_status(&self) -> &Arc<BrokerStatus> {
        &self.status
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Recovers from the log and brings the replica up: followers tail the
    /// leader, and on election the broker-life task arms the append path and
    /// rehydrates the heap. Checkpointing runs in both roles.
    pub async fn start(&self) -> Result<(), LogError> {
        self.status.recover().await?;
        let checkpoint = schedulers::spawn_checkpoint_scheduler(
            Arc::clone(&self.status),
            self.configuration.checkpoint_period,
            self.shutdown.subscribe(),
        );
        let life = self.spawn_broker_life();
        let mut handles = self.handles.lock().expect("broker handles lock poisoned");
        handles.push(checkpoint);
        handles.push(life);
        Ok(())
    }

    /// Starts and then waits until this replica may append, i.e. until the
    /// log elects it and the append path is armed.
    pub async fn start_as_writable(&self) -> Result<(), LogError> {
        self.start().await?;
        while !self.log.is_writable() && !self.log.is_closed() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }

    fn spawn_broker_life(&self) -> JoinHandle<()> {
        let status = Arc::clone(&self.status);
        let heap = Arc::clone(&self.heap);
        let log = Arc::clone(&self.log);
        let started = Arc::clone(&self.started);
        let configuration = self.configuration.clone();
        let mut shutdown = self.shutdown.subscribe();
        let collector_shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(err) = status.follow_the_leader().await {
                // the replica cannot make progress without the log
                error!("follower loop failed: {}", err);
                panic!("follower loop failed: {}", err);
            }
            if log.is_closed() {
                return;
            }
            info!("starting as leader");
            if let Err(err) = status.start_writing().await {
                error!("cannot arm the log for writing: {}", err);
                panic!("cannot arm the log for writing: {}", err);
            }
            for task in status.tasks_at_boot().await {
                if task.status == TaskStatus::Waiting {
                    heap.insert_task(task.task_id, task.task_type, &task.user_id)
                        .await;
                }
            }
            started.store(true, Ordering::SeqCst);
            let collector = schedulers::spawn_finished_task_collector(
                Arc::clone(&status),
                Arc::clone(&heap),
                configuration,
                collector_shutdown,
            );
            loop {
                if *shutdown.borrow() {
                    break;
                }
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            let _ = collector.await;
        })
    }

    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        self.status.close().await;
        let handles: Vec<_> = {
            let mut handles = self.handles.lock().expect("broker handles lock poisoned");
            handles.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        self.started.store(false, Ordering::SeqCst);
    }

    // ---- lifecycle operations ----

    /// Submits a task. Returns the new task id, or 0 when a slot-bearing
    /// submission was dropped because the slot is already held.
    pub async fn add_task(
        &self,
        task_type: i32,
        user_id: &str,
        parameter: &str,
        max_attempts: i32,
        execution_deadline: i64,
        slot: Option<String>,
    ) -> Result<TaskId, LogError> {
        if let Some(slot) = &slot {
            // Fast path so an obvious duplicate does not consume a task id.
            // The arbiter check inside the append path stays authoritative
            // under concurrent submissions.
            if self.status.is_slot_assigned(slot) {
                return Ok(0);
            }
        }
        let task_id = self.status.next_task_id();
        let edit = StatusEdit::AddTask {
            task_id,
            task_type,
            parameter: parameter.to_string(),
            user_id: user_id.to_string(),
            max_attempts,
            execution_deadline,
            slot,
        };
        let result = self.status.apply_modification(edit).await?;
        if result.new_task_id > 0 {
            self.heap
                .insert_task(result.new_task_id, task_type, user_id)
                .await;
        }
        Ok(result.new_task_id)
    }

    /// Pulls up to `max` candidates from the heap for `worker_id`. Tasks
    /// whose deadline has already passed are expired through the log instead
    /// of dispatched, and excluded from the returned list.
    pub async fn assign_tasks_to_worker(
        &self,
        max: usize,
        available_space: &HashMap<i32, usize>,
        groups: &[i32],
        worker_id: &str,
    ) -> Result<Vec<TaskId>, LogError> {
        let mut tasks = self.heap.take_tasks(max, groups, available_space).await;
        let now = now_millis();
        let mut expired: HashSet<TaskId> = HashSet::new();
        for &task_id in &tasks {
            let Some(task) = self.status.get_task(task_id).await else {
                continue;
            };
            let deadline = task.execution_deadline;
            if deadline > 0 && deadline < now {
                expired.insert(task_id);
                info!("task {} deadline expired at {}", task_id, deadline);
                self.status
                    .apply_modification(StatusEdit::TaskStatusChange {
                        task_id,
                        worker_id: None,
                        task_status: TaskStatus::Error,
                        result: "deadline_expired".to_string(),
                    })
                    .await?;
            } else {
                self.status
                    .apply_modification(StatusEdit::AssignTaskToWorker {
                        task_id,
                        worker_id: worker_id.to_string(),
                        attempt: task.attempts + 1,
                    })
                    .await?;
            }
        }
        tasks.retain(|task_id| !expired.contains(task_id));
        Ok(tasks)
    }

    /// Records the outcome a worker reported. `Error` outcomes retry until
    /// the attempt budget or the deadline is exhausted; a reported `Waiting`
    /// or `Running` is a caller bug.
    pub async fn task_finished(
        &self,
        worker_id: &str,
        task_id: TaskId,
        final_status: TaskStatus,
        result: &str,
    ) -> Result<(), LogError> {
        let Some(task) = self.status.get_task(task_id).await else {
            error!("task_finished {}: task does not exist", task_id);
            return Ok(());
        };
        match final_status {
            TaskStatus::Finished => {
                self.status
                    .apply_modification(StatusEdit::TaskStatusChange {
                        task_id,
                        worker_id: Some(worker_id.to_string()),
                        task_status: TaskStatus::Finished,
                        result: result.to_string(),
                    })
                    .await?;
                Ok(())
            }
            TaskStatus::Error => {
                if task.max_attempts > 0 && task.attempts >= task.max_attempts {
                    warn!(
                        "task {} failed, too many attempts {}/{}",
                        task_id, task.attempts, task.max_attempts
                    );
                    self.status
                        .apply_modification(StatusEdit::TaskStatusChange {
                            task_id,
                            worker_id: Some(worker_id.to_string()),
                            task_status: TaskStatus::Error,
                            result: result.to_string(),
                        })
                        .await?;
                    return Ok(());
                }
                if task.execution_deadline > 0 && task.execution_deadline < now_millis() {
                    warn!(
                        "task {} failed and its deadline {} has passed",
                        task_id, task.execution_deadline
                    );
                    self.status
                        .apply_modification(StatusEdit::TaskStatusChange {
                            task_id,
                            worker_id: Some(worker_id.to_string()),
                            task_status: TaskStatus::Error,
                            result: result.to_string(),
                        })
                        .await?;
                    return Ok(());
                }
                info!(
                    "task {} failed, attempts {}/{}, scheduling for retry",
                    task_id, task.attempts, task.max_attempts
                );
                self.status
                    .apply_modification(StatusEdit::TaskStatusChange {
                        task_id,
                        worker_id: Some(worker_id.to_string()),
                        task_status: TaskStatus::Waiting,
                        result: result.to_string(),
                    })
                    .await?;
                self.heap
                    .insert_task(task_id, task.task_type, &task.user_id)
                    .await;
                Ok(())
            }
            TaskStatus::Waiting | TaskStatus::Running => {
                panic!("bad final status for task {}: {:?}", task_id, final_status)
            }
        }
    }

    pub async fn task_needs_recovery_due_to_worker_death(
        &self,
        task_id: TaskId,
        worker_id: &str,
    ) -> Result<(), LogError> {
        self.task_finished(
            worker_id,
            task_id,
            TaskStatus::Error,
            &format!("worker {} died", worker_id),
        )
        .await
    }

    pub async fn worker_connected(
        &self,
        worker_id: &str,
        process_id: &str,
        location: &str,
        timestamp: i64,
    ) -> Result<(), LogError> {
        self.status
            .apply_modification(StatusEdit::WorkerConnected {
                worker_id: worker_id.to_string(),
                worker_process_id: process_id.to_string(),
                worker_location: location.to_string(),
                timestamp,
            })
            .await?;
        Ok(())
    }

    pub async fn declare_worker_disconnected(
        &self,
        worker_id: &str,
        timestamp: i64,
    ) -> Result<(), LogError> {
        self.status
            .apply_modification(StatusEdit::WorkerDisconnected {
                worker_id: worker_id.to_string(),
                timestamp,
            })
            .await?;
        Ok(())
    }

    pub async fn declare_worker_dead(
        &self,
        worker_id: &str,
        timestamp: i64,
    ) -> Result<(), LogError> {
        self.status
            .apply_modification(StatusEdit::WorkerDied {
                worker_id: worker_id.to_string(),
                timestamp,
            })
            .await?;
        Ok(())
    }

    /// One purge pass, also run periodically by the finished-task collector.
    pub async fn purge_tasks(&self) {
        schedulers::purge_once(
            &self.status,
            self.heap.as_ref(),
            self.configuration.finished_tasks_retention_ms,
            self.configuration.max_expired_tasks_per_cycle,
        )
        .await;
    }

    pub async fn checkpoint(&self) -> Result<(), LogError> {
        self.status.checkpoint().await
    }
}
