use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use shared::types::now_millis;
use shared::{
    BrokerStatusSnapshot, LogSequenceNumber, StatusEdit, Task, TaskId, TaskStatus, TaskStatusView,
    WorkerInfo, WorkerState, WorkerStatusView,
};

use crate::error::LogError;
use crate::log::{ApplyEdit, StatusLog};
use crate::slots::SlotArbiter;

/// Outcome of a leader-side modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModificationResult {
    /// Sequence number assigned by the log, `None` when the submission was
    /// dropped as a slot duplicate and nothing was written.
    pub sequence_number: Option<LogSequenceNumber>,
    /// Id of the task created by an `AddTask` edit; 0 for every other edit
    /// kind and for dropped duplicates.
    pub new_task_id: TaskId,
}

struct StatusInner {
    tasks: HashMap<TaskId, Task>,
    workers: HashMap<String, WorkerInfo>,
    max_task_id: TaskId,
    last_sequence_number: LogSequenceNumber,
}

/// Replicated status of the broker. Every replica, leader or follower, holds
/// a copy and mutates it exclusively by applying status edits in log order:
/// the leader applies right after appending, followers while tailing the log.
pub struct BrokerStatus {
    inner: RwLock<StatusInner>,
    /// Last issued task id; readable without the status lock.
    next_task_id: AtomicU64,
    checkpoints_count: AtomicU64,
    slots: SlotArbiter,
    log: Arc<dyn StatusLog>,
}

impl BrokerStatus {
    pub fn new(log: Arc<dyn StatusLog>) -> Self {
        Self {
            inner: RwLock::new(StatusInner {
                tasks: HashMap::new(),
                workers: HashMap::new(),
                max_task_id: 0,
                last_sequence_number: 0,
            }),
            next_task_id: AtomicU64::new(0),
            checkpoints_count: AtomicU64::new(0),
            slots: SlotArbiter::new(),
            log,
        }
    }

    /// Mints the next task id. Ids strictly increase within a broker
    /// lifetime and recovery reseeds the counter past every recovered id.
    pub fn next_task_id(&self) -> TaskId {
        self.next_task_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn checkpoints_count(&self) -> u64 {
        self.checkpoints_count.load(Ordering::SeqCst)
    }

    /// Duplicate-submission hint; see [`SlotArbiter::is_assigned`].
    pub fn is_slot_assigned(&self, slot: &str) -> bool {
        self.slots.is_assigned(slot)
    }

    // ---- queries (reader lock, structural copies only) ----

    pub async fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.inner.read().await.tasks.get(&task_id).cloned()
    }

    pub async fn get_task_status(&self, task_id: TaskId) -> Option<TaskStatusView> {
        self.inner
            .read()
            .await
            .tasks
            .get(&task_id)
            .map(TaskStatusView::of)
    }

    pub async fn get_all_tasks(&self) -> Vec<TaskStatusView> {
        self.inner
            .read()
            .await
            .tasks
            .values()
            .map(TaskStatusView::of)
            .collect()
    }

    pub async fn get_all_workers(&self) -> Vec<WorkerStatusView> {
        self.inner
            .read()
            .await
            .workers
            .values()
            .map(WorkerStatusView::of)
            .collect()
    }

    pub async fn get_worker_status(&self, worker_id: &str) -> Option<WorkerInfo> {
        self.inner.read().await.workers.get(worker_id).cloned()
    }

    /// One-shot copy of every task, used at startup to rehydrate external
    /// structures such as the ready heap. Valid at call time.
    pub async fn tasks_at_boot(&self) -> Vec<Task> {
        self.inner.read().await.tasks.values().cloned().collect()
    }

    pub async fn workers_at_boot(&self) -> Vec<WorkerInfo> {
        self.inner.read().await.workers.values().cloned().collect()
    }

    pub async fn last_sequence_number(&self) -> LogSequenceNumber {
        self.inner.read().await.last_sequence_number
    }

    // ---- replication driver ----

    /// Leader append path. Slot-bearing `AddTask` edits are gated through the
    /// slot arbiter before touching the log: a duplicate is dropped silently
    /// (task id 0), and a failed append gives the reservation back before the
    /// error propagates. The append itself runs outside the status write
    /// lock; ordering comes from the log's sequence numbers.
    pub async fn apply_modification(
        &self,
        edit: StatusEdit,
    ) -> Result<ModificationResult, LogError> {
        debug!("apply_modification {:?}", edit);
        if let StatusEdit::AddTask {
            slot: Some(slot), ..
        } = &edit
        {
            if !self.slots.assign_slot(slot) {
                debug!("slot {} already assigned, dropping submission", slot);
                return Ok(ModificationResult {
                    sequence_number: None,
                    new_task_id: 0,
                });
            }
            match self.log.log_status_edit(&edit).await {
                Ok(seq) => Ok(self.apply_edit(seq, &edit).await),
                Err(err) => {
                    self.slots.release_slot(slot);
                    Err(err)
                }
            }
        } else {
            let seq = self.log.log_status_edit(&edit).await?;
            Ok(self.apply_edit(seq, &edit).await)
        }
    }

    /// Tail-and-apply loop run by replicas that are not (yet) the leader.
    /// Returns once this replica is elected or the log is closed; a log
    /// failure here is fatal to the replica.
    pub async fn follow_the_leader(&self) -> Result<(), LogError> {
        while !self.log.is_leader() && !self.log.is_closed() {
            let from = self.inner.read().await.last_sequence_number;
            self.log.follow_the_leader(from, self).await?;
        }
        Ok(())
    }

    /// Cold-start recovery: install the newest snapshot, then replay the log
    /// tail. Slot reservations of non-terminal tasks are re-established both
    /// from the snapshot and by `AddTask` replay. Runs before the broker
    /// serves anything, so replay applies each edit under its own write-lock
    /// acquisition.
    pub async fn recover(&self) -> Result<(), LogError> {
        let snapshot = self.log.load_snapshot().await?;
        info!(
            "recovery: snapshot at sequence {}, {} tasks, {} workers",
            snapshot.last_sequence_number,
            snapshot.tasks.len(),
            snapshot.workers.len()
        );
        let BrokerStatusSnapshot {
            max_task_id,
            last_sequence_number,
            tasks,
            workers,
        } = snapshot;
        {
            let mut inner = self.inner.write().await;
            inner.max_task_id = max_task_id;
            inner.last_sequence_number = last_sequence_number;
            for task in tasks {
                if !task.status.is_terminal() {
                    if let Some(slot) = &task.slot {
                        self.slots.assign_slot(slot);
                    }
                }
                inner.tasks.insert(task.task_id, task);
            }
            for worker in workers {
                inner.workers.insert(worker.worker_id.clone(), worker);
            }
            self.next_task_id.store(inner.max_task_id, Ordering::SeqCst);
        }
        self.log.recovery(last_sequence_number, self).await?;
        let max_task_id = self.inner.read().await.max_task_id;
        self.next_task_id.store(max_task_id, Ordering::SeqCst);
        Ok(())
    }

    /// Arms the log for leader appends. The id counter is reseeded here so
    /// that a replica promoted after tailing edits past its recovery point
    /// still mints ids above every task it has seen.
    pub async fn start_writing(&self) -> Result<(), LogError> {
        let inner = self.inner.write().await;
        self.next_task_id
            .fetch_max(inner.max_task_id, Ordering::SeqCst);
        self.log.start_writing().await
    }

    /// Builds a snapshot under the reader lock and hands it to the log as the
    /// new truncation point.
    pub async fn checkpoint(&self) -> Result<(), LogError> {
        self.checkpoints_count.fetch_add(1, Ordering::SeqCst);
        info!("checkpoint");
        let snapshot = {
            let inner = self.inner.read().await;
            BrokerStatusSnapshot {
                max_task_id: inner.max_task_id,
                last_sequence_number: inner.last_sequence_number,
                tasks: inner.tasks.values().cloned().collect(),
                workers: inner.workers.values().cloned().collect(),
            }
        };
        self.log.checkpoint(snapshot).await
    }

    /// Sweeps the task map: terminal tasks older than the retention are
    /// dropped from memory (never from the log, so they may reappear after a
    /// restart and be purged again); waiting tasks whose deadline has passed
    /// are collected, up to `max_expired_per_cycle`, for the caller to expire
    /// through the log.
    pub async fn purge_finished_tasks_and_signal_expired(
        &self,
        finished_tasks_retention_ms: i64,
        max_expired_per_cycle: usize,
    ) -> Vec<TaskId> {
        let now = now_millis();
        let finished_deadline = now - finished_tasks_retention_ms;
        let mut expired = Vec::new();
        let mut inner = self.inner.write().await;
        inner.tasks.retain(|_, task| match task.status {
            TaskStatus::Waiting => {
                if expired.len() < max_expired_per_cycle
                    && task.execution_deadline > 0
                    && task.execution_deadline < now
                {
                    info!(
                        "task {} expired, deadline was {}",
                        task.task_id, task.execution_deadline
                    );
                    expired.push(task.task_id);
                }
                true
            }
            TaskStatus::Finished | TaskStatus::Error => {
                if task.created_timestamp < finished_deadline {
                    info!(
                        "purging finished task {}, created at {}",
                        task.task_id, task.created_timestamp
                    );
                    false
                } else {
                    true
                }
            }
            TaskStatus::Running => true,
        });
        expired
    }

    pub async fn close(&self) {
        self.log.close().await;
    }

    // ---- edit applier ----

    /// Deterministic state transition for a single edit. Runs under the
    /// writer lock, performs no I/O, and must not fail for environmental
    /// reasons: an invariant violation here means this replica has diverged
    /// from the log and the process must die, hence the panics.
    async fn apply_edit(&self, seq: LogSequenceNumber, edit: &StatusEdit) -> ModificationResult {
        debug!("apply_edit seq={} {:?}", seq, edit);
        let mut inner = self.inner.write().await;
        inner.last_sequence_number = seq;
        let new_task_id = match edit {
            StatusEdit::AddTask {
                task_id,
                task_type,
                parameter,
                user_id,
                max_attempts,
                execution_deadline,
                slot,
            } => {
                if inner.max_task_id < *task_id {
                    inner.max_task_id = *task_id;
                }
                let task = Task {
                    task_id: *task_id,
                    task_type: *task_type,
                    user_id: user_id.clone(),
                    parameter: parameter.clone(),
                    result: String::new(),
                    created_timestamp: now_millis(),
                    execution_deadline: *execution_deadline,
                    max_attempts: *max_attempts,
                    attempts: 0,
                    worker_id: None,
                    slot: slot.clone(),
                    status: TaskStatus::Waiting,
                };
                inner.tasks.insert(*task_id, task);
                if let Some(slot) = slot {
                    // Replay on recovery and on followers re-establishes the
                    // reservation; already-held is a benign no-op.
                    self.slots.assign_slot(slot);
                }
                *task_id
            }
            StatusEdit::AssignTaskToWorker {
                task_id,
                worker_id,
                attempt,
            } => {
                let task = inner
                    .tasks
                    .get_mut(task_id)
                    .unwrap_or_else(|| panic!("assignment for unknown task {}", task_id));
                task.status = TaskStatus::Running;
                task.worker_id = Some(worker_id.clone());
                task.attempts = *attempt;
                0
            }
            StatusEdit::TaskStatusChange {
                task_id,
                worker_id,
                task_status,
                result,
            } => {
                let task = inner
                    .tasks
                    .get_mut(task_id)
                    .unwrap_or_else(|| panic!("status change for unknown task {}", task_id));
                if let Some(worker_id) = worker_id {
                    if task.worker_id.as_deref() != Some(worker_id.as_str()) {
                        panic!(
                            "task {}: bad workerId {}, expected {:?}",
                            task_id, worker_id, task.worker_id
                        );
                    }
                }
                task.status = *task_status;
                task.result = result.clone();
                if task.status.is_terminal() {
                    if let Some(slot) = &task.slot {
                        self.slots.release_slot(slot);
                    }
                }
                0
            }
            StatusEdit::WorkerConnected {
                worker_id,
                worker_process_id,
                worker_location,
                timestamp,
            } => {
                let worker = inner
                    .workers
                    .entry(worker_id.clone())
                    .or_insert_with(|| WorkerInfo::new(worker_id.clone(), WorkerState::Connected));
                worker.status = WorkerState::Connected;
                worker.location = worker_location.clone();
                worker.process_id = worker_process_id.clone();
                worker.last_connection_ts = *timestamp;
                0
            }
            StatusEdit::WorkerDisconnected { worker_id, .. } => {
                inner
                    .workers
                    .entry(worker_id.clone())
                    .or_insert_with(|| {
                        WorkerInfo::new(worker_id.clone(), WorkerState::Disconnected)
                    })
                    .status = WorkerState::Disconnected;
                0
            }
            StatusEdit::WorkerDied { worker_id, .. } => {
                inner
                    .workers
                    .entry(worker_id.clone())
                    .or_insert_with(|| WorkerInfo::new(worker_id.clone(), WorkerState::Dead))
                    .status = WorkerState::Dead;
                0
            }
        };
        ModificationResult {
            sequence_number: Some(seq),
            new_task_id,
        }
    }
}

#[async_trait]
impl ApplyEdit for BrokerStatus {
    async fn apply(&self, seq: LogSequenceNumber, edit: &StatusEdit) {
        self.apply_edit(seq, edit).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::InMemoryStatusLog;
    use std::time::Duration;

    async fn leader_log() -> Arc<InMemoryStatusLog> {
        let log = Arc::new(InMemoryStatusLog::new_leader());
        log.start_writing().await.unwrap();
        log
    }

    fn add_task_edit(status: &BrokerStatus, deadline: i64, slot: Option<&str>) -> StatusEdit {
        StatusEdit::AddTask {
            task_id: status.next_task_id(),
            task_type: 1,
            parameter: "p".to_string(),
            user_id: "u".to_string(),
            max_attempts: 3,
            execution_deadline: deadline,
            slot: slot.map(str::to_string),
        }
    }

    /// Field-wise task equality ignoring `created_timestamp`, which is
    /// sampled at apply time on each replica.
    fn same_task(a: &Task, b: &Task) -> bool {
        a.task_id == b.task_id
            && a.task_type == b.task_type
            && a.user_id == b.user_id
            && a.parameter == b.parameter
            && a.result == b.result
            && a.execution_deadline == b.execution_deadline
            && a.max_attempts == b.max_attempts
            && a.attempts == b.attempts
            && a.worker_id == b.worker_id
            && a.slot == b.slot
            && a.status == b.status
    }

    async fn assert_converged(leader: &BrokerStatus, replica: &BrokerStatus) {
        let mut ours = leader.tasks_at_boot().await;
        let mut theirs = replica.tasks_at_boot().await;
        ours.sort_by_key(|t| t.task_id);
        theirs.sort_by_key(|t| t.task_id);
        assert_eq!(ours.len(), theirs.len());
        for (a, b) in ours.iter().zip(theirs.iter()) {
            assert!(same_task(a, b), "diverged on task {}", a.task_id);
        }
        let mut our_workers = leader.workers_at_boot().await;
        let mut their_workers = replica.workers_at_boot().await;
        our_workers.sort_by_key(|w| w.worker_id.clone());
        their_workers.sort_by_key(|w| w.worker_id.clone());
        assert_eq!(our_workers, their_workers);
    }

    #[tokio::test]
    async fn add_assign_finish() {
        let status = BrokerStatus::new(leader_log().await);
        let result = status
            .apply_modification(add_task_edit(&status, 0, None))
            .await
            .unwrap();
        assert_eq!(result.new_task_id, 1);
        assert_eq!(result.sequence_number, Some(1));

        status
            .apply_modification(StatusEdit::AssignTaskToWorker {
                task_id: 1,
                worker_id: "w1".to_string(),
                attempt: 1,
            })
            .await
            .unwrap();
        let task = status.get_task(1).await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.worker_id.as_deref(), Some("w1"));
        assert_eq!(task.attempts, 1);

        status
            .apply_modification(StatusEdit::TaskStatusChange {
                task_id: 1,
                worker_id: Some("w1".to_string()),
                task_status: TaskStatus::Finished,
                result: "ok".to_string(),
            })
            .await
            .unwrap();
        let task = status.get_task(1).await.unwrap();
        assert_eq!(task.status, TaskStatus::Finished);
        assert_eq!(task.result, "ok");
        assert_eq!(status.last_sequence_number().await, 3);
    }

    #[tokio::test]
    async fn duplicate_slot_is_dropped_without_logging() {
        let log = leader_log().await;
        let status = BrokerStatus::new(log.clone());

        let first = status
            .apply_modification(add_task_edit(&status, 0, Some("S")))
            .await
            .unwrap();
        assert_eq!(first.new_task_id, 1);

        let second = status
            .apply_modification(add_task_edit(&status, 0, Some("S")))
            .await
            .unwrap();
        assert_eq!(second.new_task_id, 0);
        assert_eq!(second.sequence_number, None);
        assert_eq!(status.get_all_tasks().await.len(), 1);
        // no log entry was written for the duplicate
        assert_eq!(status.last_sequence_number().await, 1);

        status
            .apply_modification(StatusEdit::TaskStatusChange {
                task_id: 1,
                worker_id: None,
                task_status: TaskStatus::Finished,
                result: "ok".to_string(),
            })
            .await
            .unwrap();

        let third = status
            .apply_modification(add_task_edit(&status, 0, Some("S")))
            .await
            .unwrap();
        assert!(third.new_task_id > 1);
    }

    #[tokio::test]
    async fn failed_append_releases_the_slot() {
        // Leader that never armed the append path: every append fails.
        let log = Arc::new(InMemoryStatusLog::new_leader());
        let status = BrokerStatus::new(log.clone());
        let err = status
            .apply_modification(add_task_edit(&status, 0, Some("S")))
            .await
            .unwrap_err();
        assert!(matches!(err, LogError::NotAvailable(_)));

        log.start_writing().await.unwrap();
        let retried = status
            .apply_modification(add_task_edit(&status, 0, Some("S")))
            .await
            .unwrap();
        assert!(retried.new_task_id > 0);
    }

    #[tokio::test]
    #[should_panic(expected = "bad workerId")]
    async fn worker_mismatch_is_fatal() {
        let status = BrokerStatus::new(leader_log().await);
        status
            .apply_modification(add_task_edit(&status, 0, None))
            .await
            .unwrap();
        status
            .apply_modification(StatusEdit::AssignTaskToWorker {
                task_id: 1,
                worker_id: "w1".to_string(),
                attempt: 1,
            })
            .await
            .unwrap();
        let _ = status
            .apply_modification(StatusEdit::TaskStatusChange {
                task_id: 1,
                worker_id: Some("w2".to_string()),
                task_status: TaskStatus::Finished,
                result: "ok".to_string(),
            })
            .await;
    }

    #[tokio::test]
    #[should_panic(expected = "unknown task")]
    async fn assignment_of_unknown_task_is_fatal() {
        let status = BrokerStatus::new(leader_log().await);
        let _ = status
            .apply_modification(StatusEdit::AssignTaskToWorker {
                task_id: 99,
                worker_id: "w1".to_string(),
                attempt: 1,
            })
            .await;
    }

    #[tokio::test]
    async fn workers_are_created_lazily_and_never_removed() {
        let status = BrokerStatus::new(leader_log().await);
        status
            .apply_modification(StatusEdit::WorkerDisconnected {
                worker_id: "w1".to_string(),
                timestamp: 10,
            })
            .await
            .unwrap();
        let worker = status.get_worker_status("w1").await.unwrap();
        assert_eq!(worker.status, WorkerState::Disconnected);

        status
            .apply_modification(StatusEdit::WorkerConnected {
                worker_id: "w1".to_string(),
                worker_process_id: "pid-7".to_string(),
                worker_location: "10.0.0.1:7000".to_string(),
                timestamp: 20,
            })
            .await
            .unwrap();
        let worker = status.get_worker_status("w1").await.unwrap();
        assert_eq!(worker.status, WorkerState::Connected);
        assert_eq!(worker.location, "10.0.0.1:7000");
        assert_eq!(worker.process_id, "pid-7");
        assert_eq!(worker.last_connection_ts, 20);

        status
            .apply_modification(StatusEdit::WorkerDied {
                worker_id: "w1".to_string(),
                timestamp: 30,
            })
            .await
            .unwrap();
        let worker = status.get_worker_status("w1").await.unwrap();
        assert_eq!(worker.status, WorkerState::Dead);
        assert_eq!(status.get_all_workers().await.len(), 1);
        assert_eq!(status.get_all_workers().await[0].status, "DEAD");
    }

    #[tokio::test]
    async fn replay_reproduces_the_same_status() {
        let log = leader_log().await;
        let leader = BrokerStatus::new(log.clone());
        leader
            .apply_modification(add_task_edit(&leader, 0, Some("S")))
            .await
            .unwrap();
        leader
            .apply_modification(add_task_edit(&leader, 0, None))
            .await
            .unwrap();
        leader
            .apply_modification(StatusEdit::AssignTaskToWorker {
                task_id: 1,
                worker_id: "w1".to_string(),
                attempt: 1,
            })
            .await
            .unwrap();
        leader
            .apply_modification(StatusEdit::WorkerConnected {
                worker_id: "w1".to_string(),
                worker_process_id: "pid".to_string(),
                worker_location: "loc".to_string(),
                timestamp: 5,
            })
            .await
            .unwrap();

        let replica = BrokerStatus::new(Arc::new(log.follower()));
        replica.recover().await.unwrap();
        assert_converged(&leader, &replica).await;
        assert_eq!(
            replica.last_sequence_number().await,
            leader.last_sequence_number().await
        );
        // a slot recovered through replay blocks new submissions
        let dropped = replica
            .apply_modification(add_task_edit(&replica, 0, Some("S")))
            .await
            .unwrap();
        assert_eq!(dropped.new_task_id, 0);
    }

    #[tokio::test]
    async fn snapshot_plus_tail_replay_recovers_everything() {
        let log = leader_log().await;
        let leader = BrokerStatus::new(log.clone());
        for _ in 0..3 {
            leader
                .apply_modification(add_task_edit(&leader, 0, None))
                .await
                .unwrap();
        }
        for task_id in [1u64, 2u64] {
            leader
                .apply_modification(StatusEdit::TaskStatusChange {
                    task_id,
                    worker_id: None,
                    task_status: TaskStatus::Finished,
                    result: "done".to_string(),
                })
                .await
                .unwrap();
        }
        leader.checkpoint().await.unwrap();
        assert_eq!(leader.checkpoints_count(), 1);
        // one more task lands after the checkpoint, in the log tail only
        leader
            .apply_modification(add_task_edit(&leader, 0, None))
            .await
            .unwrap();

        let replica = BrokerStatus::new(Arc::new(log.follower()));
        replica.recover().await.unwrap();
        assert_eq!(replica.get_all_tasks().await.len(), 4);
        assert_converged(&leader, &replica).await;
        // next id assigned after recovery is past every recovered id
        assert_eq!(replica.next_task_id(), 5);
    }

    #[tokio::test]
    async fn snapshot_restores_slot_reservations() {
        let log = leader_log().await;
        let leader = BrokerStatus::new(log.clone());
        leader
            .apply_modification(add_task_edit(&leader, 0, Some("S")))
            .await
            .unwrap();
        leader.checkpoint().await.unwrap();

        let replica = BrokerStatus::new(Arc::new(log.follower()));
        replica.recover().await.unwrap();
        let dropped = replica
            .apply_modification(add_task_edit(&replica, 0, Some("S")))
            .await
            .unwrap();
        assert_eq!(dropped.new_task_id, 0);
    }

    #[tokio::test]
    async fn purge_is_conservative() {
        let status = BrokerStatus::new(leader_log().await);
        let now = now_millis();
        // 1: finished, 2: error, 3: waiting with expired deadline,
        // 4: waiting with expired deadline, 5: running, 6: waiting, no deadline
        for deadline in [0, 0, now - 50, now - 50, 0, 0] {
            status
                .apply_modification(add_task_edit(&status, deadline, None))
                .await
                .unwrap();
        }
        for (task_id, task_status) in [(1u64, TaskStatus::Finished), (2u64, TaskStatus::Error)] {
            status
                .apply_modification(StatusEdit::TaskStatusChange {
                    task_id,
                    worker_id: None,
                    task_status,
                    result: "r".to_string(),
                })
                .await
                .unwrap();
        }
        status
            .apply_modification(StatusEdit::AssignTaskToWorker {
                task_id: 5,
                worker_id: "w1".to_string(),
                attempt: 1,
            })
            .await
            .unwrap();

        // generous retention: terminal tasks are too young to purge
        let expired = status
            .purge_finished_tasks_and_signal_expired(60_000, 1)
            .await;
        assert_eq!(expired.len(), 1, "at most max_expired_per_cycle signaled");
        assert!(expired[0] == 3 || expired[0] == 4);
        assert_eq!(status.get_all_tasks().await.len(), 6);

        // negative retention: every terminal task is older than the cutoff
        let expired = status
            .purge_finished_tasks_and_signal_expired(-1000, 10)
            .await;
        assert_eq!(expired.len(), 2);
        let remaining = status.get_all_tasks().await;
        assert_eq!(remaining.len(), 4);
        assert!(remaining.iter().all(|t| t.task_id != 1 && t.task_id != 2));
    }

    #[tokio::test]
    async fn follower_converges_and_leaves_the_loop_on_promotion() {
        let log = leader_log().await;
        let leader = BrokerStatus::new(log.clone());
        let follower_log = Arc::new(log.follower());
        let follower = Arc::new(BrokerStatus::new(follower_log.clone()));

        let tail = {
            let follower = Arc::clone(&follower);
            tokio::spawn(async move { follower.follow_the_leader().await.unwrap() })
        };

        leader
            .apply_modification(add_task_edit(&leader, 0, None))
            .await
            .unwrap();
        leader
            .apply_modification(StatusEdit::AssignTaskToWorker {
                task_id: 1,
                worker_id: "w1".to_string(),
                attempt: 1,
            })
            .await
            .unwrap();

        let target = leader.last_sequence_number().await;
        loop {
            if follower.last_sequence_number().await == target {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_converged(&leader, &follower).await;

        follower_log.promote();
        tail.await.unwrap();
    }
}
