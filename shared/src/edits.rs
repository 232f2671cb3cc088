use serde::{Deserialize, Serialize};

use crate::types::{LogSequenceNumber, Task, TaskId, TaskStatus, WorkerInfo};

/// A single atomic mutation of broker status. Edits are the unit of
/// replication: the leader serializes them into the status log and every
/// replica applies them in sequence order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusEdit {
    AddTask {
        task_id: TaskId,
        task_type: i32,
        parameter: String,
        user_id: String,
        max_attempts: i32,
        execution_deadline: i64,
        slot: Option<String>,
    },
    AssignTaskToWorker {
        task_id: TaskId,
        worker_id: String,
        attempt: i32,
    },
    TaskStatusChange {
        task_id: TaskId,
        worker_id: Option<String>,
        task_status: TaskStatus,
        result: String,
    },
    WorkerConnected {
        worker_id: String,
        worker_process_id: String,
        worker_location: String,
        timestamp: i64,
    },
    WorkerDisconnected {
        worker_id: String,
        timestamp: i64,
    },
    WorkerDied {
        worker_id: String,
        timestamp: i64,
    },
}

/// Self-contained serialization of broker status at a given sequence number,
/// used by the log as a truncation point and by replicas for cold recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerStatusSnapshot {
    pub max_task_id: TaskId,
    pub last_sequence_number: LogSequenceNumber,
    pub tasks: Vec<Task>,
    pub workers: Vec<WorkerInfo>,
}

impl BrokerStatusSnapshot {
    pub fn empty() -> Self {
        Self {
            max_task_id: 0,
            last_sequence_number: 0,
            tasks: Vec::new(),
            workers: Vec::new(),
        }
    }
}

impl Default for BrokerStatusSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
