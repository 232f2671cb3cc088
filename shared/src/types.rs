use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Task identifiers are minted by the leader and strictly increase for the
/// lifetime of a cluster. Id 0 is never assigned; submission returns it when
/// a slot-bearing task is dropped as a duplicate.
pub type TaskId = u64;

/// Totally ordered sequence number assigned by the status log to every
/// persisted edit. 0 means "nothing applied yet".
pub type LogSequenceNumber = u64;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    Waiting,
    Running,
    Finished,
    Error,
}

impl TaskStatus {
    /// Stable numeric code, exposed as-is on client views.
    pub fn as_code(self) -> i32 {
        match self {
            TaskStatus::Waiting => 0,
            TaskStatus::Running => 1,
            TaskStatus::Finished => 2,
            TaskStatus::Error => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerState {
    Connected,
    Disconnected,
    Dead,
}

impl WorkerState {
    pub fn as_code(self) -> i32 {
        match self {
            WorkerState::Connected => 0,
            WorkerState::Disconnected => 1,
            WorkerState::Dead => 2,
        }
    }
}

/// Label for a raw worker status code. Unknown codes render as `?<n>` so a
/// client talking to a newer broker still gets something printable.
pub fn worker_status_label(code: i32) -> String {
    match code {
        0 => "CONNECTED".to_string(),
        1 => "DISCONNECTED".to_string(),
        2 => "DEAD".to_string(),
        other => format!("?{}", other),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub task_id: TaskId,
    pub task_type: i32,
    pub user_id: String,
    pub parameter: String,
    pub result: String,
    pub created_timestamp: i64,
    /// Milliseconds since epoch, 0 means no deadline.
    pub execution_deadline: i64,
    /// 0 means unlimited attempts.
    pub max_attempts: i32,
    pub attempts: i32,
    pub worker_id: Option<String>,
    pub slot: Option<String>,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub location: String,
    pub process_id: String,
    pub last_connection_ts: i64,
    pub status: WorkerState,
}

impl WorkerInfo {
    pub fn new(worker_id: impl Into<String>, status: WorkerState) -> Self {
        Self {
            worker_id: worker_id.into(),
            location: String::new(),
            process_id: String::new(),
            last_connection_ts: 0,
            status,
        }
    }
}

/// Structural copy of a task handed out to clients; task status travels as
/// its numeric code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub task_id: TaskId,
    pub task_type: i32,
    pub user_id: String,
    pub parameter: String,
    pub result: String,
    pub created_timestamp: i64,
    pub execution_deadline: i64,
    pub max_attempts: i32,
    pub attempts: i32,
    pub worker_id: Option<String>,
    pub status: i32,
}

impl TaskStatusView {
    pub fn of(task: &Task) -> Self {
        Self {
            task_id: task.task_id,
            task_type: task.task_type,
            user_id: task.user_id.clone(),
            parameter: task.parameter.clone(),
            result: task.result.clone(),
            created_timestamp: task.created_timestamp,
            execution_deadline: task.execution_deadline,
            max_attempts: task.max_attempts,
            attempts: task.attempts,
            worker_id: task.worker_id.clone(),
            status: task.status.as_code(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatusView {
    pub id: String,
    pub location: String,
    pub process_id: String,
    pub last_connection_ts: i64,
    pub status: String,
}

impl WorkerStatusView {
    pub fn of(worker: &WorkerInfo) -> Self {
        Self {
            id: worker.worker_id.clone(),
            location: worker.location.clone(),
            process_id: worker.process_id.clone(),
            last_connection_ts: worker.last_connection_ts,
            status: worker_status_label(worker.status.as_code()),
        }
    }
}
