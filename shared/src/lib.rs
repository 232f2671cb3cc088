pub mod edits;
pub mod types;

pub use edits::{BrokerStatusSnapshot, StatusEdit};
pub use types::{
    now_millis, worker_status_label, LogSequenceNumber, Task, TaskId, TaskStatus, TaskStatusView,
    WorkerInfo, WorkerState, WorkerStatusView,
};
