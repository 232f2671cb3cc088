use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use shared::TaskId;

/// Ready-queue of waiting task ids, grouped by task type for worker-side
/// matching. Which waiting task goes to which requesting worker is entirely
/// this seam's decision; the broker only inserts on submission/retry, takes
/// on assignment, and removes on expiration.
#[async_trait]
pub trait TasksHeap: Send + Sync {
    async fn insert_task(&self, task_id: TaskId, task_type: i32, user_id: &str);

    /// Takes up to `max` task ids among the requested `groups` (task types),
    /// honoring the per-type capacity in `available_space`. A type missing
    /// from `available_space` is treated as unbounded.
    async fn take_tasks(
        &self,
        max: usize,
        groups: &[i32],
        available_space: &HashMap<i32, usize>,
    ) -> Vec<TaskId>;

    async fn remove_expired_task(&self, task_id: TaskId);
}

/// FIFO-per-type heap. No fairness beyond submission order.
#[derive(Default)]
pub struct InMemoryTasksHeap {
    queues: Mutex<HashMap<i32, VecDeque<TaskId>>>,
}

impl InMemoryTasksHeap {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TasksHeap for InMemoryTasksHeap {
    async fn insert_task(&self, task_id: TaskId, task_type: i32, _user_id: &str) {
        self.queues
            .lock()
            .await
            .entry(task_type)
            .or_default()
            .push_back(task_id);
    }

    async fn take_tasks(
        &self,
        max: usize,
        groups: &[i32],
        available_space: &HashMap<i32, usize>,
    ) -> Vec<TaskId> {
        let mut taken = Vec::new();
        let mut queues = self.queues.lock().await;
        for group in groups {
            let space = available_space.get(group).copied().unwrap_or(usize::MAX);
            let Some(queue) = queues.get_mut(group) else {
                continue;
            };
            let mut taken_for_group = 0;
            while taken.len() < max && taken_for_group < space {
                match queue.pop_front() {
                    Some(task_id) => {
                        taken.push(task_id);
                        taken_for_group += 1;
                    }
                    None => break,
                }
            }
        }
        taken
    }

    async fn remove_expired_task(&self, task_id: TaskId) {
        let mut queues = self.queues.lock().await;
        for queue in queues.values_mut() {
            if let Some(position) = queue.iter().position(|&id| id == task_id) {
                queue.remove(position);
                return;
            }
        }
    }
}
