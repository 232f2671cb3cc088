//! Single-process broker: an in-memory log already elected leader, one
//! simulated worker, a couple of task submissions.
//!
//! Run with: `RUST_LOG=info cargo run --example single_node`

use std::collections::HashMap;
use std::sync::Arc;

use broker::{Broker, BrokerConfiguration, InMemoryTasksHeap};
use replication_core::InMemoryStatusLog;
use shared::types::now_millis;
use shared::TaskStatus;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let log = Arc::new(InMemoryStatusLog::new_leader());
    let heap = Arc::new(InMemoryTasksHeap::new());
    let broker = Broker::new(BrokerConfiguration::default(), log, heap);
    broker.start_as_writable().await?;

    broker
        .worker_connected("worker-1", "pid-4242", "127.0.0.1:7000", now_millis())
        .await?;

    let first = broker.add_task(1, "alice", "payload-1", 3, 0, None).await?;
    let second = broker
        .add_task(1, "bob", "payload-2", 3, 0, Some("nightly-report".to_string()))
        .await?;
    let duplicate = broker
        .add_task(1, "bob", "payload-3", 3, 0, Some("nightly-report".to_string()))
        .await?;
    println!("submitted tasks {first} and {second}, duplicate slot returned {duplicate}");

    let mut space = HashMap::new();
    space.insert(1, 10);
    let assigned = broker
        .assign_tasks_to_worker(10, &space, &[1], "worker-1")
        .await?;
    println!("assigned to worker-1: {assigned:?}");

    for task_id in assigned {
        broker
            .task_finished("worker-1", task_id, TaskStatus::Finished, "done")
            .await?;
    }

    broker.checkpoint().await?;

    for task in broker.broker_status().get_all_tasks().await {
        println!(
            "task {} user={} status={} result={:?}",
            task.task_id, task.user_id, task.status, task.result
        );
    }
    for worker in broker.broker_status().get_all_workers().await {
        println!("worker {} at {} is {}", worker.id, worker.location, worker.status);
    }

    broker.stop().await;
    Ok(())
}
