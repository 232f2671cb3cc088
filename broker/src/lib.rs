pub mod broker;
pub mod config;
pub mod heap;
mod schedulers;

pub use broker::Broker;
pub use config::BrokerConfiguration;
pub use heap::{InMemoryTasksHeap, TasksHeap};
