use std::time::Duration;

use serde::Deserialize;

/// Tunables consumed by the task lifecycle controller. Loading these from a
/// file or the environment is the embedding process's business.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfiguration {
    /// How long finished and errored tasks stay in memory before the
    /// collector drops them.
    pub finished_tasks_retention_ms: i64,
    /// Upper bound on deadline expirations signaled per purge pass.
    pub max_expired_tasks_per_cycle: usize,
    pub checkpoint_period: Duration,
    pub purge_period: Duration,
}

impl Default for BrokerConfiguration {
    fn default() -> Self {
        Self {
            finished_tasks_retention_ms: 15 * 60 * 1000,
            max_expired_tasks_per_cycle: 1000,
            checkpoint_period: Duration::from_secs(60),
            purge_period: Duration::from_secs(15),
        }
    }
}
