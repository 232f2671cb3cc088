use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use shared::{BrokerStatusSnapshot, LogSequenceNumber, StatusEdit};

use crate::error::LogError;

/// Callback invoked by the log for every edit it streams out, both during
/// recovery replay and while tailing the leader.
#[async_trait]
pub trait ApplyEdit: Send + Sync {
    async fn apply(&self, seq: LogSequenceNumber, edit: &StatusEdit);
}

/// The durable, totally ordered log of status edits. The log is the single
/// source of truth for ordering: implementations MUST serialize concurrent
/// `log_status_edit` calls into a total order, because the leader append path
/// runs outside the status write lock.
#[async_trait]
pub trait StatusLog: Send + Sync {
    /// Durably appends `edit` and returns its assigned sequence number.
    async fn log_status_edit(&self, edit: &StatusEdit) -> Result<LogSequenceNumber, LogError>;

    /// Streams edits with sequence number greater than `from` to `apply`,
    /// blocking for new entries. Returns normally once this replica acquires
    /// leadership or the log is closed.
    async fn follow_the_leader(
        &self,
        from: LogSequenceNumber,
        apply: &dyn ApplyEdit,
    ) -> Result<(), LogError>;

    fn is_leader(&self) -> bool;

    fn is_writable(&self) -> bool;

    fn is_closed(&self) -> bool;

    /// Arms the leader append path.
    async fn start_writing(&self) -> Result<(), LogError>;

    /// Returns the newest durable snapshot, or an empty one.
    async fn load_snapshot(&self) -> Result<BrokerStatusSnapshot, LogError>;

    /// Replays edits with sequence number greater than `from` from durable
    /// storage, in order, until the log tail is reached.
    async fn recovery(
        &self,
        from: LogSequenceNumber,
        apply: &dyn ApplyEdit,
    ) -> Result<(), LogError>;

    /// Atomically records `snapshot` as the new truncation point.
    async fn checkpoint(&self, snapshot: BrokerStatusSnapshot) -> Result<(), LogError>;

    async fn close(&self);
}

struct SharedLog {
    entries: Mutex<Vec<StatusEdit>>,
    snapshot: Mutex<Option<BrokerStatusSnapshot>>,
    wakeup: Notify,
}

/// In-process `StatusLog` backed by a plain vector, with 1-based sequence
/// numbers. Handles created through [`InMemoryStatusLog::follower`] share the
/// same backing entries, which models several replicas attached to the same
/// replicated log: appends on the leader handle become visible to tailing
/// follower handles.
///
/// The entries mutex serializes concurrent appenders, satisfying the total
/// order contract of [`StatusLog`].
pub struct InMemoryStatusLog {
    shared: Arc<SharedLog>,
    leader: AtomicBool,
    writable: AtomicBool,
    closed: AtomicBool,
}

impl InMemoryStatusLog {
    fn with_role(shared: Arc<SharedLog>, leader: bool) -> Self {
        Self {
            shared,
            leader: AtomicBool::new(leader),
            writable: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn new_shared() -> Arc<SharedLog> {
        Arc::new(SharedLog {
            entries: Mutex::new(Vec::new()),
            snapshot: Mutex::new(None),
            wakeup: Notify::new(),
        })
    }

    /// A log handle already elected leader. `start_writing` still has to be
    /// called before appends are accepted.
    pub fn new_leader() -> Self {
        Self::with_role(Self::new_shared(), true)
    }

    pub fn new_follower() -> Self {
        Self::with_role(Self::new_shared(), false)
    }

    /// A follower handle attached to the same backing entries.
    pub fn follower(&self) -> Self {
        Self::with_role(Arc::clone(&self.shared), false)
    }

    /// Models leader election: flips this handle to the leader role and wakes
    /// its tailing loop so it can return.
    pub fn promote(&self) {
        self.leader.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_waiters();
    }

    fn tail_after(&self, from: LogSequenceNumber) -> Vec<(LogSequenceNumber, StatusEdit)> {
        let entries = self.shared.entries.lock().expect("log entries lock poisoned");
        entries
            .iter()
            .enumerate()
            .skip(from as usize)
            .map(|(index, edit)| ((index + 1) as LogSequenceNumber, edit.clone()))
            .collect()
    }
}

#[async_trait]
impl StatusLog for InMemoryStatusLog {
    async fn log_status_edit(&self, edit: &StatusEdit) -> Result<LogSequenceNumber, LogError> {
        if self.is_closed() {
            return Err(LogError::Closed);
        }
        if !self.is_writable() {
            return Err(LogError::NotAvailable("log is not writable".to_string()));
        }
        let seq = {
            let mut entries = self.shared.entries.lock().expect("log entries lock poisoned");
            entries.push(edit.clone());
            entries.len() as LogSequenceNumber
        };
        self.shared.wakeup.notify_waiters();
        Ok(seq)
    }

    async fn follow_the_leader(
        &self,
        from: LogSequenceNumber,
        apply: &dyn ApplyEdit,
    ) -> Result<(), LogError> {
        let mut next = from;
        loop {
            if self.is_closed() || self.is_leader() {
                return Ok(());
            }
            // Register for wakeup before scanning, so an append racing with
            // the scan is not missed.
            let notified = self.shared.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let batch = self.tail_after(next);
            if batch.is_empty() {
                notified.await;
                continue;
            }
            for (seq, edit) in batch {
                apply.apply(seq, &edit).await;
                next = seq;
            }
        }
    }

    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst) && !self.is_closed()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn start_writing(&self) -> Result<(), LogError> {
        if self.is_closed() {
            return Err(LogError::Closed);
        }
        if !self.is_leader() {
            return Err(LogError::NotAvailable(
                "cannot start writing: not the leader".to_string(),
            ));
        }
        self.writable.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<BrokerStatusSnapshot, LogError> {
        if self.is_closed() {
            return Err(LogError::Closed);
        }
        let snapshot = self.shared.snapshot.lock().expect("snapshot lock poisoned");
        Ok(snapshot.clone().unwrap_or_else(BrokerStatusSnapshot::empty))
    }

    async fn recovery(
        &self,
        from: LogSequenceNumber,
        apply: &dyn ApplyEdit,
    ) -> Result<(), LogError> {
        if self.is_closed() {
            return Err(LogError::Closed);
        }
        for (seq, edit) in self.tail_after(from) {
            apply.apply(seq, &edit).await;
        }
        Ok(())
    }

    async fn checkpoint(&self, snapshot: BrokerStatusSnapshot) -> Result<(), LogError> {
        if self.is_closed() {
            return Err(LogError::Closed);
        }
        debug!(
            "checkpoint at sequence {} with {} tasks",
            snapshot.last_sequence_number,
            snapshot.tasks.len()
        );
        // Entries before the snapshot are kept: recovery replays strictly
        // after the snapshot sequence, so they are simply never read again.
        *self.shared.snapshot.lock().expect("snapshot lock poisoned") = Some(snapshot);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_waiters();
    }
}
