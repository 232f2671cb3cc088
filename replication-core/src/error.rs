use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogError {
    /// The log cannot durably accept writes right now: I/O failure, loss of
    /// leadership, quorum loss. Callers of the leader append path get this
    /// back; the follower loop and recovery treat it as fatal.
    #[error("status log not available: {0}")]
    NotAvailable(String),

    #[error("status log is closed")]
    Closed,
}
