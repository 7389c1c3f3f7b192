use jiff::SignedDuration;
use thiserror::Error;
use uuid::Uuid;

/// Failure taxonomy for the dispatch pipeline. Every internal failure is
/// normalized into one of these before it reaches a job's terminal state.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("queue is full ({capacity} jobs pending)")]
    QueueFull { capacity: usize },

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("solver process failed: {0}")]
    Process(String),

    #[error("solver timed out after {0:#}")]
    Timeout(SignedDuration),

    #[error("job cancelled")]
    Cancelled,

    #[error("reconciliation failed: {0}")]
    Reconciliation(String),

    #[error("persistence failed: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl DispatchError {
    /// Cancellation is a distinct terminal state, not a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DispatchError::Cancelled)
    }
}
