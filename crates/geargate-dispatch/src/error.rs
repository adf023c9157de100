//! Dispatcher error types.

use thiserror::Error;

/// Outcomes of a submission other than an accepted job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The request id was already satisfied; no new work was scheduled.
    #[error("the request has already been completed")]
    RanToCompletion,

    #[error("the job queue is full, retry later")]
    QueueFull,

    #[error("the dispatcher is shutting down")]
    ShuttingDown,

    #[error("dispatcher error: {0}")]
    Internal(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
