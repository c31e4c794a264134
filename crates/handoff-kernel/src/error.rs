use std::time::Duration;

use action_primitives::ActionError;
use handoff_core_types::{InvalidTransition, JobId, JobStatus};
use thiserror::Error;

/// Errors surfaced by the task manager's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job {0} already exists")]
    AlreadyExists(JobId),
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {id} is {status}, not waiting for a code")]
    NotAwaitingCode { id: JobId, status: JobStatus },
    #[error("job {0} has no receiver waiting for a code")]
    SignalUnavailable(JobId),
    #[error("invalid action at index {index}: {source}")]
    Validation {
        index: usize,
        #[source]
        source: ActionError,
    },
    #[error("invalid callback url {url}: {reason}")]
    InvalidCallback { url: String, reason: String },
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("engine is shutting down")]
    ShuttingDown,
    #[error("job loops still running after {0:?}")]
    DeadlineExceeded(Duration),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}
