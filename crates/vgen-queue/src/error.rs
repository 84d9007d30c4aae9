//! Queue error types.

use thiserror::Error;
use vgen_models::{JobId, JobStatus};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job already queued: {0}")]
    DuplicateJob(JobId),

    #[error("Invalid priority {0}, expected 1-10")]
    InvalidPriority(u8),

    #[error("Job {id} is already {status}")]
    AlreadyTerminal { id: JobId, status: JobStatus },

    #[error("Job {0} is not waiting in the queue")]
    NotPending(JobId),
}
