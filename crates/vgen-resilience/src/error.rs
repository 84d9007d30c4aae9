//! Resilience error types.

use std::time::Duration;

use thiserror::Error;

pub type BulkheadResult<T> = Result<T, BulkheadError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BulkheadError {
    #[error("Bulkhead '{name}' overloaded: {active} active, {waiting} waiting")]
    Overloaded {
        name: String,
        active: usize,
        waiting: usize,
    },

    #[error("Timed out after {0:?} waiting for a processing slot")]
    AcquireTimeout(Duration),

    #[error("Bulkhead closed")]
    Closed,
}

impl BulkheadError {
    /// Timeouts are transient; overload means the caller should back off.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BulkheadError::AcquireTimeout(_))
    }
}
