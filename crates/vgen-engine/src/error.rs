//! Engine error types.

use std::time::Duration;

use thiserror::Error;
use vgen_models::{ErrorCategory, JobError, JobId, JobStatus, ProviderId};
use vgen_provider::ProviderError;
use vgen_queue::QueueError;
use vgen_resilience::BulkheadError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{provider} is unavailable, retry after {}s", retry_after.as_secs())]
    ServiceUnavailable {
        provider: ProviderId,
        retry_after: Duration,
    },

    #[error("Engine overloaded: {active} active, {waiting} waiting")]
    Overloaded { active: usize, waiting: usize },

    #[error("Timed out after {0:?} waiting for a processing slot")]
    AcquireTimeout(Duration),

    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("Job {job_id} reached its regeneration limit of {max}")]
    RegenerationLimitExceeded { job_id: JobId, max: u32 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job exceeded its time budget: {0}")]
    Timeout(String),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Engine is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::ServiceUnavailable { .. }
            | EngineError::Overloaded { .. }
            | EngineError::AcquireTimeout(_)
            | EngineError::Timeout(_) => true,
            EngineError::Provider(e) => provider_retryable(e),
            _ => false,
        }
    }

    /// Terminal status a job gets when its pipeline ends with this error.
    pub fn terminal_status(&self) -> JobStatus {
        match self {
            EngineError::Timeout(_) => JobStatus::Timeout,
            EngineError::Cancelled => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        }
    }

    /// User-facing classification attached to a failed job.
    pub fn to_job_error(&self) -> JobError {
        let message = self.to_string();
        match self {
            EngineError::Validation(_) => JobError::new(
                "VALIDATION_ERROR",
                message,
                ErrorCategory::Validation,
                false,
                "Fix the request and submit again",
            ),
            EngineError::ServiceUnavailable { retry_after, .. } => JobError::new(
                "SERVICE_UNAVAILABLE",
                message,
                ErrorCategory::Provider,
                true,
                format!("Retry in {}s", retry_after.as_secs().max(1)),
            ),
            EngineError::Overloaded { .. } | EngineError::AcquireTimeout(_) => JobError::new(
                "CAPACITY_EXCEEDED",
                message,
                ErrorCategory::Capacity,
                true,
                "Retry later",
            ),
            EngineError::Provider(e) => provider_job_error(e, message),
            EngineError::RegenerationLimitExceeded { .. } => JobError::new(
                "REGENERATION_LIMIT_EXCEEDED",
                message,
                ErrorCategory::Validation,
                false,
                "Submit a new job instead",
            ),
            EngineError::Timeout(_) => JobError::new(
                "JOB_TIMEOUT",
                message,
                ErrorCategory::Timeout,
                true,
                "Retry later or request a shorter clip",
            ),
            EngineError::Cancelled => JobError::new(
                "CANCELLED",
                message,
                ErrorCategory::Internal,
                false,
                "Submit the job again if it is still needed",
            ),
            EngineError::InvalidState(_)
            | EngineError::JobNotFound(_)
            | EngineError::ShuttingDown
            | EngineError::Internal(_) => JobError::new(
                "INTERNAL_ERROR",
                message,
                ErrorCategory::Internal,
                false,
                "Contact support",
            ),
        }
    }
}

fn provider_retryable(e: &ProviderError) -> bool {
    match e {
        ProviderError::Network { .. }
        | ProviderError::Timeout { .. }
        | ProviderError::CircuitOpen { .. }
        | ProviderError::GenerationFailed { .. } => true,
        ProviderError::Upstream { retryable, .. } => *retryable,
        _ => false,
    }
}

fn provider_job_error(e: &ProviderError, message: String) -> JobError {
    let retryable = provider_retryable(e);
    if e.is_auth_failure() {
        return JobError::new(
            "PROVIDER_AUTH_FAILED",
            message,
            ErrorCategory::Provider,
            false,
            "Check provider credentials",
        );
    }
    if e.is_quota_exhausted() {
        return JobError::new(
            "PROVIDER_QUOTA_EXHAUSTED",
            message,
            ErrorCategory::Provider,
            false,
            "Check quota",
        );
    }
    if e.is_rate_limited() {
        return JobError::new(
            "PROVIDER_RATE_LIMITED",
            message,
            ErrorCategory::Provider,
            true,
            "Retry later",
        );
    }
    match e {
        ProviderError::Validation { .. } => JobError::new(
            "VALIDATION_ERROR",
            message,
            ErrorCategory::Validation,
            false,
            "Adjust settings to the provider's capabilities",
        ),
        ProviderError::CircuitOpen { retry_after, .. } => JobError::new(
            "SERVICE_UNAVAILABLE",
            message,
            ErrorCategory::Provider,
            true,
            format!("Retry in {}s", retry_after.as_secs().max(1)),
        ),
        ProviderError::GenerationFailed { .. } => JobError::new(
            "GENERATION_FAILED",
            message,
            ErrorCategory::Provider,
            true,
            "Regenerate with an adjusted prompt",
        ),
        ProviderError::Timeout { .. } => JobError::new(
            "PROVIDER_TIMEOUT",
            message,
            ErrorCategory::Timeout,
            true,
            "Retry later",
        ),
        ProviderError::NotConfigured(_) | ProviderError::Config(_) => JobError::new(
            "PROVIDER_NOT_CONFIGURED",
            message,
            ErrorCategory::Internal,
            false,
            "Contact support",
        ),
        _ => JobError::new(
            "PROVIDER_ERROR",
            message,
            ErrorCategory::Provider,
            retryable,
            if retryable { "Retry later" } else { "Contact support" },
        ),
    }
}

impl From<ProviderError> for EngineError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Validation { message, .. } => EngineError::Validation(message),
            ProviderError::CircuitOpen {
                provider,
                retry_after,
            } => EngineError::ServiceUnavailable {
                provider,
                retry_after,
            },
            other => EngineError::Provider(other),
        }
    }
}

impl From<BulkheadError> for EngineError {
    fn from(e: BulkheadError) -> Self {
        match e {
            BulkheadError::Overloaded { active, waiting, .. } => {
                EngineError::Overloaded { active, waiting }
            }
            BulkheadError::AcquireTimeout(waited) => EngineError::AcquireTimeout(waited),
            BulkheadError::Closed => EngineError::ShuttingDown,
        }
    }
}

impl From<QueueError> for EngineError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::JobNotFound(id) => EngineError::JobNotFound(id),
            QueueError::InvalidPriority(p) => {
                EngineError::Validation(format!("Priority {} outside 1-10", p))
            }
            QueueError::AlreadyTerminal { id, status } => {
                EngineError::InvalidState(format!("Job {} is already {}", id, status))
            }
            other => EngineError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_errors_are_classified() {
        let auth = EngineError::Provider(ProviderError::upstream(ProviderId::Runway, 401, "bad key"));
        let job_error = auth.to_job_error();
        assert_eq!(job_error.code, "PROVIDER_AUTH_FAILED");
        assert!(!job_error.is_retryable);
        assert_eq!(job_error.suggested_action, "Check provider credentials");

        let quota = EngineError::Provider(ProviderError::upstream(ProviderId::Runway, 402, "no credits"));
        assert_eq!(quota.to_job_error().suggested_action, "Check quota");

        let flaky = EngineError::Provider(ProviderError::upstream(ProviderId::Runway, 503, "down"));
        assert!(flaky.is_retryable());
        assert!(flaky.to_job_error().is_retryable);
    }

    #[test]
    fn test_upstream_retry_flag_follows_provider_table() {
        let gateway = ProviderError::upstream(ProviderId::Luma, 502, "bad gateway").with_retryable(false);
        let err = EngineError::Provider(gateway);
        assert!(!err.is_retryable());
        assert!(!err.to_job_error().is_retryable);

        let request_timeout =
            ProviderError::upstream(ProviderId::StableVideo, 408, "slow").with_retryable(true);
        assert!(EngineError::Provider(request_timeout).to_job_error().is_retryable);
    }

    #[test]
    fn test_circuit_open_becomes_service_unavailable() {
        let err: EngineError = ProviderError::CircuitOpen {
            provider: ProviderId::Luma,
            retry_after: Duration::from_secs(42),
        }
        .into();
        assert_eq!(
            err,
            EngineError::ServiceUnavailable {
                provider: ProviderId::Luma,
                retry_after: Duration::from_secs(42)
            }
        );
        assert_eq!(err.to_job_error().suggested_action, "Retry in 42s");
    }

    #[test]
    fn test_terminal_status_mapping() {
        assert_eq!(EngineError::Timeout("poll budget".into()).terminal_status(), JobStatus::Timeout);
        assert_eq!(EngineError::validation("x").terminal_status(), JobStatus::Failed);
        assert_eq!(
            EngineError::Timeout("x".into()).to_job_error().category,
            ErrorCategory::Timeout
        );
    }
}
