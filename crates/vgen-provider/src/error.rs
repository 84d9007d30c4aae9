//! Provider error types.

use std::time::Duration;

use thiserror::Error;
use vgen_models::ProviderId;
use vgen_resilience::Retryable;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("Invalid request for {provider}: {message}")]
    Validation { provider: ProviderId, message: String },

    #[error("Circuit open for {provider}, retry after {retry_after:?}")]
    CircuitOpen {
        provider: ProviderId,
        retry_after: Duration,
    },

    /// `retryable` starts from the generic 429/5xx rule and is replaced with
    /// the provider's own table once the client has applied its retry policy.
    #[error("{provider} returned HTTP {status}: {message}")]
    Upstream {
        provider: ProviderId,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Network error talking to {provider}: {message}")]
    Network { provider: ProviderId, message: String },

    #[error("Request to {provider} timed out")]
    Timeout { provider: ProviderId },

    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse { provider: ProviderId, message: String },

    #[error("Generation failed at {provider}: {message}")]
    GenerationFailed { provider: ProviderId, message: String },

    #[error("Provider not configured: {0}")]
    NotConfigured(ProviderId),

    #[error("Invalid provider configuration: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn validation(provider: ProviderId, msg: impl Into<String>) -> Self {
        Self::Validation {
            provider,
            message: msg.into(),
        }
    }

    pub fn upstream(provider: ProviderId, status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            provider,
            status,
            message: msg.into(),
            retryable: status == 429 || status >= 500,
        }
    }

    pub fn network(provider: ProviderId, msg: impl Into<String>) -> Self {
        Self::Network {
            provider,
            message: msg.into(),
        }
    }

    pub fn invalid_response(provider: ProviderId, msg: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider,
            message: msg.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Re-tag an upstream failure with the given retry verdict.
    pub fn with_retryable(self, verdict: bool) -> Self {
        match self {
            ProviderError::Upstream {
                provider,
                status,
                message,
                ..
            } => ProviderError::Upstream {
                provider,
                status,
                message,
                retryable: verdict,
            },
            other => other,
        }
    }

    /// 401/403: credentials are wrong, retrying will not help.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }

    /// 402: the account is out of credits.
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self.status(), Some(402))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.status(), Some(429))
    }

    /// Whether this failure says something about upstream health.
    ///
    /// Local validation and fast-fail rejections do not move the breaker.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            ProviderError::Upstream { .. }
                | ProviderError::Network { .. }
                | ProviderError::Timeout { .. }
                | ProviderError::InvalidResponse { .. }
        )
    }
}

impl Retryable for ProviderError {
    fn status_code(&self) -> Option<u16> {
        self.status()
    }

    fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Network { .. } | ProviderError::Timeout { .. }
        )
    }
}
