//! Resilience primitives for calling unreliable AI providers.
//!
//! This crate provides:
//! - Per-upstream circuit breakers and a registry keyed by provider
//! - A retry executor driven by per-provider retry policies
//! - A bulkhead bounding concurrently processing jobs

pub mod bulkhead;
pub mod circuit_breaker;
pub mod error;
pub mod metrics;
pub mod retry;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadPermit, BulkheadStats};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerState, CircuitState,
};
pub use error::{BulkheadError, BulkheadResult};
pub use retry::{execute_with_retry, RetryPolicy, Retryable};
