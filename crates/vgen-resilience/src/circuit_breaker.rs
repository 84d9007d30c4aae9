//! Circuit breaker for upstream provider calls.
//!
//! Provides fault tolerance and graceful degradation for unreliable services.
//!
//! ```text
//! Closed ──(failure_threshold failures)──► Open
//! Open ──(now > next_retry_at)──► HalfOpen
//! HalfOpen ──(half_open_success_threshold successes)──► Closed
//! HalfOpen ──(any failure)──► Open
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::metrics::record_breaker_transition;

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays open before letting a probe through
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes needed to close again
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_success_threshold: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            failure_threshold: std::env::var("VGEN_BREAKER_FAILURE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            recovery_timeout: Duration::from_secs(
                std::env::var("VGEN_BREAKER_RECOVERY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            half_open_success_threshold: std::env::var("VGEN_BREAKER_HALF_OPEN_SUCCESSES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
        }
    }
}

/// Circuit breaker states.
#[derive(Clone, Debug, PartialEq)]
pub enum CircuitState {
    /// Circuit is closed (normal operation)
    Closed,
    /// Circuit is open (failing fast)
    Open { next_retry_at: Instant },
    /// Circuit is half-open (testing recovery)
    HalfOpen { success_count: u32 },
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen { .. } => "half_open",
        }
    }
}

/// Point-in-time view of a breaker for monitoring and error hints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerState {
    pub key: String,
    pub state: &'static str,
    pub failures: u32,
    pub is_open: bool,
    /// Time left until a probe is allowed, when open
    pub retry_after: Option<Duration>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
}

/// Circuit breaker guarding one upstream.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    key: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            key: Arc::from(key.into()),
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
            })),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether calls are currently blocked.
    ///
    /// Once the recovery timeout has passed this moves the breaker to
    /// half-open and returns `false`, letting the probing call through.
    pub fn is_open(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen { .. } => false,
            CircuitState::Open { next_retry_at } => {
                if Instant::now() > next_retry_at {
                    inner.state = CircuitState::HalfOpen { success_count: 0 };
                    info!(breaker = %self.key, "Circuit half-open, probing upstream");
                    record_breaker_transition(&self.key, "half_open");
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen { success_count } => {
                let new_count = success_count + 1;
                if new_count >= self.config.half_open_success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    info!(breaker = %self.key, "Circuit closed, upstream recovered");
                    record_breaker_transition(&self.key, "closed");
                } else {
                    inner.state = CircuitState::HalfOpen {
                        success_count: new_count,
                    };
                }
            }
            // A call that started before the breaker tripped
            CircuitState::Open { .. } => {}
        }
    }

    /// Record a failed operation.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    self.trip(&mut inner);
                }
            }
            CircuitState::HalfOpen { .. } => {
                inner.failures += 1;
                self.trip(&mut inner);
            }
            CircuitState::Open { .. } => {}
        }
    }

    fn trip(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open {
            next_retry_at: Instant::now() + self.config.recovery_timeout,
        };
        warn!(
            breaker = %self.key,
            failures = inner.failures,
            recovery_secs = self.config.recovery_timeout.as_secs(),
            "Circuit opened"
        );
        record_breaker_transition(&self.key, "open");
    }

    /// Time until a probe is allowed, if the breaker is open.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.inner.lock().state {
            CircuitState::Open { next_retry_at } => {
                Some(next_retry_at.saturating_duration_since(Instant::now()))
            }
            _ => None,
        }
    }

    /// Get current state for monitoring.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state.clone()
    }

    /// Snapshot without performing the open → half-open transition.
    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        let (is_open, retry_after) = match inner.state {
            CircuitState::Open { next_retry_at } => {
                let now = Instant::now();
                (now <= next_retry_at, Some(next_retry_at.saturating_duration_since(now)))
            }
            _ => (false, None),
        };
        CircuitBreakerState {
            key: self.key.to_string(),
            state: inner.state.as_str(),
            failures: inner.failures,
            is_open,
            retry_after,
        }
    }
}

/// One breaker per upstream key, created on first use.
#[derive(Clone, Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the breaker for `key`, creating it if needed.
    pub fn get(&self, key: &str) -> CircuitBreaker {
        self.breakers
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| CircuitBreaker::new(key, self.config.clone()))
            .clone()
    }

    pub fn snapshots(&self) -> Vec<CircuitBreakerState> {
        let mut states: Vec<_> = self.breakers.lock().values().map(|b| b.snapshot()).collect();
        states.sort_by(|a, b| a.key.cmp(&b.key));
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("runway", CircuitBreakerConfig::default())
    }

    #[test]
    fn test_opens_after_exactly_threshold_failures() {
        let cb = breaker();
        for _ in 0..4 {
            cb.record_failure();
        }
        assert!(!cb.is_open());
        assert_eq!(cb.snapshot().failures, 4);

        cb.record_failure();
        assert!(cb.is_open());
        assert!(cb.retry_after().is_some());
    }

    #[test]
    fn test_success_resets_failures_while_closed() {
        let cb = breaker();
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.snapshot().failures, 0);

        for _ in 0..4 {
            cb.record_failure();
        }
        assert!(!cb.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_then_close() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure();
        }
        assert!(cb.is_open());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cb.is_open(), "still open until the timeout is strictly exceeded");

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!cb.is_open());
        assert_eq!(cb.state(), CircuitState::HalfOpen { success_count: 0 });

        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen { success_count: 2 });

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        let snapshot = cb.snapshot();
        assert!(!snapshot.is_open);
        assert_eq!(snapshot.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!cb.is_open());

        cb.record_success();
        cb.record_failure();
        assert!(cb.is_open());
        assert_eq!(cb.retry_after(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_snapshot_does_not_transition() {
        let cb = CircuitBreaker::new(
            "luma",
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::ZERO,
                half_open_success_threshold: 1,
            },
        );
        cb.record_failure();
        let _ = cb.snapshot();
        assert_eq!(cb.state().as_str(), "open");
    }

    #[test]
    fn test_registry_shares_breakers_per_key() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        registry.get("pika").record_failure();

        assert!(registry.get("pika").is_open());
        assert!(!registry.get("kling").is_open());
        assert_eq!(registry.snapshots().len(), 2);
    }
}
