//! Retry executor with exponential backoff.
//!
//! Each upstream supplies its own [`RetryPolicy`]; the executor only decides
//! whether to try again and how long to wait.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::metrics::record_retry;

/// Classification an error must expose to be retried.
pub trait Retryable {
    /// Upstream status code, if the failure came with one.
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// Network and timeout failures are always worth another attempt.
    fn is_transient(&self) -> bool;
}

/// Retry behavior for one upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            retryable_status_codes: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_retryable_status_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.retryable_status_codes = codes.into();
        self
    }

    /// Delay before retry number `retry` (0-based): `initial * multiplier^retry`, capped.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(retry as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    pub fn is_retryable<E: Retryable>(&self, error: &E) -> bool {
        error.is_transient()
            || error
                .status_code()
                .is_some_and(|code| self.retryable_status_codes.contains(&code))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. The last error is returned unchanged.
pub async fn execute_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = %operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts && policy.is_retryable(&e) => {
                let delay = policy.delay_for_retry(attempt - 1);
                warn!(
                    operation = %operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying: {}",
                    e
                );
                record_retry(operation);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt > 1 {
                    warn!(operation = %operation, attempts = attempt, "Giving up: {}", e);
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        status: Option<u16>,
        transient: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (status {:?})", self.status)
        }
    }

    impl Retryable for TestError {
        fn status_code(&self) -> Option<u16> {
            self.status
        }

        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(1000))
    }

    #[test]
    fn test_delay_calculation() {
        let policy = policy();
        assert_eq!(policy.delay_for_retry(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_retry(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_retry(60), Duration::from_millis(1000));
    }

    #[test]
    fn test_fractional_multiplier() {
        let policy = policy().with_backoff_multiplier(1.5);
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(150));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(225));
    }

    #[test]
    fn test_retryability_classification() {
        let policy = policy();
        assert!(policy.is_retryable(&TestError { status: Some(429), transient: false }));
        assert!(policy.is_retryable(&TestError { status: Some(503), transient: false }));
        assert!(policy.is_retryable(&TestError { status: None, transient: true }));
        assert!(!policy.is_retryable(&TestError { status: Some(401), transient: false }));
        assert!(!policy.is_retryable(&TestError { status: None, transient: false }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_is_attempted_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute_with_retry(&policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError { status: Some(401), transient: false }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_uses_all_attempts_with_backoff() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<(), _> = execute_with_retry(&policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError { status: Some(503), transient: false }) }
        })
        .await;

        assert_eq!(result.unwrap_err().status, Some(503));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms between the three attempts
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(310), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventual_success() {
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(&policy(), "test", || {
            let count = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(TestError { status: None, transient: true })
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), _> = execute_with_retry(&policy().with_max_attempts(0), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError { status: Some(500), transient: false }) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
