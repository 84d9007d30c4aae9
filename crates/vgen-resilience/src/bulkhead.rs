//! Bulkhead: a hard cap on concurrently executing jobs.
//!
//! Slots are semaphore permits. Callers beyond the cap wait in the
//! semaphore's FIFO queue, bounded by `max_queue_size`; a released permit
//! goes straight to the head of that queue, so the active count never
//! exceeds `max_concurrent`, even momentarily.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{BulkheadError, BulkheadResult};
use crate::metrics::{record_bulkhead_rejection, set_bulkhead_usage};

/// Bulkhead limits.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkheadConfig {
    pub max_concurrent: usize,
    /// Callers allowed to wait for a slot before new ones are rejected
    pub max_queue_size: usize,
    pub acquire_timeout: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_queue_size: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Current usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadStats {
    pub active: usize,
    pub waiting: usize,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
}

struct Inner {
    name: String,
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
}

impl Inner {
    fn active(&self) -> usize {
        self.config
            .max_concurrent
            .saturating_sub(self.semaphore.available_permits())
    }

    fn report_usage(&self) {
        set_bulkhead_usage(&self.name, self.active(), self.waiting.load(Ordering::SeqCst));
    }
}

/// One unit of the concurrency budget. Dropping it releases the slot.
#[must_use = "dropping a permit releases the slot immediately"]
pub struct BulkheadPermit {
    inner: Arc<Inner>,
    permit: Option<OwnedSemaphorePermit>,
}

impl BulkheadPermit {
    /// Release the slot explicitly.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        if self.permit.take().is_some() {
            self.inner.report_usage();
        }
    }
}

impl std::fmt::Debug for BulkheadPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkheadPermit")
            .field("bulkhead", &self.inner.name)
            .finish()
    }
}

/// Counts a caller as waiting until it gets a slot or gives up.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded admission control for provider work.
#[derive(Clone)]
pub struct Bulkhead {
    inner: Arc<Inner>,
}

impl Bulkhead {
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                semaphore,
                waiting: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &BulkheadConfig {
        &self.inner.config
    }

    fn permit(&self, permit: OwnedSemaphorePermit) -> BulkheadPermit {
        let permit = BulkheadPermit {
            inner: Arc::clone(&self.inner),
            permit: Some(permit),
        };
        self.inner.report_usage();
        permit
    }

    /// Take a slot, waiting up to the configured timeout when all are busy.
    pub async fn acquire(&self) -> BulkheadResult<BulkheadPermit> {
        let inner = &self.inner;
        let config = &inner.config;

        match Arc::clone(&inner.semaphore).try_acquire_owned() {
            Ok(permit) => return Ok(self.permit(permit)),
            Err(tokio::sync::TryAcquireError::Closed) => return Err(BulkheadError::Closed),
            Err(tokio::sync::TryAcquireError::NoPermits) => {}
        }

        let waiting = inner.waiting.fetch_add(1, Ordering::SeqCst);
        let _guard = WaitingGuard(&inner.waiting);
        if waiting >= config.max_queue_size {
            record_bulkhead_rejection(&inner.name, "overloaded");
            return Err(BulkheadError::Overloaded {
                name: inner.name.clone(),
                active: inner.active(),
                waiting,
            });
        }
        inner.report_usage();
        debug!(bulkhead = %inner.name, waiting = waiting + 1, "Waiting for a slot");

        let acquire = Arc::clone(&inner.semaphore).acquire_owned();
        match tokio::time::timeout(config.acquire_timeout, acquire).await {
            Ok(Ok(permit)) => Ok(self.permit(permit)),
            Ok(Err(_)) => Err(BulkheadError::Closed),
            Err(_) => {
                record_bulkhead_rejection(&inner.name, "timeout");
                Err(BulkheadError::AcquireTimeout(config.acquire_timeout))
            }
        }
    }

    /// Stop handing out slots. Waiting and future callers get
    /// [`BulkheadError::Closed`]; held permits stay valid.
    pub fn close(&self) {
        self.inner.semaphore.close();
    }

    pub fn active(&self) -> usize {
        self.inner.active()
    }

    pub fn waiting(&self) -> usize {
        self.inner.waiting.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BulkheadStats {
        BulkheadStats {
            active: self.active(),
            waiting: self.waiting(),
            max_concurrent: self.inner.config.max_concurrent,
            max_queue_size: self.inner.config.max_queue_size,
        }
    }
}

impl std::fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulkhead")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::assert_ok;

    fn bulkhead(max_concurrent: usize, max_queue_size: usize, timeout: Duration) -> Bulkhead {
        Bulkhead::new(
            "test",
            BulkheadConfig {
                max_concurrent,
                max_queue_size,
                acquire_timeout: timeout,
            },
        )
    }

    async fn wait_for_waiting(bulkhead: &Bulkhead, n: usize) {
        while bulkhead.waiting() != n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_admits_until_full_then_rejects_when_queue_full() {
        let bh = bulkhead(2, 0, Duration::from_secs(1));
        let _a = assert_ok!(bh.acquire().await);
        let _b = assert_ok!(bh.acquire().await);
        assert_eq!(bh.active(), 2);

        let err = bh.acquire().await.unwrap_err();
        assert!(matches!(err, BulkheadError::Overloaded { active: 2, waiting: 0, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_release_promotes_waiters_fifo() {
        let bh = bulkhead(1, 2, Duration::from_secs(5));
        let first = bh.acquire().await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let spawn_waiter = |name: &'static str| {
            let bh = bh.clone();
            let order = Arc::clone(&order);
            tokio::spawn(async move {
                let permit = bh.acquire().await.unwrap();
                order.lock().push(name);
                permit
            })
        };

        let a = spawn_waiter("a");
        wait_for_waiting(&bh, 1).await;
        let b = spawn_waiter("b");
        wait_for_waiting(&bh, 2).await;

        assert!(matches!(bh.acquire().await, Err(BulkheadError::Overloaded { .. })));

        first.release();
        let permit_a = a.await.unwrap();
        assert_eq!(bh.active(), 1);
        assert_eq!(*order.lock(), vec!["a"]);

        drop(permit_a);
        let permit_b = b.await.unwrap();
        assert_eq!(bh.active(), 1);
        assert_eq!(*order.lock(), vec!["a", "b"]);

        drop(permit_b);
        assert_eq!(bh.active(), 0);
        assert_eq!(bh.waiting(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_times_out() {
        let bh = bulkhead(1, 1, Duration::from_secs(1));
        let _held = bh.acquire().await.unwrap();

        let err = bh.acquire().await.unwrap_err();
        assert_eq!(err, BulkheadError::AcquireTimeout(Duration::from_secs(1)));
        assert!(err.is_retryable());
        assert_eq!(bh.waiting(), 0);
        assert_eq!(bh.active(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_leak() {
        let bh = bulkhead(1, 1, Duration::from_secs(60));
        let held = bh.acquire().await.unwrap();

        let abandoned = tokio::time::timeout(Duration::from_millis(10), bh.acquire()).await;
        assert!(abandoned.is_err());
        assert_eq!(bh.waiting(), 0);

        drop(held);
        assert_eq!(bh.active(), 0);
        let _again = bh.acquire().await.unwrap();
        assert_eq!(bh.active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_never_exceeds_limit() {
        let bh = bulkhead(3, 20, Duration::from_secs(60));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let bh = bh.clone();
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let permit = bh.acquire().await.unwrap();
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert!(bh.active() <= 3);
                    tokio::time::sleep(Duration::from_millis(10 + i)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    permit.release();
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            result.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(bh.active(), 0);
    }

    #[tokio::test]
    async fn test_close_rejects_waiters_and_keeps_held_permits() {
        let bh = bulkhead(1, 1, Duration::from_secs(60));
        let held = bh.acquire().await.unwrap();

        let waiter = {
            let bh = bh.clone();
            tokio::spawn(async move { bh.acquire().await })
        };
        wait_for_waiting(&bh, 1).await;

        bh.close();
        assert_eq!(waiter.await.unwrap().unwrap_err(), BulkheadError::Closed);
        assert_eq!(bh.acquire().await.unwrap_err(), BulkheadError::Closed);
        assert_eq!(bh.active(), 1);

        held.release();
        assert_eq!(bh.active(), 0);
        assert_eq!(bh.waiting(), 0);
    }
}
