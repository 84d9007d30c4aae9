//! Per-job progress fan-out.
//!
//! Every job gets a channel with any number of subscribers. Snapshots are
//! delivered in `event_seq` order; stale snapshots and anything after the
//! terminal one are dropped. After the terminal snapshot is delivered the
//! channel is closed, its subscribers released and the channel itself
//! dropped. A bounded set of recently closed ids keeps rejecting late
//! publishes and subscriptions for those jobs.
//!
//! No lock is held while a callback runs. A callback may unsubscribe, or even
//! trigger another publish for the same job; that publish is queued and
//! delivered by whichever call is already dispatching.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use vgen_models::{Job, JobId};

type Callback = Arc<dyn Fn(&Job) + Send + Sync>;

/// Closed job ids remembered by default.
pub const DEFAULT_CLOSED_RETENTION: usize = 4096;

#[derive(Default)]
struct Delivery {
    last_seq: Option<u64>,
    closed: bool,
    dispatching: bool,
    pending: VecDeque<Job>,
}

#[derive(Default)]
struct Channel {
    subscribers: Mutex<Vec<(u64, Callback)>>,
    delivery: Mutex<Delivery>,
}

impl Channel {
    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }
}

/// Handle returned by [`ProgressBroadcaster::subscribe`].
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    job_id: JobId,
    id: u64,
    channel: Weak<Channel>,
}

impl Subscription {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Stop receiving updates. Returns `false` if already gone (for example
    /// because the job reached a terminal state).
    pub fn unsubscribe(self) -> bool {
        match self.channel.upgrade() {
            Some(channel) => channel.remove(self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

#[derive(Default)]
struct Channels {
    open: HashMap<JobId, Arc<Channel>>,
    closed: HashSet<JobId>,
    closed_order: VecDeque<JobId>,
}

impl Channels {
    fn retire(&mut self, job_id: &JobId, retention: usize) {
        self.open.remove(job_id);
        if self.closed.insert(job_id.clone()) {
            self.closed_order.push_back(job_id.clone());
        }
        while self.closed_order.len() > retention {
            if let Some(oldest) = self.closed_order.pop_front() {
                self.closed.remove(&oldest);
            }
        }
    }
}

/// Observer registry for job snapshots.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    channels: Arc<Mutex<Channels>>,
    next_id: Arc<AtomicU64>,
    closed_retention: usize,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::with_closed_retention(DEFAULT_CLOSED_RETENTION)
    }
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember at most `retention` closed job ids.
    pub fn with_closed_retention(retention: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(Channels::default())),
            next_id: Arc::new(AtomicU64::new(0)),
            closed_retention: retention,
        }
    }

    /// Open channel for `job_id`, or `None` once the job's channel has closed.
    fn channel(&self, job_id: &JobId) -> Option<Arc<Channel>> {
        let mut channels = self.channels.lock();
        if channels.closed.contains(job_id) {
            return None;
        }
        Some(Arc::clone(channels.open.entry(job_id.clone()).or_default()))
    }

    /// Register `callback` for every future snapshot of `job_id`.
    pub fn subscribe<F>(&self, job_id: &JobId, callback: F) -> Subscription
    where
        F: Fn(&Job) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let Some(channel) = self.channel(job_id) else {
            return Subscription {
                job_id: job_id.clone(),
                id,
                channel: Weak::new(),
            };
        };

        // Hold the delivery lock so a concurrent close cannot miss us.
        let delivery = channel.delivery.lock();
        if !delivery.closed {
            channel.subscribers.lock().push((id, Arc::new(callback)));
        }
        drop(delivery);

        Subscription {
            job_id: job_id.clone(),
            id,
            channel: Arc::downgrade(&channel),
        }
    }

    /// Channel form of [`subscribe`](Self::subscribe). The receiver ends after
    /// the terminal snapshot.
    pub fn watch(&self, job_id: &JobId) -> mpsc::UnboundedReceiver<Job> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _subscription = self.subscribe(job_id, move |job| {
            let _ = tx.send(job.clone());
        });
        rx
    }

    /// Deliver a snapshot to the job's subscribers.
    ///
    /// Returns `false` when the snapshot was dropped as stale or late.
    pub fn publish(&self, job: &Job) -> bool {
        let Some(channel) = self.channel(&job.id) else {
            debug!(job_id = %job.id, event_seq = job.event_seq, "Dropping progress event for closed job");
            return false;
        };

        {
            let mut delivery = channel.delivery.lock();
            if delivery.closed || delivery.last_seq.is_some_and(|seq| job.event_seq <= seq) {
                debug!(job_id = %job.id, event_seq = job.event_seq, "Dropping stale progress event");
                return false;
            }
            delivery.last_seq = Some(job.event_seq);
            if job.is_terminal() {
                delivery.closed = true;
            }
            delivery.pending.push_back(job.clone());
            if delivery.dispatching {
                return true;
            }
            delivery.dispatching = true;
        }

        loop {
            let next = {
                let mut delivery = channel.delivery.lock();
                match delivery.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        delivery.dispatching = false;
                        break;
                    }
                }
            };

            let subscribers: Vec<Callback> = channel
                .subscribers
                .lock()
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect();

            for callback in subscribers {
                if catch_unwind(AssertUnwindSafe(|| callback(&next))).is_err() {
                    warn!(job_id = %next.id, "Progress subscriber panicked");
                }
            }

            if next.is_terminal() {
                channel.subscribers.lock().clear();
                self.channels
                    .lock()
                    .retire(&next.id, self.closed_retention);
                debug!(job_id = %next.id, status = %next.status, "Progress channel closed");
            }
        }

        true
    }

    pub fn subscriber_count(&self, job_id: &JobId) -> usize {
        self.channels
            .lock()
            .open
            .get(job_id)
            .map_or(0, |channel| channel.subscribers.lock().len())
    }

    pub fn is_closed(&self, job_id: &JobId) -> bool {
        let channels = self.channels.lock();
        channels.closed.contains(job_id)
            || channels
                .open
                .get(job_id)
                .is_some_and(|channel| channel.delivery.lock().closed)
    }

    /// Channels still open, i.e. jobs that have not delivered a terminal snapshot.
    pub fn open_channels(&self) -> usize {
        self.channels.lock().open.len()
    }
}

impl std::fmt::Debug for ProgressBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressBroadcaster")
            .field("open_channels", &self.channels.lock().open.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgen_models::{GenerationSettings, JobStatus, OptimizedPrompt, ProviderId};

    fn job() -> Job {
        let prompt = OptimizedPrompt {
            provider: ProviderId::Haiper,
            text: "a paper boat in the rain".to_string(),
            negative_prompt: None,
            image_url: None,
            token_count: 6,
            estimated_cost: 0.15,
        };
        Job::new("user", "prompt", "board", prompt, GenerationSettings::default(), 5)
    }

    fn with_seq(base: &Job, seq: u64) -> Job {
        let mut job = base.clone();
        job.event_seq = seq;
        job
    }

    fn recorder(broadcaster: &ProgressBroadcaster, job: &Job) -> (Subscription, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = broadcaster.subscribe(&job.id, move |j| sink.lock().push(j.event_seq));
        (sub, seen)
    }

    #[test]
    fn test_drops_stale_and_post_terminal_events() {
        let broadcaster = ProgressBroadcaster::new();
        let base = job();
        let (_sub, seen) = recorder(&broadcaster, &base);

        assert!(broadcaster.publish(&with_seq(&base, 1)));
        assert!(broadcaster.publish(&with_seq(&base, 3)));
        assert!(!broadcaster.publish(&with_seq(&base, 2)));

        let mut terminal = with_seq(&base, 4);
        terminal.finish(JobStatus::Cancelled);
        assert!(broadcaster.publish(&terminal));
        assert!(!broadcaster.publish(&with_seq(&base, 5)));

        assert_eq!(*seen.lock(), vec![1, 3, 4]);
        assert!(broadcaster.is_closed(&base.id));
        assert_eq!(broadcaster.subscriber_count(&base.id), 0);
    }

    #[test]
    fn test_unsubscribe_during_broadcast() {
        let broadcaster = ProgressBroadcaster::new();
        let base = job();

        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));
        let sub = {
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&calls);
            broadcaster.subscribe(&base.id, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(sub) = slot.lock().take() {
                    sub.unsubscribe();
                }
            })
        };
        *slot.lock() = Some(sub);
        let (_other, seen) = recorder(&broadcaster, &base);

        broadcaster.publish(&with_seq(&base, 1));
        broadcaster.publish(&with_seq(&base, 2));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let broadcaster = ProgressBroadcaster::new();
        let base = job();
        let _bad = broadcaster.subscribe(&base.id, |_| panic!("boom"));
        let (_good, seen) = recorder(&broadcaster, &base);

        broadcaster.publish(&with_seq(&base, 1));
        assert_eq!(*seen.lock(), vec![1]);
    }

    #[test]
    fn test_reentrant_publish_is_queued_in_order() {
        let broadcaster = ProgressBroadcaster::new();
        let base = job();
        let inner = broadcaster.clone();
        let follow_up = with_seq(&base, 2);
        let _sub = broadcaster.subscribe(&base.id, move |j| {
            if j.event_seq == 1 {
                inner.publish(&follow_up);
            }
        });
        let (_rec, seen) = recorder(&broadcaster, &base);

        broadcaster.publish(&with_seq(&base, 1));
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_watch_ends_after_terminal() {
        let broadcaster = ProgressBroadcaster::new();
        let base = job();
        let mut rx = broadcaster.watch(&base.id);

        broadcaster.publish(&with_seq(&base, 1));
        let mut done = with_seq(&base, 2);
        done.finish(JobStatus::Completed);
        broadcaster.publish(&done);

        assert_eq!(rx.recv().await.unwrap().event_seq, 1);
        assert_eq!(rx.recv().await.unwrap().status, JobStatus::Completed);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_subscribe_after_close_is_inert() {
        let broadcaster = ProgressBroadcaster::new();
        let mut done = job();
        done.event_seq = 1;
        done.finish(JobStatus::Failed);
        broadcaster.publish(&done);

        let (sub, seen) = recorder(&broadcaster, &done);
        assert!(seen.lock().is_empty());
        assert!(!sub.unsubscribe());
    }

    fn finished(seq: u64) -> Job {
        let mut done = job();
        done.event_seq = seq;
        done.finish(JobStatus::Completed);
        done
    }

    #[test]
    fn test_terminal_channels_are_released() {
        let broadcaster = ProgressBroadcaster::new();
        let mut last = None;
        for _ in 0..1000 {
            let base = job();
            let _rx = broadcaster.watch(&base.id);
            assert!(broadcaster.publish(&with_seq(&base, 1)));
            let mut done = with_seq(&base, 2);
            done.finish(JobStatus::Completed);
            assert!(broadcaster.publish(&done));
            last = Some(base);
        }
        assert_eq!(broadcaster.open_channels(), 0);

        let last = last.unwrap();
        assert!(broadcaster.is_closed(&last.id));
        assert!(!broadcaster.publish(&with_seq(&last, 3)));
        assert_eq!(broadcaster.open_channels(), 0);
    }

    #[test]
    fn test_closed_ids_are_bounded() {
        let broadcaster = ProgressBroadcaster::with_closed_retention(2);
        let first = finished(1);
        broadcaster.publish(&first);
        assert!(broadcaster.is_closed(&first.id));

        broadcaster.publish(&finished(1));
        broadcaster.publish(&finished(1));
        assert!(!broadcaster.is_closed(&first.id));
        assert_eq!(broadcaster.open_channels(), 0);
    }
}
