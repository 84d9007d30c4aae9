//! In-memory priority job queue.
//!
//! Holds every job the engine knows about. Jobs waiting for the pipeline are
//! kept in a priority-ordered list (highest first, FIFO within a priority);
//! lookups go through a map keyed by job id.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;
use vgen_models::{Job, JobId, JobStatus, MAX_PRIORITY, MIN_PRIORITY};

use crate::error::{QueueError, QueueResult};

/// Queue configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Fixed per-job duration used for wait estimates
    pub avg_job_duration: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            avg_job_duration: Duration::from_secs(120),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            avg_job_duration: Duration::from_secs(
                std::env::var("VGEN_AVG_JOB_DURATION_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
        }
    }
}

/// Aggregate queue counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStatus {
    pub total_jobs: usize,
    /// Waiting for the pipeline
    pub pending_jobs: usize,
    pub active_jobs: usize,
    pub completed_jobs: usize,
    /// Failed or timed out
    pub failed_jobs: usize,
    pub cancelled_jobs: usize,
    /// Wait a newly enqueued job would see
    pub estimated_wait_secs: u64,
}

#[derive(Default)]
struct QueueState {
    /// Pending job ids, dequeue order
    pending: Vec<JobId>,
    jobs: HashMap<JobId, Job>,
}

impl QueueState {
    /// First position whose priority is lower than `priority`.
    fn insertion_index(&self, priority: u8) -> usize {
        self.pending
            .iter()
            .position(|id| self.jobs.get(id).is_some_and(|job| job.priority() < priority))
            .unwrap_or(self.pending.len())
    }

    fn insert_pending(&mut self, id: JobId, priority: u8) {
        let idx = self.insertion_index(priority);
        self.pending.insert(idx, id);
    }

    fn remove_pending(&mut self, id: &JobId) -> bool {
        match self.pending.iter().position(|p| p == id) {
            Some(idx) => {
                self.pending.remove(idx);
                true
            }
            None => false,
        }
    }

    fn recompute_positions(&mut self, avg: Duration) {
        let avg_secs = avg.as_secs();
        for (idx, id) in self.pending.iter().enumerate() {
            if let Some(job) = self.jobs.get_mut(id) {
                let position = idx + 1;
                job.queue_info.position = position;
                job.queue_info.estimated_wait_secs = position as u64 * avg_secs;
            }
        }
    }
}

/// Priority queue plus job store.
pub struct JobQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Add a queued job. Returns the stored snapshot with its position set.
    pub fn enqueue(&self, mut job: Job) -> QueueResult<Job> {
        let mut state = self.state.lock();
        if state.jobs.contains_key(&job.id) {
            return Err(QueueError::DuplicateJob(job.id));
        }

        let id = job.id.clone();
        let priority = job.priority();
        job.status = JobStatus::Queued;
        job.queue_info.queued_at = Utc::now();
        job.touch();

        state.jobs.insert(id.clone(), job);
        state.insert_pending(id.clone(), priority);
        state.recompute_positions(self.config.avg_job_duration);

        let stored = state.jobs.get(&id).cloned().ok_or(QueueError::JobNotFound(id))?;
        debug!(
            job_id = %stored.id,
            priority,
            position = stored.queue_info.position,
            "Job enqueued"
        );
        Ok(stored)
    }

    /// Take the highest-priority pending job and mark it processing.
    pub fn dequeue(&self) -> Option<Job> {
        let mut state = self.state.lock();
        if state.pending.is_empty() {
            return None;
        }
        let id = state.pending.remove(0);
        state.recompute_positions(self.config.avg_job_duration);

        let job = state.jobs.get_mut(&id)?;
        job.status = JobStatus::Processing;
        job.queue_info.position = 0;
        job.queue_info.estimated_wait_secs = 0;
        job.processing_info.attempts += 1;
        let waited = Utc::now() - job.queue_info.queued_at;
        job.processing_info.performance.queue_wait_ms = Some(waited.num_milliseconds().max(0) as u64);
        job.touch();

        debug!(job_id = %id, priority = job.priority(), "Job dequeued");
        Some(job.clone())
    }

    /// Next pending job, without removing it.
    pub fn peek(&self) -> Option<Job> {
        let state = self.state.lock();
        state.pending.first().and_then(|id| state.jobs.get(id)).cloned()
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.state.lock().jobs.get(id).cloned()
    }

    /// Move a pending job to a new priority tier, behind jobs already there.
    pub fn set_priority(&self, id: &JobId, priority: u8) -> QueueResult<Job> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(QueueError::InvalidPriority(priority));
        }

        let mut state = self.state.lock();
        let status = state
            .jobs
            .get(id)
            .map(|job| job.status)
            .ok_or_else(|| QueueError::JobNotFound(id.clone()))?;
        if status != JobStatus::Queued || !state.remove_pending(id) {
            return Err(QueueError::NotPending(id.clone()));
        }

        if let Some(job) = state.jobs.get_mut(id) {
            job.queue_info.priority = priority;
            job.touch();
        }
        state.insert_pending(id.clone(), priority);
        state.recompute_positions(self.config.avg_job_duration);

        state.jobs.get(id).cloned().ok_or_else(|| QueueError::JobNotFound(id.clone()))
    }

    /// Mutate a live job. Terminal jobs are frozen and rejected.
    ///
    /// Bumps `event_seq`. A job that leaves the queued state is dropped from
    /// the pending list.
    pub fn update<F>(&self, id: &JobId, f: F) -> QueueResult<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut state = self.state.lock();
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.clone()))?;
        if job.is_terminal() {
            return Err(QueueError::AlreadyTerminal {
                id: id.clone(),
                status: job.status,
            });
        }

        f(job);
        job.touch();
        let snapshot = job.clone();

        if snapshot.status != JobStatus::Queued && state.remove_pending(id) {
            state.recompute_positions(self.config.avg_job_duration);
        }
        Ok(snapshot)
    }

    /// Record something on a job regardless of its state (feedback,
    /// regeneration history). Status changes are not allowed here.
    pub fn annotate<F>(&self, id: &JobId, f: F) -> QueueResult<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut state = self.state.lock();
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.clone()))?;
        let status = job.status;
        f(job);
        job.status = status;
        job.touch();
        Ok(job.clone())
    }

    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().jobs.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.state.lock();
        let mut status = QueueStatus {
            total_jobs: state.jobs.len(),
            pending_jobs: state.pending.len(),
            estimated_wait_secs: (state.pending.len() as u64 + 1)
                * self.config.avg_job_duration.as_secs(),
            ..Default::default()
        };
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Queued => {}
                JobStatus::Processing => status.active_jobs += 1,
                JobStatus::Completed => status.completed_jobs += 1,
                JobStatus::Failed | JobStatus::Timeout => status.failed_jobs += 1,
                JobStatus::Cancelled => status.cancelled_jobs += 1,
            }
        }
        status
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use vgen_models::{GenerationSettings, OptimizedPrompt, ProviderId};

    fn job(priority: u8) -> Job {
        let prompt = OptimizedPrompt {
            provider: ProviderId::Runway,
            text: "a lighthouse at dusk".to_string(),
            negative_prompt: None,
            image_url: None,
            token_count: 4,
            estimated_cost: 0.25,
        };
        Job::new("user", "prompt", "board", prompt, GenerationSettings::default(), priority)
    }

    #[test]
    fn test_dequeues_by_priority_then_fifo() {
        let queue = JobQueue::default();
        let a = queue.enqueue(job(5)).unwrap();
        let b = queue.enqueue(job(8)).unwrap();
        let c = queue.enqueue(job(5)).unwrap();
        let d = queue.enqueue(job(2)).unwrap();

        let order: Vec<JobId> = std::iter::from_fn(|| queue.dequeue()).map(|j| j.id).collect();
        assert_eq!(order, vec![b.id, a.id, c.id, d.id]);
    }

    #[test]
    fn test_positions_and_wait_estimates() {
        let queue = JobQueue::new(QueueConfig {
            avg_job_duration: Duration::from_secs(60),
        });
        let low = queue.enqueue(job(3)).unwrap();
        assert_eq!(low.queue_info.position, 1);
        assert_eq!(low.queue_info.estimated_wait_secs, 60);

        let high = queue.enqueue(job(9)).unwrap();
        assert_eq!(high.queue_info.position, 1);

        let low = queue.get(&low.id).unwrap();
        assert_eq!(low.queue_info.position, 2);
        assert_eq!(low.queue_info.estimated_wait_secs, 120);

        let taken = queue.dequeue().unwrap();
        assert_eq!(taken.id, high.id);
        assert_eq!(taken.status, JobStatus::Processing);
        assert_eq!(taken.queue_info.position, 0);
        assert_eq!(queue.get(&low.id).unwrap().queue_info.position, 1);
    }

    #[test]
    fn test_set_priority_reorders() {
        let queue = JobQueue::default();
        let a = queue.enqueue(job(5)).unwrap();
        let b = queue.enqueue(job(5)).unwrap();

        let b = assert_ok!(queue.set_priority(&b.id, 7));
        assert_eq!(b.queue_info.position, 1);
        assert_eq!(queue.peek().unwrap().id, b.id);

        assert_eq!(
            queue.set_priority(&a.id, 11),
            Err(QueueError::InvalidPriority(11))
        );
    }

    #[test]
    fn test_update_drops_left_jobs_and_freezes_terminal() {
        let queue = JobQueue::default();
        let a = queue.enqueue(job(5)).unwrap();
        let b = queue.enqueue(job(5)).unwrap();

        let cancelled = queue.update(&a.id, |j| j.finish(JobStatus::Cancelled)).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(queue.get(&b.id).unwrap().queue_info.position, 1);

        let err = assert_err!(queue.update(&a.id, |j| j.status = JobStatus::Processing));
        assert!(matches!(err, QueueError::AlreadyTerminal { status: JobStatus::Cancelled, .. }));
        assert_eq!(queue.dequeue().unwrap().id, b.id);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_event_seq_increases_on_every_mutation() {
        let queue = JobQueue::default();
        let a = queue.enqueue(job(5)).unwrap();
        let updated = queue.update(&a.id, |_| {}).unwrap();
        assert!(updated.event_seq > a.event_seq);

        let annotated = queue.annotate(&a.id, |j| j.status = JobStatus::Failed).unwrap();
        assert_eq!(annotated.status, JobStatus::Queued);
        assert!(annotated.event_seq > updated.event_seq);
    }

    #[test]
    fn test_status_counts() {
        let queue = JobQueue::default();
        let a = queue.enqueue(job(5)).unwrap();
        queue.enqueue(job(5)).unwrap();
        queue.enqueue(job(5)).unwrap();
        queue.dequeue();
        queue.update(&a.id, |j| j.finish(JobStatus::Completed)).unwrap();
        queue.dequeue();

        let status = queue.status();
        assert_eq!(status.total_jobs, 3);
        assert_eq!(status.pending_jobs, 1);
        assert_eq!(status.active_jobs, 1);
        assert_eq!(status.completed_jobs, 1);
        assert!(queue.enqueue(queue.get(&a.id).unwrap()).is_err());
    }
}
