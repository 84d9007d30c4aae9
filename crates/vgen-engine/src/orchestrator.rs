//! Generation orchestrator.
//!
//! Admission runs synchronously inside [`Orchestrator::submit`]: request
//! validation, the cost check, the provider circuit gate and a bulkhead
//! slot. An admitted job is enqueued and a pipeline task is spawned for it;
//! the caller gets the queued snapshot back immediately.
//!
//! Slots are kept per job and taken out of the map exactly once, either by
//! `cancel` or when the pipeline run ends.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use validator::Validate;
use vgen_models::{
    Feedback, GenerationSettings, Job, JobId, JobStatus, ProviderId, ProviderRequest,
    RegenerationAttempt, RegenerationRequest, ResourceUsage, SettingsOverrides, StoryboardStatus,
    MAX_PRIORITY, MIN_PRIORITY,
};
use vgen_provider::ProviderRegistry;
use vgen_queue::{JobQueue, ProgressBroadcaster, QueueStatus, Subscription};
use vgen_resilience::{Bulkhead, BulkheadPermit, BulkheadStats, CircuitBreakerState};

use crate::collaborators::{PromptSource, StoryboardSource};
use crate::config::OrchestratorConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics::{
    record_admission_rejection, record_job_finished, record_job_submitted, set_active_jobs,
};
use crate::pipeline;

/// A request to generate one video.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub user_id: String,
    pub prompt_id: String,
    pub storyboard_id: String,
    pub provider: Option<ProviderId>,
    pub settings: SettingsOverrides,
    /// 1 (lowest) to 10 (highest); the configured default when absent
    pub priority: Option<u8>,
}

impl GenerationRequest {
    pub fn new(
        user_id: impl Into<String>,
        prompt_id: impl Into<String>,
        storyboard_id: impl Into<String>,
        provider: ProviderId,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            prompt_id: prompt_id.into(),
            storyboard_id: storyboard_id.into(),
            provider: Some(provider),
            settings: SettingsOverrides::default(),
            priority: None,
        }
    }

    pub fn with_settings(mut self, settings: SettingsOverrides) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Result of [`Orchestrator::submit_feedback`].
#[derive(Debug, Clone)]
pub struct FeedbackReceipt {
    /// The rated job, feedback appended
    pub job: Job,
    /// Job spawned when the feedback asked for a regeneration
    pub regeneration: Option<Job>,
}

pub(crate) struct Inner {
    pub(crate) config: OrchestratorConfig,
    pub(crate) registry: ProviderRegistry,
    pub(crate) queue: JobQueue,
    pub(crate) broadcaster: ProgressBroadcaster,
    pub(crate) bulkhead: Bulkhead,
    slots: Mutex<HashMap<JobId, BulkheadPermit>>,
    prompts: Arc<dyn PromptSource>,
    storyboards: Arc<dyn StoryboardSource>,
    shutting_down: AtomicBool,
}

impl Inner {
    /// Give the job's slot back. Returns `false` if it was already released.
    pub(crate) fn release_slot(&self, job_id: &JobId) -> bool {
        let permit = self.slots.lock().remove(job_id);
        let released = permit.is_some();
        drop(permit);
        set_active_jobs(self.bulkhead.active());
        released
    }
}

/// Provider request for a job's current prompt and settings.
pub(crate) fn provider_request(job: &Job) -> ProviderRequest {
    let mut metadata = BTreeMap::new();
    metadata.insert("job_id".to_string(), job.id.to_string());
    metadata.insert("user_id".to_string(), job.user_id.clone());
    ProviderRequest {
        prompt: job.prompt.text.clone(),
        negative_prompt: job.prompt.negative_prompt.clone(),
        image_url: job.prompt.image_url.clone(),
        settings: job.settings.clone(),
        metadata,
    }
}

/// Entry point for submitting and tracking generation jobs.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: ProviderRegistry,
        prompts: Arc<dyn PromptSource>,
        storyboards: Arc<dyn StoryboardSource>,
    ) -> Self {
        let bulkhead = Bulkhead::new("generation", config.bulkhead());
        let queue = JobQueue::new(config.queue.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                queue,
                broadcaster: ProgressBroadcaster::new(),
                bulkhead,
                slots: Mutex::new(HashMap::new()),
                prompts,
                storyboards,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    /// Validate and admit a generation request.
    ///
    /// Returns the queued job once it holds a processing slot. Waits for a
    /// slot up to the configured acquire timeout.
    pub async fn submit(&self, request: GenerationRequest) -> EngineResult<Job> {
        self.ensure_accepting()?;

        let provider = request
            .provider
            .ok_or_else(|| EngineError::validation("A provider must be selected"))?;
        for (field, value) in [
            ("user_id", &request.user_id),
            ("prompt_id", &request.prompt_id),
            ("storyboard_id", &request.storyboard_id),
        ] {
            if value.trim().is_empty() {
                record_admission_rejection(provider, "validation");
                return Err(EngineError::validation(format!("{} must not be empty", field)));
            }
        }

        let priority = request.priority.unwrap_or(self.inner.config.default_priority);
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            record_admission_rejection(provider, "validation");
            return Err(EngineError::validation(format!(
                "Priority {} outside {}-{}",
                priority, MIN_PRIORITY, MAX_PRIORITY
            )));
        }

        match self
            .inner
            .storyboards
            .storyboard_status(&request.storyboard_id)
            .await
        {
            Some(StoryboardStatus::Completed) => {}
            Some(status) => {
                record_admission_rejection(provider, "validation");
                return Err(EngineError::validation(format!(
                    "Storyboard {} is {:?}, expected Completed",
                    request.storyboard_id, status
                )));
            }
            None => {
                record_admission_rejection(provider, "validation");
                return Err(EngineError::validation(format!(
                    "Storyboard {} not found",
                    request.storyboard_id
                )));
            }
        }

        let prompt = self
            .inner
            .prompts
            .optimized_prompt(&request.prompt_id, provider)
            .await
            .filter(|prompt| prompt.provider == provider)
            .ok_or_else(|| {
                record_admission_rejection(provider, "validation");
                EngineError::validation(format!(
                    "No optimized prompt {} for {}",
                    request.prompt_id, provider
                ))
            })?;

        let settings = GenerationSettings::default().merged(&request.settings);
        let mut job = Job::new(
            request.user_id,
            request.prompt_id,
            request.storyboard_id,
            prompt,
            settings,
            priority,
        );
        job.max_regeneration_attempts = self.inner.config.max_regeneration_attempts;

        self.admit(job, false).await
    }

    /// Capability, cost and circuit checks, then slot, queue and pipeline.
    async fn admit(&self, mut job: Job, regeneration: bool) -> EngineResult<Job> {
        let inner = &self.inner;
        let provider = job.provider;
        let client = inner.registry.get(provider)?;

        let request = provider_request(&job);
        if let Err(e) = client.validate(&request) {
            record_admission_rejection(provider, "validation");
            return Err(e.into());
        }

        let cost = client.estimate_cost(&request);
        if cost > inner.config.max_cost_per_job {
            record_admission_rejection(provider, "cost");
            return Err(EngineError::validation(format!(
                "Estimated cost ${:.2} exceeds the ${:.2} per-job limit",
                cost, inner.config.max_cost_per_job
            )));
        }
        job.estimated_cost = cost;

        if client.breaker().is_open() {
            record_admission_rejection(provider, "circuit_open");
            return Err(EngineError::ServiceUnavailable {
                provider,
                retry_after: client.breaker().retry_after().unwrap_or_default(),
            });
        }

        let permit = inner.bulkhead.acquire().await.map_err(|e| {
            record_admission_rejection(provider, "capacity");
            EngineError::from(e)
        })?;
        if inner.shutting_down.load(Ordering::SeqCst) {
            permit.release();
            return Err(EngineError::ShuttingDown);
        }

        let stats = inner.bulkhead.stats();
        job.processing_info.resource_usage = ResourceUsage {
            active_slots: stats.active,
            max_slots: stats.max_concurrent,
            waiting_admissions: stats.waiting,
        };

        let job_id = job.id.clone();
        inner.slots.lock().insert(job_id.clone(), permit);
        let job = match inner.queue.enqueue(job) {
            Ok(job) => job,
            Err(e) => {
                inner.release_slot(&job_id);
                return Err(e.into());
            }
        };

        inner.broadcaster.publish(&job);
        record_job_submitted(provider, regeneration);
        set_active_jobs(stats.active);
        info!(
            job_id = %job.id,
            provider = %provider,
            priority = job.priority(),
            position = job.queue_info.position,
            estimated_cost = cost,
            "Job admitted"
        );

        tokio::spawn(pipeline::run_next(Arc::clone(inner)));
        Ok(job)
    }

    /// Current snapshot of a job.
    pub fn status(&self, job_id: &JobId) -> EngineResult<Job> {
        self.inner
            .queue
            .get(job_id)
            .ok_or_else(|| EngineError::JobNotFound(job_id.clone()))
    }

    /// Cancel a queued or processing job.
    ///
    /// Releases the job's slot right away. An in-flight provider call is not
    /// aborted; the pipeline notices the cancellation at its next step.
    pub fn cancel(&self, job_id: &JobId) -> EngineResult<Job> {
        let job = self
            .inner
            .queue
            .update(job_id, |job| {
                job.progress.current_operation = "Cancelled".to_string();
                job.finish(JobStatus::Cancelled);
            })
            .map_err(EngineError::from)?;

        self.inner.release_slot(job_id);
        self.inner.broadcaster.publish(&job);
        record_job_finished(job.provider, JobStatus::Cancelled, None);
        info!(job_id = %job_id, provider = %job.provider, "Job cancelled");
        Ok(job)
    }

    /// Move a queued job to another priority tier.
    pub fn set_priority(&self, job_id: &JobId, priority: u8) -> EngineResult<Job> {
        let job = self
            .inner
            .queue
            .set_priority(job_id, priority)
            .map_err(|e| match e {
                vgen_queue::QueueError::NotPending(id) => {
                    EngineError::invalid_state(format!("Job {} is no longer queued", id))
                }
                other => EngineError::from(other),
            })?;
        self.inner.broadcaster.publish(&job);
        Ok(job)
    }

    /// Spawn a new job from a finished one.
    ///
    /// Every regeneration in a lineage counts against the root job's budget,
    /// whichever member of the lineage it was requested from. The attempt is
    /// recorded on the root before the new job is admitted and rolled back if
    /// admission fails.
    pub async fn request_regeneration(
        &self,
        job_id: &JobId,
        request: RegenerationRequest,
    ) -> EngineResult<Job> {
        request
            .validate()
            .map_err(|e| EngineError::validation(e.to_string()))?;
        self.ensure_accepting()?;

        let original = self.status(job_id)?;
        if !original.is_terminal() {
            return Err(EngineError::invalid_state(format!(
                "Job {} is {}; only finished jobs can be regenerated",
                job_id, original.status
            )));
        }

        let attempt = RegenerationAttempt {
            parent_job_id: job_id.clone(),
            spawned_job_id: JobId::new(),
            reason: request.reason,
            feedback: request.feedback.clone(),
            settings_overrides: request.settings_overrides.clone(),
            prompt_override: request.prompt_override.clone(),
            requested_at: Utc::now(),
        };
        let spawned_id = attempt.spawned_job_id.clone();

        let root_id = self.lineage_root(&original);
        let mut reserved = false;
        let root = self.inner.queue.annotate(&root_id, |job| {
            if (job.regeneration_history.len() as u32) < job.max_regeneration_attempts {
                job.regeneration_history.push(attempt);
                reserved = true;
            }
        })?;
        if !reserved {
            return Err(EngineError::RegenerationLimitExceeded {
                job_id: root_id,
                max: root.max_regeneration_attempts,
            });
        }

        let mut prompt = original.prompt.clone();
        if let Some(text) = &request.prompt_override {
            let client = self.inner.registry.get(original.provider)?;
            prompt.text = client.provider().optimize_prompt(text);
            prompt.token_count = prompt.text.split_whitespace().count() as u32;
        }

        let mut job = Job::new(
            original.user_id.clone(),
            original.prompt_id.clone(),
            original.storyboard_id.clone(),
            prompt,
            original.settings.merged(&request.settings_overrides),
            original.priority(),
        );
        job.id = spawned_id.clone();
        job.parent_job_id = Some(original.id.clone());
        job.regeneration_history = root.regeneration_history.clone();
        job.max_regeneration_attempts = root.max_regeneration_attempts;

        match self.admit(job, true).await {
            Ok(job) => {
                info!(
                    job_id = %job_id,
                    spawned_job_id = %job.id,
                    reason = ?request.reason,
                    root_job_id = %root_id,
                    remaining = root.regenerations_remaining(),
                    "Regeneration admitted"
                );
                Ok(job)
            }
            Err(e) => {
                let _ = self.inner.queue.annotate(&root_id, |job| {
                    job.regeneration_history
                        .retain(|a| a.spawned_job_id != spawned_id);
                });
                warn!(job_id = %job_id, error = %e, "Regeneration rejected");
                Err(e)
            }
        }
    }

    /// First job of the regeneration lineage `job` belongs to.
    fn lineage_root(&self, job: &Job) -> JobId {
        let mut root = job.id.clone();
        let mut parent = job.parent_job_id.clone();
        while let Some(id) = parent {
            match self.inner.queue.get(&id) {
                Some(ancestor) => {
                    parent = ancestor.parent_job_id.clone();
                    root = ancestor.id;
                }
                None => break,
            }
        }
        root
    }

    /// Attach user feedback to a completed job, regenerating if asked to.
    pub async fn submit_feedback(
        &self,
        job_id: &JobId,
        feedback: Feedback,
    ) -> EngineResult<FeedbackReceipt> {
        feedback
            .validate()
            .map_err(|e| EngineError::validation(e.to_string()))?;

        let job = self.status(job_id)?;
        if job.status != JobStatus::Completed {
            return Err(EngineError::invalid_state(format!(
                "Feedback requires a completed job; {} is {}",
                job_id, job.status
            )));
        }

        let regeneration_request = feedback.regeneration.clone();
        let rating = feedback.overall_rating;
        let job = self
            .inner
            .queue
            .annotate(job_id, |job| job.feedback.push(feedback))?;
        debug!(job_id = %job_id, rating, "Feedback recorded");

        let regeneration = match regeneration_request {
            Some(request) => Some(self.request_regeneration(job_id, request).await?),
            None => None,
        };
        let job = self.inner.queue.get(job_id).unwrap_or(job);

        Ok(FeedbackReceipt { job, regeneration })
    }

    /// Register a callback for every future snapshot of a job.
    pub fn subscribe<F>(&self, job_id: &JobId, callback: F) -> EngineResult<Subscription>
    where
        F: Fn(&Job) + Send + Sync + 'static,
    {
        self.status(job_id)?;
        Ok(self.inner.broadcaster.subscribe(job_id, callback))
    }

    /// Channel of future snapshots; ends after the terminal one.
    pub fn watch(&self, job_id: &JobId) -> EngineResult<mpsc::UnboundedReceiver<Job>> {
        self.status(job_id)?;
        Ok(self.inner.broadcaster.watch(job_id))
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.inner.queue.status()
    }

    pub fn breaker_state(&self, provider: ProviderId) -> EngineResult<CircuitBreakerState> {
        Ok(self.inner.registry.breaker_state(provider)?)
    }

    pub fn bulkhead_stats(&self) -> BulkheadStats {
        self.inner.bulkhead.stats()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Stop admitting work and wait for running jobs to finish.
    ///
    /// Jobs still holding a slot when `timeout` elapses are cancelled.
    pub async fn shutdown(&self, timeout: Duration) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.inner.bulkhead.close();
        info!(active = self.inner.bulkhead.active(), "Orchestrator shutting down");

        if tokio::time::timeout(timeout, self.wait_for_jobs()).await.is_err() {
            let remaining: Vec<JobId> = self.inner.slots.lock().keys().cloned().collect();
            warn!(
                remaining = remaining.len(),
                "Shutdown timeout reached, cancelling remaining jobs"
            );
            for job_id in remaining {
                if let Err(e) = self.cancel(&job_id) {
                    debug!(job_id = %job_id, error = %e, "Job finished during shutdown");
                    self.inner.release_slot(&job_id);
                }
            }
        }

        info!("Orchestrator stopped");
    }

    async fn wait_for_jobs(&self) {
        loop {
            if self.inner.bulkhead.active() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn ensure_accepting(&self) -> EngineResult<()> {
        if self.is_shutting_down() {
            return Err(EngineError::ShuttingDown);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("bulkhead", &self.inner.bulkhead)
            .field("jobs", &self.inner.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MockPromptSource, MockStoryboardSource};
    use tokio_test::assert_err;
    use vgen_models::OptimizedPrompt;
    use vgen_provider::SimulatedTransport;
    use vgen_resilience::CircuitBreakerConfig;

    fn prompt(provider: ProviderId) -> OptimizedPrompt {
        OptimizedPrompt {
            provider,
            text: "a red kite over green hills".to_string(),
            negative_prompt: None,
            image_url: None,
            token_count: 6,
            estimated_cost: 0.25,
        }
    }

    fn orchestrator(prompts: MockPromptSource, storyboards: MockStoryboardSource) -> Orchestrator {
        let registry = ProviderRegistry::new(
            Arc::new(SimulatedTransport::new()),
            CircuitBreakerConfig::default(),
        );
        Orchestrator::new(
            OrchestratorConfig::default(),
            registry,
            Arc::new(prompts),
            Arc::new(storyboards),
        )
    }

    #[tokio::test]
    async fn test_incomplete_storyboard_is_rejected_before_prompt_lookup() {
        let mut storyboards = MockStoryboardSource::new();
        storyboards
            .expect_storyboard_status()
            .returning(|_| Some(StoryboardStatus::Generating));
        let mut prompts = MockPromptSource::new();
        prompts.expect_optimized_prompt().never();

        let orch = orchestrator(prompts, storyboards);
        let err = orch
            .submit(GenerationRequest::new("u1", "p1", "sb1", ProviderId::Runway))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(orch.bulkhead_stats().active, 0);
    }

    #[tokio::test]
    async fn test_prompt_for_another_provider_is_rejected() {
        let mut storyboards = MockStoryboardSource::new();
        storyboards
            .expect_storyboard_status()
            .returning(|_| Some(StoryboardStatus::Completed));
        let mut prompts = MockPromptSource::new();
        prompts
            .expect_optimized_prompt()
            .times(1)
            .returning(|_, _| Some(prompt(ProviderId::Pika)));

        let orch = orchestrator(prompts, storyboards);
        let result = orch
            .submit(GenerationRequest::new("u1", "p1", "sb1", ProviderId::Runway))
            .await;
        assert_err!(result);
        assert_eq!(orch.queue_status().total_jobs, 0);
    }

    #[tokio::test]
    async fn test_empty_ids_and_bad_priority_are_rejected() {
        let mut storyboards = MockStoryboardSource::new();
        storyboards.expect_storyboard_status().never();
        let mut prompts = MockPromptSource::new();
        prompts.expect_optimized_prompt().never();
        let orch = orchestrator(prompts, storyboards);

        let blank = GenerationRequest::new("u1", " ", "sb1", ProviderId::Luma);
        assert!(matches!(orch.submit(blank).await, Err(EngineError::Validation(_))));

        let loud = GenerationRequest::new("u1", "p1", "sb1", ProviderId::Luma).with_priority(11);
        assert!(matches!(orch.submit(loud).await, Err(EngineError::Validation(_))));

        let unselected = GenerationRequest {
            user_id: "u1".into(),
            prompt_id: "p1".into(),
            storyboard_id: "sb1".into(),
            ..Default::default()
        };
        assert!(matches!(orch.submit(unselected).await, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_provider_request_carries_job_metadata() {
        let job = Job::new("u9", "p1", "sb1", prompt(ProviderId::Kling), GenerationSettings::default(), 5);
        let request = provider_request(&job);
        assert_eq!(request.prompt, job.prompt.text);
        assert_eq!(request.metadata.get("job_id"), Some(&job.id.to_string()));
        assert_eq!(request.metadata.get("user_id").map(String::as_str), Some("u9"));
    }
}
