//! Background pipeline run for one admitted job.
//!
//! Stages run strictly in order. Every step goes through the queue (which
//! freezes terminal jobs) and is then published, so a concurrent cancel is
//! observed as a failed update and the run stops quietly.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, Instrument};
use vgen_models::{
    Job, JobId, JobResult, JobStatus, ProviderId, ProviderRequest, ProviderResponse,
    ProviderStatus, Stage,
};
use vgen_provider::{ProviderClient, ProviderError};
use vgen_queue::QueueError;

use crate::error::{EngineError, EngineResult};
use crate::logging::JobLogger;
use crate::metrics::{record_job_finished, record_stage_duration};
use crate::orchestrator::{provider_request, Inner};

/// Take the next pending job and drive it to a terminal state.
pub(crate) async fn run_next(inner: Arc<Inner>) {
    let Some(job) = inner.queue.dequeue() else {
        return;
    };
    inner.broadcaster.publish(&job);

    let logger = JobLogger::for_job(&job);
    logger.started(
        job.processing_info.attempts,
        job.processing_info.performance.queue_wait_ms.unwrap_or(0),
    );

    let job_id = job.id.clone();
    let provider = job.provider;
    let started = Instant::now();
    let mut pipeline = Pipeline {
        inner: &inner,
        logger: &logger,
        job_id: job_id.clone(),
        provider,
        started,
        stage: Stage::Queued,
        stage_started: started,
    };

    let outcome = tokio::time::timeout(inner.config.job_timeout, pipeline.run())
        .instrument(logger.span())
        .await
        .unwrap_or_else(|_| {
            Err(EngineError::Timeout(format!(
                "pipeline exceeded {}s",
                inner.config.job_timeout.as_secs()
            )))
        });
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let stopped = matches!(
        outcome,
        Err(EngineError::Cancelled) | Err(EngineError::Timeout(_))
    );

    match outcome {
        Ok(job) => {
            record_job_finished(provider, JobStatus::Completed, Some(elapsed_ms));
            logger.completed(
                job.result.as_ref().map_or("", |r| r.video_url.as_str()),
                elapsed_ms,
            );
        }
        Err(EngineError::Cancelled) => {
            logger.cancelled();
        }
        Err(e) => {
            logger.failed(&e);
            fail(&inner, &job_id, &e, elapsed_ms);
        }
    }
    inner.release_slot(&job_id);

    // The upstream cancel runs under the provider's retry policy and must not
    // hold the job or its slot past the point it stopped.
    if stopped {
        tokio::spawn(async move { cancel_upstream(&inner, &job_id).await });
    }
}

/// Record a terminal failure. A job cancelled meanwhile stays cancelled.
fn fail(inner: &Inner, job_id: &JobId, error: &EngineError, elapsed_ms: u64) {
    let status = error.terminal_status();
    let job_error = error.to_job_error();
    let operation = job_error.message.clone();

    match inner.queue.update(job_id, |job| {
        job.error = Some(job_error);
        job.progress.current_operation = operation;
        job.processing_info.performance.processing_ms = Some(elapsed_ms);
        job.finish(status);
    }) {
        Ok(job) => {
            inner.broadcaster.publish(&job);
            record_job_finished(job.provider, status, Some(elapsed_ms));
        }
        Err(e) => debug!(job_id = %job_id, error = %e, "Job already finished"),
    }
}

/// Best-effort cancel of the provider-side generation.
async fn cancel_upstream(inner: &Inner, job_id: &JobId) {
    let Some(job) = inner.queue.get(job_id) else {
        return;
    };
    let Some(generation_id) = job.processing_info.provider_job_id else {
        return;
    };
    let Ok(client) = inner.registry.get(job.provider) else {
        return;
    };
    match client.cancel(&generation_id).await {
        Ok(()) => debug!(job_id = %job_id, generation_id = %generation_id, "Upstream generation cancelled"),
        Err(e) => debug!(job_id = %job_id, error = %e, "Upstream cancel failed"),
    }
}

/// Queue errors mid-run mean the job was finished by someone else.
fn interrupted(error: QueueError) -> EngineError {
    match error {
        QueueError::AlreadyTerminal {
            status: JobStatus::Cancelled,
            ..
        } => EngineError::Cancelled,
        other => EngineError::from(other),
    }
}

struct Pipeline<'a> {
    inner: &'a Inner,
    logger: &'a JobLogger,
    job_id: JobId,
    provider: ProviderId,
    started: Instant,
    stage: Stage,
    stage_started: Instant,
}

impl Pipeline<'_> {
    async fn run(&mut self) -> EngineResult<Job> {
        self.advance(Stage::Initializing, "Resolving provider")?;
        let client = self.inner.registry.get(self.provider)?;

        let job = self.advance(Stage::Preprocessing, "Preparing provider request")?;
        let request = provider_request(&job);
        client.validate(&request)?;

        self.advance(Stage::Generating, "Submitting to provider")?;
        let response = self.generate(&client, &request).await?;

        self.advance(Stage::Postprocessing, "Verifying output")?;
        let video_url = response.video_url.clone().ok_or_else(|| {
            ProviderError::invalid_response(self.provider, "completed generation has no video URL")
        })?;

        self.advance(Stage::Uploading, "Publishing video")?;
        let job = self.advance(Stage::Finalizing, "Finalizing")?;

        let result = JobResult {
            video_url,
            thumbnail_url: response.thumbnail_url.clone(),
            duration_secs: job.settings.duration_secs,
            format: job.settings.format,
            model: response.metadata.model.clone(),
            cost: response.metadata.cost.unwrap_or(job.estimated_cost),
            provider_job_id: response.id.clone(),
        };
        self.complete(result)
    }

    /// Enter the next stage, closing out the current one.
    fn advance(&mut self, stage: Stage, operation: &str) -> EngineResult<Job> {
        let previous = self.stage;
        let elapsed_ms = self.stage_started.elapsed().as_millis() as u64;

        let mut transition = Ok(());
        let job = self
            .inner
            .queue
            .update(&self.job_id, |job| {
                transition = job.progress.enter_stage(stage, operation);
                if transition.is_ok() {
                    if previous != Stage::Queued {
                        job.processing_info
                            .performance
                            .stage_durations_ms
                            .insert(previous.as_str().to_string(), elapsed_ms);
                    }
                    if stage == Stage::Generating && job.started_at.is_none() {
                        job.started_at = Some(Utc::now());
                    }
                }
            })
            .map_err(interrupted)?;
        transition.map_err(|e| EngineError::internal(e.to_string()))?;

        if previous != Stage::Queued {
            record_stage_duration(self.provider, previous, elapsed_ms);
        }
        self.stage = stage;
        self.stage_started = Instant::now();

        self.inner.broadcaster.publish(&job);
        self.logger.stage(stage, job.progress.percentage);
        Ok(job)
    }

    /// Apply an in-stage change and publish it.
    fn update<F>(&self, f: F) -> EngineResult<Job>
    where
        F: FnOnce(&mut Job),
    {
        let job = self.inner.queue.update(&self.job_id, f).map_err(interrupted)?;
        self.inner.broadcaster.publish(&job);
        Ok(job)
    }

    fn ensure_live(&self) -> EngineResult<()> {
        match self.inner.queue.get(&self.job_id) {
            Some(job) if job.status == JobStatus::Processing => Ok(()),
            Some(job) if job.status == JobStatus::Cancelled => Err(EngineError::Cancelled),
            Some(job) => Err(EngineError::invalid_state(format!(
                "Job {} is {} mid-pipeline",
                self.job_id, job.status
            ))),
            None => Err(EngineError::JobNotFound(self.job_id.clone())),
        }
    }

    /// Submit the generation and poll it to a terminal provider status.
    async fn generate(
        &mut self,
        client: &ProviderClient,
        request: &ProviderRequest,
    ) -> EngineResult<ProviderResponse> {
        let submitted = client.generate(request).await?;
        let cost = submitted.metadata.cost;
        let generation_id = submitted.id.clone();
        self.update(|job| {
            job.processing_info.provider_job_id = Some(generation_id.clone());
            job.progress
                .update_stage(0.0, Some(format!("Queued at {}", client.id())));
        })?;
        self.logger.submitted(&generation_id);

        let max_polls = self.inner.config.max_polls;
        let mut response = submitted;
        let mut polls = 0u32;
        loop {
            match response.status {
                ProviderStatus::Completed => {
                    response.metadata.cost = response.metadata.cost.or(cost);
                    return Ok(response);
                }
                ProviderStatus::Failed => {
                    return Err(ProviderError::GenerationFailed {
                        provider: self.provider,
                        message: response
                            .error
                            .unwrap_or_else(|| "provider reported failure".to_string()),
                    }
                    .into());
                }
                ProviderStatus::Queued | ProviderStatus::Processing => {}
            }

            if polls >= max_polls {
                return Err(EngineError::Timeout(format!(
                    "no result from {} after {} polls",
                    self.provider, polls
                )));
            }

            tokio::time::sleep(self.inner.config.poll_interval).await;
            self.ensure_live()?;

            response = client.get_progress(&generation_id).await?;
            polls += 1;

            let operation = match response.status {
                ProviderStatus::Queued => "Waiting for provider capacity".to_string(),
                ProviderStatus::Processing => match response.estimated_time_secs {
                    Some(eta) => format!("Generating video (~{}s left)", eta),
                    None => "Generating video".to_string(),
                },
                ProviderStatus::Completed => "Generation complete".to_string(),
                ProviderStatus::Failed => "Generation failed".to_string(),
            };
            let fraction = response.progress.map(|p| f64::from(p) / 100.0);
            self.update(|job| {
                job.processing_info.performance.provider_polls += 1;
                match fraction {
                    Some(fraction) => job.progress.update_stage(fraction, Some(operation)),
                    None => job.progress.current_operation = operation,
                }
            })?;
        }
    }

    /// Mark the job completed with its result.
    fn complete(&mut self, result: JobResult) -> EngineResult<Job> {
        let elapsed_ms = self.stage_started.elapsed().as_millis() as u64;
        let processing_ms = self.started.elapsed().as_millis() as u64;

        let mut transition = Ok(());
        let job = self
            .inner
            .queue
            .update(&self.job_id, |job| {
                transition = job.progress.complete();
                if transition.is_ok() {
                    job.processing_info
                        .performance
                        .stage_durations_ms
                        .insert(Stage::Finalizing.as_str().to_string(), elapsed_ms);
                    job.processing_info.performance.processing_ms = Some(processing_ms);
                    job.result = Some(result);
                    job.finish(JobStatus::Completed);
                }
            })
            .map_err(interrupted)?;
        transition.map_err(|e| EngineError::internal(e.to_string()))?;

        record_stage_duration(self.provider, Stage::Finalizing, elapsed_ms);
        self.stage = Stage::Done;
        self.inner.broadcaster.publish(&job);
        Ok(job)
    }
}
