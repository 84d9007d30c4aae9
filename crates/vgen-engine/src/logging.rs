//! Per-run log context.
//!
//! A [`JobLogger`] owns the span one pipeline run executes in. Its helpers
//! emit the handful of lifecycle events a run produces; job, provider and
//! run kind come from the span, so events only carry what is new.

use tracing::{error, info, warn, Span};
use vgen_models::{Job, JobId, ProviderId, Stage};

use crate::error::EngineError;

/// Whether a run is a first generation or spawned from an earlier job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Generation,
    Regeneration,
}

impl RunKind {
    pub fn for_job(job: &Job) -> Self {
        if job.parent_job_id.is_some() {
            RunKind::Regeneration
        } else {
            RunKind::Generation
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Generation => "generation",
            RunKind::Regeneration => "regeneration",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    provider: ProviderId,
    kind: RunKind,
    span: Span,
}

impl JobLogger {
    pub fn for_job(job: &Job) -> Self {
        let kind = RunKind::for_job(job);
        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            provider = %job.provider,
            kind = kind.as_str(),
            parent_job_id = tracing::field::Empty,
        );
        if let Some(parent) = &job.parent_job_id {
            span.record("parent_job_id", tracing::field::display(parent));
        }
        Self {
            job_id: job.id.clone(),
            provider: job.provider,
            kind,
            span,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn kind(&self) -> RunKind {
        self.kind
    }

    /// Span to instrument the run with.
    pub fn span(&self) -> Span {
        self.span.clone()
    }

    pub fn started(&self, attempt: u32, queue_wait_ms: u64) {
        self.span
            .in_scope(|| info!(attempt, queue_wait_ms, "Run started"));
    }

    pub fn stage(&self, stage: Stage, percentage: u8) {
        self.span
            .in_scope(|| info!(stage = %stage, percentage, "Stage entered"));
    }

    pub fn submitted(&self, generation_id: &str) {
        self.span
            .in_scope(|| info!(generation_id, "Submitted to provider"));
    }

    pub fn cancelled(&self) {
        self.span.in_scope(|| warn!("Cancelled while processing"));
    }

    /// Failures are logged with the code and retry flag the job will carry.
    pub fn failed(&self, err: &EngineError) {
        let job_error = err.to_job_error();
        self.span.in_scope(|| {
            error!(
                code = %job_error.code,
                retryable = job_error.is_retryable,
                "Run failed: {}", err
            )
        });
    }

    pub fn completed(&self, video_url: &str, elapsed_ms: u64) {
        self.span
            .in_scope(|| info!(video_url, elapsed_ms, "Run completed"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgen_models::{GenerationSettings, OptimizedPrompt};

    fn job() -> Job {
        let prompt = OptimizedPrompt {
            provider: ProviderId::Kling,
            text: "a fox crossing a snowy field".to_string(),
            negative_prompt: None,
            image_url: None,
            token_count: 6,
            estimated_cost: 0.5,
        };
        Job::new("user", "prompt", "board", prompt, GenerationSettings::default(), 5)
    }

    #[test]
    fn test_run_kind_follows_lineage() {
        let original = job();
        let logger = JobLogger::for_job(&original);
        assert_eq!(logger.job_id(), &original.id);
        assert_eq!(logger.provider(), ProviderId::Kling);
        assert_eq!(logger.kind(), RunKind::Generation);

        let mut spawned = job();
        spawned.parent_job_id = Some(original.id.clone());
        assert_eq!(JobLogger::for_job(&spawned).kind(), RunKind::Regeneration);
        assert_eq!(RunKind::Regeneration.as_str(), "regeneration");
    }
}
