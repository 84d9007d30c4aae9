//! Job lifecycle metrics.
//!
//! Provides standardized metrics for monitoring the orchestrator:
//! - Submissions and terminal outcomes by provider
//! - Per-stage and end-to-end durations
//! - Admission rejections by reason

use metrics::{counter, gauge, histogram};
use vgen_models::{JobStatus, ProviderId, Stage};

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    /// Jobs admitted, by provider and kind (new or regeneration).
    pub const JOBS_SUBMITTED_TOTAL: &str = "vgen_jobs_submitted_total";

    /// Jobs reaching a terminal state, by provider and status.
    pub const JOBS_FINISHED_TOTAL: &str = "vgen_jobs_finished_total";

    /// Jobs currently holding a processing slot.
    pub const JOBS_ACTIVE: &str = "vgen_jobs_active";

    /// Time spent in each pipeline stage.
    pub const STAGE_DURATION_SECONDS: &str = "vgen_stage_duration_seconds";

    /// Pipeline wall-clock time, dequeue to terminal state.
    pub const JOB_DURATION_SECONDS: &str = "vgen_job_duration_seconds";

    /// Submissions refused before admission, by reason.
    pub const ADMISSION_REJECTIONS_TOTAL: &str = "vgen_admission_rejections_total";
}

// =============================================================================
// Recording Functions
// =============================================================================

pub fn record_job_submitted(provider: ProviderId, regeneration: bool) {
    let kind = if regeneration { "regeneration" } else { "new" };
    counter!(
        names::JOBS_SUBMITTED_TOTAL,
        "provider" => provider.as_str(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_job_finished(provider: ProviderId, status: JobStatus, duration_ms: Option<u64>) {
    counter!(
        names::JOBS_FINISHED_TOTAL,
        "provider" => provider.as_str(),
        "status" => status.as_str()
    )
    .increment(1);

    if let Some(ms) = duration_ms {
        histogram!(
            names::JOB_DURATION_SECONDS,
            "provider" => provider.as_str(),
            "status" => status.as_str()
        )
        .record(ms as f64 / 1000.0);
    }
}

pub fn set_active_jobs(active: usize) {
    gauge!(names::JOBS_ACTIVE).set(active as f64);
}

pub fn record_stage_duration(provider: ProviderId, stage: Stage, duration_ms: u64) {
    histogram!(
        names::STAGE_DURATION_SECONDS,
        "provider" => provider.as_str(),
        "stage" => stage.as_str()
    )
    .record(duration_ms as f64 / 1000.0);
}

pub fn record_admission_rejection(provider: ProviderId, reason: &'static str) {
    counter!(
        names::ADMISSION_REJECTIONS_TOTAL,
        "provider" => provider.as_str(),
        "reason" => reason
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::JOBS_SUBMITTED_TOTAL.starts_with("vgen_"));
        assert!(names::STAGE_DURATION_SECONDS.ends_with("_seconds"));
        assert!(names::ADMISSION_REJECTIONS_TOTAL.contains("rejections"));
    }
}
