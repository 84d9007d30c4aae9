//! Generation job definitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::feedback::{Feedback, RegenerationReason};
use crate::job_error::JobError;
use crate::progress::Progress;
use crate::prompt::OptimizedPrompt;
use crate::provider::ProviderId;
use crate::settings::{GenerationSettings, SettingsOverrides, VideoFormat};

/// Default priority for jobs that do not ask for one.
pub const DEFAULT_PRIORITY: u8 = 5;
/// Priorities run from 1 (lowest) to 10 (highest).
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;
/// Regeneration attempts allowed per job chain unless configured otherwise.
pub const DEFAULT_MAX_REGENERATION_ATTEMPTS: u32 = 3;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Admitted and waiting for the pipeline
    #[default]
    Queued,
    /// Pipeline is running
    Processing,
    Completed,
    Failed,
    Cancelled,
    /// Pipeline exceeded its time budget
    Timeout,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Timeout => "timeout",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Timeout
        )
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Queue placement of a pending job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueueInfo {
    /// 1 (lowest) to 10 (highest)
    pub priority: u8,
    pub queued_at: DateTime<Utc>,
    /// 1-based position among pending jobs; 0 once dequeued
    pub position: usize,
    pub estimated_wait_secs: u64,
}

/// Concurrency budget observed when the job was admitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceUsage {
    pub active_slots: usize,
    pub max_slots: usize,
    pub waiting_admissions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PerformanceMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_wait_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_ms: Option<u64>,
    #[serde(default)]
    pub provider_polls: u32,
    /// Wall-clock time per stage, keyed by stage name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stage_durations_ms: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingInfo {
    /// Times the pipeline picked this job up
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_job_id: Option<String>,
    #[serde(default)]
    pub resource_usage: ResourceUsage,
    #[serde(default)]
    pub performance: PerformanceMetrics,
}

/// Output of a completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobResult {
    pub video_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub duration_secs: u32,
    pub format: VideoFormat,
    pub model: String,
    pub cost: f64,
    pub provider_job_id: String,
}

/// Record of a regeneration spawned from a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RegenerationAttempt {
    pub parent_job_id: JobId,
    pub spawned_job_id: JobId,
    pub reason: RegenerationReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default)]
    pub settings_overrides: SettingsOverrides,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_override: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// A video generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,
    pub user_id: String,
    pub prompt_id: String,
    pub storyboard_id: String,
    pub provider: ProviderId,
    /// Prompt resolved for `provider` at submit time
    pub prompt: OptimizedPrompt,
    pub settings: GenerationSettings,
    pub estimated_cost: f64,

    #[serde(default)]
    pub status: JobStatus,
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,

    pub queue_info: QueueInfo,
    #[serde(default)]
    pub processing_info: ProcessingInfo,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<JobId>,
    #[serde(default)]
    pub regeneration_history: Vec<RegenerationAttempt>,
    #[serde(default = "default_max_regeneration_attempts")]
    pub max_regeneration_attempts: u32,
    #[serde(default)]
    pub feedback: Vec<Feedback>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Sequence number for event ordering (monotonically increasing)
    #[serde(default)]
    pub event_seq: u64,
}

fn default_max_regeneration_attempts() -> u32 {
    DEFAULT_MAX_REGENERATION_ATTEMPTS
}

impl Job {
    /// Create a queued job.
    pub fn new(
        user_id: impl Into<String>,
        prompt_id: impl Into<String>,
        storyboard_id: impl Into<String>,
        prompt: OptimizedPrompt,
        settings: GenerationSettings,
        priority: u8,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            user_id: user_id.into(),
            prompt_id: prompt_id.into(),
            storyboard_id: storyboard_id.into(),
            provider: prompt.provider,
            prompt,
            settings,
            estimated_cost: 0.0,
            status: JobStatus::Queued,
            progress: Progress::new(),
            result: None,
            error: None,
            queue_info: QueueInfo {
                priority: priority.clamp(MIN_PRIORITY, MAX_PRIORITY),
                queued_at: now,
                position: 0,
                estimated_wait_secs: 0,
            },
            processing_info: ProcessingInfo::default(),
            parent_job_id: None,
            regeneration_history: Vec::new(),
            max_regeneration_attempts: DEFAULT_MAX_REGENERATION_ATTEMPTS,
            feedback: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            event_seq: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn priority(&self) -> u8 {
        self.queue_info.priority
    }

    pub fn regenerations_remaining(&self) -> u32 {
        self.max_regeneration_attempts
            .saturating_sub(self.regeneration_history.len() as u32)
    }

    /// Bump the update timestamp and event sequence after a mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.event_seq += 1;
    }

    /// Move to a terminal status, stamping completion time.
    pub fn finish(&mut self, status: JobStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.queue_info.position = 0;
        self.queue_info.estimated_wait_secs = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_prompt() -> OptimizedPrompt {
        OptimizedPrompt {
            provider: ProviderId::Runway,
            text: "A lighthouse at dusk, slow dolly in".to_string(),
            negative_prompt: None,
            image_url: None,
            token_count: 9,
            estimated_cost: 0.25,
        }
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = Job::new("user", "prompt", "board", sample_prompt(), GenerationSettings::default(), 5);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.provider, ProviderId::Runway);
        assert_eq!(job.max_regeneration_attempts, 3);
        assert_eq!(job.regenerations_remaining(), 3);
        assert_eq!(job.progress.percentage, 0);
    }

    #[test]
    fn test_priority_is_clamped() {
        let high = Job::new("u", "p", "b", sample_prompt(), GenerationSettings::default(), 42);
        let low = Job::new("u", "p", "b", sample_prompt(), GenerationSettings::default(), 0);
        assert_eq!(high.priority(), MAX_PRIORITY);
        assert_eq!(low.priority(), MIN_PRIORITY);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Timeout.is_terminal());

        assert!(JobStatus::Queued.is_cancellable());
        assert!(!JobStatus::Timeout.is_cancellable());
    }

    #[test]
    fn test_touch_bumps_event_seq() {
        let mut job = Job::new("u", "p", "b", sample_prompt(), GenerationSettings::default(), 5);
        job.touch();
        job.touch();
        assert_eq!(job.event_seq, 2);
    }
}
