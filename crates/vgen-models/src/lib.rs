//! Shared data models for the video generation engine.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their status and regeneration history
//! - Stage-weighted progress
//! - Generation settings and provider capabilities
//! - Provider request/response contract
//! - Feedback and terminal job errors

pub mod feedback;
pub mod job;
pub mod job_error;
pub mod progress;
pub mod prompt;
pub mod provider;
pub mod settings;

// Re-export common types
pub use feedback::{CategoryRatings, Feedback, RegenerationReason, RegenerationRequest};
pub use job::{
    Job, JobId, JobResult, JobStatus, PerformanceMetrics, ProcessingInfo, QueueInfo,
    RegenerationAttempt, ResourceUsage, DEFAULT_MAX_REGENERATION_ATTEMPTS, DEFAULT_PRIORITY,
    MAX_PRIORITY, MIN_PRIORITY,
};
pub use job_error::{ErrorCategory, JobError};
pub use progress::{Progress, Stage, StageProgress, StageStatus, StageTransitionError};
pub use prompt::{OptimizedPrompt, StoryboardStatus};
pub use provider::{
    ProviderCapabilities, ProviderId, ProviderRequest, ProviderResponse, ProviderStatus,
    ResponseMetadata,
};
pub use settings::{AspectRatio, GenerationSettings, Quality, SettingsOverrides, VideoFormat};
