//! Video generation orchestrator.
//!
//! This crate provides:
//! - Admission of generation requests under a concurrency budget
//! - The staged background pipeline driving a job to a terminal state
//! - Cancellation, regeneration and feedback handling
//! - Collaborator interfaces for prompts and storyboards
//! - Job logging, metrics and configuration

pub mod collaborators;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
mod pipeline;

pub use collaborators::{InMemoryCatalog, PromptSource, StoryboardSource};
pub use config::{OrchestratorConfig, ProviderMode};
pub use error::{EngineError, EngineResult};
pub use logging::{JobLogger, RunKind};
pub use orchestrator::{FeedbackReceipt, GenerationRequest, Orchestrator};
