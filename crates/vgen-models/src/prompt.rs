//! Collaborator-provided prompt and storyboard data.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::provider::ProviderId;

/// Provider-tuned prompt produced by the prompt-engineering step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OptimizedPrompt {
    pub provider: ProviderId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Reference frame for image-to-video generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub token_count: u32,
    pub estimated_cost: f64,
}

/// Lifecycle of the shot breakdown a prompt was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StoryboardStatus {
    Draft,
    Generating,
    Completed,
    Failed,
}
