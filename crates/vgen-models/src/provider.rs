//! Provider-facing contract types shared by clients and the orchestrator.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::settings::{AspectRatio, GenerationSettings, Quality, VideoFormat};

/// Upstream AI video providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Runway,
    Pika,
    StableVideo,
    Luma,
    Kling,
    Haiper,
}

impl ProviderId {
    pub const ALL: &'static [ProviderId] = &[
        ProviderId::Runway,
        ProviderId::Pika,
        ProviderId::StableVideo,
        ProviderId::Luma,
        ProviderId::Kling,
        ProviderId::Haiper,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Runway => "runway",
            ProviderId::Pika => "pika",
            ProviderId::StableVideo => "stable_video",
            ProviderId::Luma => "luma",
            ProviderId::Kling => "kling",
            ProviderId::Haiper => "haiper",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ProviderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "runway" => Ok(ProviderId::Runway),
            "pika" => Ok(ProviderId::Pika),
            "stable_video" | "stable-video" => Ok(ProviderId::StableVideo),
            "luma" => Ok(ProviderId::Luma),
            "kling" => Ok(ProviderId::Kling),
            "haiper" => Ok(ProviderId::Haiper),
            _ => Err(ProviderParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown provider: {0}")]
pub struct ProviderParseError(String);

/// What a provider can generate, and at what price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderCapabilities {
    pub max_duration_secs: u32,
    pub supported_formats: Vec<VideoFormat>,
    pub supported_qualities: Vec<Quality>,
    pub supported_aspect_ratios: Vec<AspectRatio>,
    pub supports_image_to_video: bool,
    pub supports_negative_prompts: bool,
    pub max_prompt_length: usize,
    /// USD per generated second at standard quality
    pub cost_per_second: f64,
}

impl ProviderCapabilities {
    /// Estimated price of a generation with these settings.
    ///
    /// `cost_per_second * duration * quality multiplier`, with image-to-video
    /// (x1.2) and high frame rate above 30fps (x1.25) surcharges.
    pub fn estimate_cost(&self, settings: &GenerationSettings, image_to_video: bool) -> f64 {
        let mut cost = self.cost_per_second
            * settings.duration_secs as f64
            * settings.quality.cost_multiplier();
        if image_to_video {
            cost *= 1.2;
        }
        if settings.fps > 30 {
            cost *= 1.25;
        }
        (cost * 10_000.0).round() / 10_000.0
    }
}

/// Normalized generation request handed to a provider client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub settings: GenerationSettings,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Common 4-state status vocabulary every provider status maps into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    #[default]
    Queued,
    Processing,
    Completed,
    Failed,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Queued => "queued",
            ProviderStatus::Processing => "processing",
            ProviderStatus::Completed => "completed",
            ProviderStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProviderStatus::Completed | ProviderStatus::Failed)
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderResponse {
    /// Provider-side generation id
    pub id: String,
    pub status: ProviderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Upstream progress (0-100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResponseMetadata {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}
