//! Generation settings: quality, container format, aspect ratio, fps and duration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Output quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Draft,
    #[default]
    Standard,
    High,
    Ultra,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Draft => "draft",
            Quality::Standard => "standard",
            Quality::High => "high",
            Quality::Ultra => "ultra",
        }
    }

    /// Price multiplier applied on top of the provider's per-second cost.
    pub fn cost_multiplier(&self) -> f64 {
        match self {
            Quality::Draft => 0.5,
            Quality::Standard => 1.0,
            Quality::High => 1.5,
            Quality::Ultra => 2.0,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoFormat {
    #[default]
    Mp4,
    Webm,
    Mov,
}

impl VideoFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoFormat::Mp4 => "mp4",
            VideoFormat::Webm => "webm",
            VideoFormat::Mov => "mov",
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target aspect ratio for generated video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum AspectRatio {
    /// 16:9 landscape
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    /// 9:16 portrait
    #[serde(rename = "9:16")]
    Portrait,
    /// 1:1 square
    #[serde(rename = "1:1")]
    Square,
    /// 4:3 classic
    #[serde(rename = "4:3")]
    Classic,
    /// 21:9 cinematic
    #[serde(rename = "21:9")]
    Cinematic,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Square => "1:1",
            AspectRatio::Classic => "4:3",
            AspectRatio::Cinematic => "21:9",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = SettingsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "16:9" => Ok(AspectRatio::Landscape),
            "9:16" => Ok(AspectRatio::Portrait),
            "1:1" => Ok(AspectRatio::Square),
            "4:3" => Ok(AspectRatio::Classic),
            "21:9" => Ok(AspectRatio::Cinematic),
            other => Err(SettingsParseError(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown aspect ratio: {0}")]
pub struct SettingsParseError(String);

/// Settings a video is generated with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationSettings {
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub format: VideoFormat,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Clip length in seconds
    #[serde(default = "default_duration")]
    pub duration_secs: u32,
    /// Provider-specific knobs passed through untouched (seed, motion strength, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_overrides: BTreeMap<String, serde_json::Value>,
}

fn default_fps() -> u32 {
    24
}

fn default_duration() -> u32 {
    5
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            format: VideoFormat::default(),
            aspect_ratio: AspectRatio::default(),
            fps: default_fps(),
            duration_secs: default_duration(),
            provider_overrides: BTreeMap::new(),
        }
    }
}

impl GenerationSettings {
    /// Return a copy with every `Some` field of `overrides` applied.
    pub fn merged(&self, overrides: &SettingsOverrides) -> Self {
        let mut merged = self.clone();
        if let Some(quality) = overrides.quality {
            merged.quality = quality;
        }
        if let Some(format) = overrides.format {
            merged.format = format;
        }
        if let Some(aspect) = overrides.aspect_ratio {
            merged.aspect_ratio = aspect;
        }
        if let Some(fps) = overrides.fps {
            merged.fps = fps;
        }
        if let Some(duration) = overrides.duration_secs {
            merged.duration_secs = duration;
        }
        for (key, value) in &overrides.provider_overrides {
            merged.provider_overrides.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// Partial settings supplied by a caller on submit or regeneration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SettingsOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<VideoFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_overrides: BTreeMap<String, serde_json::Value>,
}
