//! Runway Gen-3.

use std::time::Duration;

use serde_json::{json, Value};
use vgen_models::{
    AspectRatio, ProviderCapabilities, ProviderId, ProviderRequest, ProviderStatus, Quality,
    VideoFormat,
};
use vgen_resilience::RetryPolicy;

use super::{merge_overrides, put_opt, tune_prompt};
use crate::provider::VideoProvider;

const STYLE_SUFFIX: &str = ", cinematic lighting, high detail";

const STATUS_TABLE: &[(&str, ProviderStatus)] = &[
    ("PENDING", ProviderStatus::Queued),
    ("THROTTLED", ProviderStatus::Queued),
    ("RUNNING", ProviderStatus::Processing),
    ("SUCCEEDED", ProviderStatus::Completed),
    ("FAILED", ProviderStatus::Failed),
    ("CANCELLED", ProviderStatus::Failed),
];

pub struct RunwayProvider {
    capabilities: ProviderCapabilities,
    retry: RetryPolicy,
}

impl RunwayProvider {
    pub fn new() -> Self {
        Self {
            capabilities: ProviderCapabilities {
                max_duration_secs: 10,
                supported_formats: vec![VideoFormat::Mp4],
                supported_qualities: vec![Quality::Standard, Quality::High, Quality::Ultra],
                supported_aspect_ratios: vec![
                    AspectRatio::Landscape,
                    AspectRatio::Portrait,
                    AspectRatio::Square,
                ],
                supports_image_to_video: true,
                supports_negative_prompts: false,
                max_prompt_length: 512,
                cost_per_second: 0.05,
            },
            retry: RetryPolicy::default()
                .with_max_attempts(3)
                .with_initial_delay(Duration::from_secs(2))
                .with_max_delay(Duration::from_secs(30))
                .with_backoff_multiplier(2.0)
                .with_retryable_status_codes([429, 500, 502, 503, 504]),
        }
    }
}

impl Default for RunwayProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Runway takes pixel ratios rather than aspect names.
fn ratio(aspect: AspectRatio) -> &'static str {
    match aspect {
        AspectRatio::Portrait => "768:1280",
        AspectRatio::Square => "960:960",
        _ => "1280:768",
    }
}

impl VideoProvider for RunwayProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Runway
    }

    fn model(&self) -> &'static str {
        "gen3a_turbo"
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn status_table(&self) -> &'static [(&'static str, ProviderStatus)] {
        STATUS_TABLE
    }

    fn optimize_prompt(&self, prompt: &str) -> String {
        tune_prompt(prompt, STYLE_SUFFIX, self.capabilities.max_prompt_length)
    }

    fn shape_payload(&self, request: &ProviderRequest) -> Value {
        let settings = &request.settings;
        let mut payload = json!({
            "model": self.model(),
            "promptText": request.prompt,
            "duration": settings.duration_secs,
            "ratio": ratio(settings.aspect_ratio),
            "watermark": false,
        });
        if let Value::Object(map) = &mut payload {
            put_opt(map, "promptImage", request.image_url.as_ref());
        }
        merge_overrides(&mut payload, settings);
        payload
    }
}
