//! Haiper.

use std::time::Duration;

use serde_json::{json, Value};
use vgen_models::{
    AspectRatio, ProviderCapabilities, ProviderId, ProviderRequest, ProviderStatus, Quality,
    VideoFormat,
};
use vgen_resilience::RetryPolicy;

use super::{merge_overrides, put_opt, tune_prompt};
use crate::provider::VideoProvider;

const STYLE_SUFFIX: &str = ", vivid colors";

const STATUS_TABLE: &[(&str, ProviderStatus)] = &[
    ("pending", ProviderStatus::Queued),
    ("queued", ProviderStatus::Queued),
    ("running", ProviderStatus::Processing),
    ("succeed", ProviderStatus::Completed),
    ("failed", ProviderStatus::Failed),
    ("canceled", ProviderStatus::Failed),
];

pub struct HaiperProvider {
    capabilities: ProviderCapabilities,
    retry: RetryPolicy,
}

impl HaiperProvider {
    pub fn new() -> Self {
        Self {
            capabilities: ProviderCapabilities {
                max_duration_secs: 8,
                supported_formats: vec![VideoFormat::Mp4, VideoFormat::Webm],
                supported_qualities: vec![Quality::Draft, Quality::Standard, Quality::High],
                supported_aspect_ratios: vec![
                    AspectRatio::Landscape,
                    AspectRatio::Portrait,
                    AspectRatio::Square,
                    AspectRatio::Classic,
                ],
                supports_image_to_video: true,
                supports_negative_prompts: true,
                max_prompt_length: 2000,
                cost_per_second: 0.03,
            },
            retry: RetryPolicy::default()
                .with_max_attempts(4)
                .with_initial_delay(Duration::from_millis(800))
                .with_max_delay(Duration::from_secs(10))
                .with_backoff_multiplier(2.0)
                .with_retryable_status_codes([429, 500, 502, 503, 504]),
        }
    }
}

impl Default for HaiperProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoProvider for HaiperProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Haiper
    }

    fn model(&self) -> &'static str {
        "haiper-video-2"
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
        let resolution = match settings.quality {
            Quality::Draft => 540,
            Quality::Standard => 720,
            _ => 1080,
        };
        let mut payload = json!({
            "prompt": request.prompt,
            "duration": settings.duration_secs,
            "aspect_ratio": settings.aspect_ratio.as_str(),
            "resolution": resolution,
            "is_public": false,
        });
        if let Value::Object(map) = &mut payload {
            put_opt(map, "negative_prompt", request.negative_prompt.as_ref());
            put_opt(map, "image_url", request.image_url.as_ref());
        }
        merge_overrides(&mut payload, settings);
        payload
    }
}
