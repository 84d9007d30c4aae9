//! Kling.

use std::time::Duration;

use serde_json::{json, Value};
use vgen_models::{
    AspectRatio, ProviderCapabilities, ProviderId, ProviderRequest, ProviderStatus, Quality,
    VideoFormat,
};
use vgen_resilience::RetryPolicy;

use super::{merge_overrides, put_opt, tune_prompt};
use crate::provider::VideoProvider;

const STYLE_SUFFIX: &str = ", high quality, coherent motion";

const STATUS_TABLE: &[(&str, ProviderStatus)] = &[
    ("submitted", ProviderStatus::Queued),
    ("processing", ProviderStatus::Processing),
    ("succeed", ProviderStatus::Completed),
    ("failed", ProviderStatus::Failed),
];

pub struct KlingProvider {
    capabilities: ProviderCapabilities,
    retry: RetryPolicy,
}

impl KlingProvider {
    pub fn new() -> Self {
        Self {
            capabilities: ProviderCapabilities {
                max_duration_secs: 10,
                supported_formats: vec![VideoFormat::Mp4, VideoFormat::Mov],
                supported_qualities: vec![Quality::Standard, Quality::High, Quality::Ultra],
                supported_aspect_ratios: vec![
                    AspectRatio::Landscape,
                    AspectRatio::Portrait,
                    AspectRatio::Square,
                ],
                supports_image_to_video: true,
                supports_negative_prompts: true,
                max_prompt_length: 2500,
                cost_per_second: 0.06,
            },
            retry: RetryPolicy::default()
                .with_max_attempts(3)
                .with_initial_delay(Duration::from_secs(3))
                .with_max_delay(Duration::from_secs(45))
                .with_backoff_multiplier(2.5)
                .with_retryable_status_codes([429, 500, 502, 503, 504]),
        }
    }
}

impl Default for KlingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoProvider for KlingProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Kling
    }

    fn model(&self) -> &'static str {
        "kling-v1-5"
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
        // "pro" mode for anything above standard
        let mode = match settings.quality {
            Quality::Draft | Quality::Standard => "std",
            Quality::High | Quality::Ultra => "pro",
        };
        let mut payload = json!({
            "model_name": self.model(),
            "prompt": request.prompt,
            "mode": mode,
            "duration": settings.duration_secs.to_string(),
            "aspect_ratio": settings.aspect_ratio.as_str(),
            "cfg_scale": 0.5,
        });
        if let Value::Object(map) = &mut payload {
            put_opt(map, "negative_prompt", request.negative_prompt.as_ref());
            put_opt(map, "image", request.image_url.as_ref());
        }
        merge_overrides(&mut payload, settings);
        payload
    }
}
