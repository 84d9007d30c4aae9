//! Luma Dream Machine.

use std::time::Duration;

use serde_json::{json, Value};
use vgen_models::{
    AspectRatio, ProviderCapabilities, ProviderId, ProviderRequest, ProviderStatus, Quality,
    VideoFormat,
};
use vgen_resilience::RetryPolicy;

use super::{merge_overrides, tune_prompt};
use crate::provider::VideoProvider;

const STYLE_SUFFIX: &str = ", dreamlike, natural camera motion";

const STATUS_TABLE: &[(&str, ProviderStatus)] = &[
    ("queued", ProviderStatus::Queued),
    ("dreaming", ProviderStatus::Processing),
    ("completed", ProviderStatus::Completed),
    ("failed", ProviderStatus::Failed),
];

pub struct LumaProvider {
    capabilities: ProviderCapabilities,
    retry: RetryPolicy,
}

impl LumaProvider {
    pub fn new() -> Self {
        Self {
            capabilities: ProviderCapabilities {
                max_duration_secs: 5,
                supported_formats: vec![VideoFormat::Mp4],
                supported_qualities: vec![Quality::Standard, Quality::High],
                supported_aspect_ratios: vec![
                    AspectRatio::Landscape,
                    AspectRatio::Portrait,
                    AspectRatio::Square,
                    AspectRatio::Classic,
                    AspectRatio::Cinematic,
                ],
                supports_image_to_video: true,
                supports_negative_prompts: false,
                max_prompt_length: 1000,
                cost_per_second: 0.04,
            },
            retry: RetryPolicy::default()
                .with_max_attempts(3)
                .with_initial_delay(Duration::from_millis(1500))
                .with_max_delay(Duration::from_secs(20))
                .with_backoff_multiplier(2.0)
                .with_retryable_status_codes([429, 500, 503]),
        }
    }
}

impl Default for LumaProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoProvider for LumaProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Luma
    }

    fn model(&self) -> &'static str {
        "ray-1.6"
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
            "prompt": request.prompt,
            "aspect_ratio": settings.aspect_ratio.as_str(),
            "loop": false,
        });
        if let (Value::Object(map), Some(url)) = (&mut payload, &request.image_url) {
            map.insert(
                "keyframes".to_string(),
                json!({ "frame0": { "type": "image", "url": url } }),
            );
        }
        merge_overrides(&mut payload, settings);
        payload
    }
}
