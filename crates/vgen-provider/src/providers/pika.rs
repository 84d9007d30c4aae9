//! Pika 1.5.

use std::time::Duration;

use serde_json::{json, Value};
use vgen_models::{
    AspectRatio, ProviderCapabilities, ProviderId, ProviderRequest, ProviderStatus, Quality,
    VideoFormat,
};
use vgen_resilience::RetryPolicy;

use super::{merge_overrides, put_opt, tune_prompt};
use crate::provider::VideoProvider;

const STYLE_SUFFIX: &str = ", smooth motion";

const STATUS_TABLE: &[(&str, ProviderStatus)] = &[
    ("queued", ProviderStatus::Queued),
    ("pending", ProviderStatus::Queued),
    ("processing", ProviderStatus::Processing),
    ("finished", ProviderStatus::Completed),
    ("error", ProviderStatus::Failed),
];

pub struct PikaProvider {
    capabilities: ProviderCapabilities,
    retry: RetryPolicy,
}

impl PikaProvider {
    pub fn new() -> Self {
        Self {
            capabilities: ProviderCapabilities {
                max_duration_secs: 10,
                supported_formats: vec![VideoFormat::Mp4],
                supported_qualities: vec![Quality::Draft, Quality::Standard, Quality::High],
                supported_aspect_ratios: vec![
                    AspectRatio::Landscape,
                    AspectRatio::Portrait,
                    AspectRatio::Square,
                    AspectRatio::Classic,
                ],
                supports_image_to_video: true,
                supports_negative_prompts: true,
                max_prompt_length: 1000,
                cost_per_second: 0.04,
            },
            retry: RetryPolicy::default()
                .with_max_attempts(4)
                .with_initial_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(15))
                .with_backoff_multiplier(2.0)
                .with_retryable_status_codes([429, 500, 502, 503]),
        }
    }
}

impl Default for PikaProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoProvider for PikaProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Pika
    }

    fn model(&self) -> &'static str {
        "pika-1.5"
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
            "promptText": request.prompt,
            "model": self.model(),
            "options": {
                "aspectRatio": settings.aspect_ratio.as_str(),
                "frameRate": settings.fps,
                "duration": settings.duration_secs,
            },
        });
        if let Value::Object(map) = &mut payload {
            put_opt(map, "negativePrompt", request.negative_prompt.as_ref());
            put_opt(map, "image", request.image_url.as_ref());
        }
        merge_overrides(&mut payload, settings);
        payload
    }
}
