//! Stable Video Diffusion.
//!
//! Short clips only, cheap, and the flakiest upstream of the set: the retry
//! policy is the most aggressive one.

use std::time::Duration;

use serde_json::{json, Value};
use vgen_models::{
    AspectRatio, ProviderCapabilities, ProviderId, ProviderRequest, ProviderStatus, Quality,
    VideoFormat,
};
use vgen_resilience::RetryPolicy;

use super::{merge_overrides, put_opt, tune_prompt};
use crate::provider::VideoProvider;

const STYLE_SUFFIX: &str = ", photorealistic";

const STATUS_TABLE: &[(&str, ProviderStatus)] = &[
    ("queued", ProviderStatus::Queued),
    ("in-progress", ProviderStatus::Processing),
    ("complete-success", ProviderStatus::Completed),
    ("complete-error", ProviderStatus::Failed),
    ("content-filtered", ProviderStatus::Failed),
];

pub struct StableVideoProvider {
    capabilities: ProviderCapabilities,
    retry: RetryPolicy,
}

impl StableVideoProvider {
    pub fn new() -> Self {
        Self {
            capabilities: ProviderCapabilities {
                max_duration_secs: 4,
                supported_formats: vec![VideoFormat::Mp4, VideoFormat::Webm],
                supported_qualities: vec![Quality::Draft, Quality::Standard],
                supported_aspect_ratios: vec![
                    AspectRatio::Landscape,
                    AspectRatio::Portrait,
                    AspectRatio::Square,
                ],
                supports_image_to_video: true,
                supports_negative_prompts: true,
                max_prompt_length: 1000,
                cost_per_second: 0.02,
            },
            retry: RetryPolicy::default()
                .with_max_attempts(5)
                .with_initial_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(8))
                .with_backoff_multiplier(1.5)
                .with_retryable_status_codes([408, 429, 500, 502, 503, 504]),
        }
    }
}

impl Default for StableVideoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoProvider for StableVideoProvider {
    fn id(&self) -> ProviderId {
        ProviderId::StableVideo
    }

    fn model(&self) -> &'static str {
        "svd-xt-1.1"
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
        // SVD counts frames, not seconds
        let frames = settings.duration_secs * settings.fps;
        let mut payload = json!({
            "text_prompts": [{ "text": request.prompt, "weight": 1.0 }],
            "frames": frames,
            "fps": settings.fps,
            "aspect_ratio": settings.aspect_ratio.as_str(),
            "output_format": settings.format.as_str(),
            "cfg_scale": 1.8,
            "motion_bucket_id": 127,
        });
        if let Value::Object(map) = &mut payload {
            if let Some(negative) = &request.negative_prompt {
                if let Some(Value::Array(prompts)) = map.get_mut("text_prompts") {
                    prompts.push(json!({ "text": negative, "weight": -1.0 }));
                }
            }
            put_opt(map, "init_image", request.image_url.as_ref());
        }
        merge_overrides(&mut payload, settings);
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgen_models::GenerationSettings;

    #[test]
    fn test_negative_prompt_becomes_weighted_text_prompt() {
        let provider = StableVideoProvider::new();
        let req = ProviderRequest {
            prompt: "waves".to_string(),
            negative_prompt: Some("text, watermark".to_string()),
            image_url: None,
            settings: GenerationSettings {
                duration_secs: 4,
                ..Default::default()
            },
            metadata: Default::default(),
        };

        let payload = provider.shape_payload(&req);
        assert_eq!(payload["frames"], 96);
        assert_eq!(payload["text_prompts"][1]["weight"], -1.0);
    }

    #[test]
    fn test_quality_limits() {
        let provider = StableVideoProvider::new();
        let req = ProviderRequest {
            prompt: "waves".to_string(),
            negative_prompt: None,
            image_url: None,
            settings: GenerationSettings {
                quality: Quality::High,
                duration_secs: 4,
                ..Default::default()
            },
            metadata: Default::default(),
        };
        assert!(provider.validate(&req).is_err());
    }
}
