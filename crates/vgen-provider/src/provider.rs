//! The per-provider contract.
//!
//! Everything that differs between upstreams is data or a pure function
//! here; the network path is shared by [`crate::ProviderClient`].

use serde_json::Value;
use tracing::warn;
use vgen_models::{ProviderCapabilities, ProviderId, ProviderRequest, ProviderStatus};
use vgen_resilience::RetryPolicy;

use crate::error::{ProviderError, ProviderResult};
use crate::metrics::record_unmapped_status;

pub trait VideoProvider: Send + Sync + 'static {
    fn id(&self) -> ProviderId;

    /// Model name reported in response metadata.
    fn model(&self) -> &'static str;

    fn capabilities(&self) -> &ProviderCapabilities;

    fn retry_policy(&self) -> &RetryPolicy;

    /// Upstream status strings and the common status each maps to.
    fn status_table(&self) -> &'static [(&'static str, ProviderStatus)];

    /// Provider-specific prompt tuning. Must be idempotent.
    fn optimize_prompt(&self, prompt: &str) -> String;

    /// Request body for this provider.
    fn shape_payload(&self, request: &ProviderRequest) -> Value;

    /// Map an upstream status into the common vocabulary.
    ///
    /// Unknown statuses fall back to `Queued`. That keeps polling alive but can
    /// hide a stuck generation, so every occurrence is logged and counted.
    fn map_status(&self, raw: &str) -> ProviderStatus {
        match self
            .status_table()
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(raw))
        {
            Some((_, status)) => *status,
            None => {
                warn!(provider = %self.id(), status = raw, "Unmapped provider status, treating as queued");
                record_unmapped_status(self.id(), raw);
                ProviderStatus::Queued
            }
        }
    }

    /// Upstream spelling of a common status (first table entry wins).
    fn native_status(&self, status: ProviderStatus) -> &'static str {
        self.status_table()
            .iter()
            .find(|(_, s)| *s == status)
            .map(|(name, _)| *name)
            .unwrap_or(status.as_str())
    }

    fn estimate_cost(&self, request: &ProviderRequest) -> f64 {
        self.capabilities()
            .estimate_cost(&request.settings, request.image_url.is_some())
    }

    /// Check a request against the capabilities before any network call.
    fn validate(&self, request: &ProviderRequest) -> ProviderResult<()> {
        let caps = self.capabilities();
        let id = self.id();
        let settings = &request.settings;

        if request.prompt.trim().is_empty() {
            return Err(ProviderError::validation(id, "Prompt is empty"));
        }
        let prompt_len = request.prompt.chars().count();
        if prompt_len > caps.max_prompt_length {
            return Err(ProviderError::validation(
                id,
                format!("Prompt is {} characters, limit is {}", prompt_len, caps.max_prompt_length),
            ));
        }
        if settings.duration_secs == 0 || settings.duration_secs > caps.max_duration_secs {
            return Err(ProviderError::validation(
                id,
                format!(
                    "Duration {}s outside supported range 1-{}s",
                    settings.duration_secs, caps.max_duration_secs
                ),
            ));
        }
        if !(1..=60).contains(&settings.fps) {
            return Err(ProviderError::validation(
                id,
                format!("Frame rate {} outside supported range 1-60", settings.fps),
            ));
        }
        if !caps.supported_formats.contains(&settings.format) {
            return Err(ProviderError::validation(
                id,
                format!("Format {} not supported", settings.format),
            ));
        }
        if !caps.supported_qualities.contains(&settings.quality) {
            return Err(ProviderError::validation(
                id,
                format!("Quality {} not supported", settings.quality),
            ));
        }
        if !caps.supported_aspect_ratios.contains(&settings.aspect_ratio) {
            return Err(ProviderError::validation(
                id,
                format!("Aspect ratio {} not supported", settings.aspect_ratio),
            ));
        }
        if request.image_url.is_some() && !caps.supports_image_to_video {
            return Err(ProviderError::validation(id, "Image-to-video not supported"));
        }
        let has_negative = request
            .negative_prompt
            .as_deref()
            .is_some_and(|n| !n.trim().is_empty());
        if has_negative && !caps.supports_negative_prompts {
            return Err(ProviderError::validation(id, "Negative prompts not supported"));
        }

        Ok(())
    }
}
