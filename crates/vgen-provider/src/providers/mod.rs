//! Built-in provider definitions.

mod haiper;
mod kling;
mod luma;
mod pika;
mod runway;
mod stable_video;

use std::sync::Arc;

use serde_json::{Map, Value};
use vgen_models::{GenerationSettings, ProviderId};

use crate::provider::VideoProvider;

pub use haiper::HaiperProvider;
pub use kling::KlingProvider;
pub use luma::LumaProvider;
pub use pika::PikaProvider;
pub use runway::RunwayProvider;
pub use stable_video::StableVideoProvider;

/// Default definition for a provider.
pub fn builtin(id: ProviderId) -> Arc<dyn VideoProvider> {
    match id {
        ProviderId::Runway => Arc::new(RunwayProvider::new()),
        ProviderId::Pika => Arc::new(PikaProvider::new()),
        ProviderId::StableVideo => Arc::new(StableVideoProvider::new()),
        ProviderId::Luma => Arc::new(LumaProvider::new()),
        ProviderId::Kling => Arc::new(KlingProvider::new()),
        ProviderId::Haiper => Arc::new(HaiperProvider::new()),
    }
}

pub fn all_builtin() -> Vec<Arc<dyn VideoProvider>> {
    ProviderId::ALL.iter().map(|id| builtin(*id)).collect()
}

/// Cut `text` to at most `max_chars`, preferring a word boundary.
pub(crate) fn fit_prompt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut: String = text.chars().take(max_chars).collect();
    let trimmed = match cut.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => &cut[..idx],
        _ => cut.as_str(),
    };
    trimmed.trim_end_matches(|c: char| c.is_whitespace() || c == ',').to_string()
}

/// Append a style suffix once and keep the result within `max_chars`.
///
/// Re-running on its own output returns the same string.
pub(crate) fn tune_prompt(prompt: &str, suffix: &str, max_chars: usize) -> String {
    let base = prompt.trim();
    let base = base.strip_suffix(suffix).unwrap_or(base).trim_end();
    let budget = max_chars.saturating_sub(suffix.chars().count());
    let base = fit_prompt(base, budget);
    if base.is_empty() {
        return String::new();
    }
    format!("{}{}", base, suffix)
}

/// Copy caller-supplied provider knobs into the payload, without
/// clobbering fields the provider shape already set.
pub(crate) fn merge_overrides(payload: &mut Value, settings: &GenerationSettings) {
    if let Value::Object(map) = payload {
        for (key, value) in &settings.provider_overrides {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// Insert `value` under `key` when present.
pub(crate) fn put_opt(map: &mut Map<String, Value>, key: &str, value: Option<&String>) {
    if let Some(v) = value {
        map.insert(key.to_string(), Value::String(v.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgen_models::{ProviderRequest, ProviderStatus};

    fn request(prompt: &str) -> ProviderRequest {
        ProviderRequest {
            prompt: prompt.to_string(),
            negative_prompt: None,
            image_url: None,
            settings: GenerationSettings::default(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_fit_prompt_prefers_word_boundary() {
        assert_eq!(fit_prompt("a red fox jumps", 100), "a red fox jumps");
        assert_eq!(fit_prompt("a red fox jumps", 11), "a red fox");
        assert_eq!(fit_prompt("abcdefghij", 4), "abcd");
    }

    #[test]
    fn test_optimize_prompt_is_idempotent_for_every_provider() {
        let long = "a slow pan across a foggy harbour at dawn ".repeat(100);
        for provider in all_builtin() {
            for prompt in ["a cat on a windowsill", long.as_str()] {
                let once = provider.optimize_prompt(prompt);
                let twice = provider.optimize_prompt(&once);
                assert_eq!(once, twice, "{} not idempotent", provider.id());
                assert!(once.chars().count() <= provider.capabilities().max_prompt_length);
            }
        }
    }

    #[test]
    fn test_every_provider_validates_its_own_default_settings() {
        for provider in all_builtin() {
            let mut req = request(&provider.optimize_prompt("a lighthouse at dusk"));
            req.settings.duration_secs = provider.capabilities().max_duration_secs.min(4);
            assert!(
                provider.validate(&req).is_ok(),
                "{} rejected default settings",
                provider.id()
            );
            assert!(provider.estimate_cost(&req) > 0.0);
        }
    }

    #[test]
    fn test_status_tables_cover_every_common_status() {
        for provider in all_builtin() {
            for status in [
                ProviderStatus::Queued,
                ProviderStatus::Processing,
                ProviderStatus::Completed,
                ProviderStatus::Failed,
            ] {
                let native = provider.native_status(status);
                assert_eq!(provider.map_status(native), status, "{}", provider.id());
            }
        }
    }

    #[test]
    fn test_unknown_status_defaults_to_queued() {
        let provider = builtin(ProviderId::Luma);
        assert_eq!(provider.map_status("teleporting"), ProviderStatus::Queued);
        assert_eq!(provider.map_status("COMPLETED"), ProviderStatus::Completed);
    }

    #[test]
    fn test_overrides_do_not_clobber_shaped_fields() {
        let provider = builtin(ProviderId::Runway);
        let mut req = request("a lighthouse");
        req.settings
            .provider_overrides
            .insert("seed".to_string(), serde_json::json!(42));
        req.settings
            .provider_overrides
            .insert("duration".to_string(), serde_json::json!(99));

        let payload = provider.shape_payload(&req);
        assert_eq!(payload["seed"], 42);
        assert_eq!(payload["duration"], 5);
    }
}
