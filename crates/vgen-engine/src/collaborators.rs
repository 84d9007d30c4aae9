//! Interfaces to the services that own prompts and storyboards.
//!
//! The orchestrator only reads from them at submit time. [`InMemoryCatalog`]
//! backs the binary and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use vgen_models::{GenerationSettings, OptimizedPrompt, ProviderId, StoryboardStatus};
use vgen_provider::builtin;

/// Source of provider-optimized prompts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PromptSource: Send + Sync {
    async fn optimized_prompt(&self, prompt_id: &str, provider: ProviderId) -> Option<OptimizedPrompt>;
}

/// Source of storyboard state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoryboardSource: Send + Sync {
    async fn storyboard_status(&self, storyboard_id: &str) -> Option<StoryboardStatus>;
}

/// In-process catalog of storyboards and prompts.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    storyboards: Arc<RwLock<HashMap<String, StoryboardStatus>>>,
    prompts: Arc<RwLock<HashMap<(String, ProviderId), OptimizedPrompt>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_storyboard(&self, storyboard_id: impl Into<String>, status: StoryboardStatus) {
        self.storyboards.write().insert(storyboard_id.into(), status);
    }

    pub fn add_prompt(&self, prompt_id: impl Into<String>, prompt: OptimizedPrompt) {
        self.prompts
            .write()
            .insert((prompt_id.into(), prompt.provider), prompt);
    }

    /// Register `text` for each provider, run through that provider's
    /// prompt optimization.
    pub fn seed_prompt(&self, prompt_id: &str, text: &str, providers: &[ProviderId]) {
        let defaults = GenerationSettings::default();
        for id in providers {
            let provider = builtin(*id);
            let optimized = provider.optimize_prompt(text);
            let token_count = optimized.split_whitespace().count() as u32;
            let mut settings = defaults.clone();
            settings.duration_secs = settings
                .duration_secs
                .min(provider.capabilities().max_duration_secs);
            self.add_prompt(
                prompt_id,
                OptimizedPrompt {
                    provider: *id,
                    text: optimized,
                    negative_prompt: None,
                    image_url: None,
                    token_count,
                    estimated_cost: provider.capabilities().estimate_cost(&settings, false),
                },
            );
        }
    }
}

#[async_trait]
impl PromptSource for InMemoryCatalog {
    async fn optimized_prompt(&self, prompt_id: &str, provider: ProviderId) -> Option<OptimizedPrompt> {
        self.prompts
            .read()
            .get(&(prompt_id.to_string(), provider))
            .cloned()
    }
}

#[async_trait]
impl StoryboardSource for InMemoryCatalog {
    async fn storyboard_status(&self, storyboard_id: &str) -> Option<StoryboardStatus> {
        self.storyboards.read().get(storyboard_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_prompts_are_per_provider() {
        let catalog = InMemoryCatalog::new();
        catalog.seed_prompt("p1", "a fox running through snow", &[ProviderId::Runway, ProviderId::Luma]);

        let runway = catalog.optimized_prompt("p1", ProviderId::Runway).await.unwrap();
        let luma = catalog.optimized_prompt("p1", ProviderId::Luma).await.unwrap();
        assert_eq!(runway.provider, ProviderId::Runway);
        assert!(runway.text.starts_with("a fox running through snow"));
        assert_ne!(runway.text, luma.text);
        assert!(runway.estimated_cost > 0.0);

        assert!(catalog.optimized_prompt("p1", ProviderId::Pika).await.is_none());
    }

    #[tokio::test]
    async fn test_storyboard_lookup() {
        let catalog = InMemoryCatalog::new();
        catalog.add_storyboard("sb", StoryboardStatus::Draft);
        assert_eq!(catalog.storyboard_status("sb").await, Some(StoryboardStatus::Draft));
        assert_eq!(catalog.storyboard_status("missing").await, None);
    }
}
