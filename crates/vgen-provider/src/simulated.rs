//! Deterministic in-process upstream.
//!
//! Used by the binary's demo mode and by tests. Each fetch advances a
//! generation by a fixed step and reports status in the provider's own
//! vocabulary, so the normalization path is exercised exactly as with a
//! real upstream.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;
use vgen_models::{ProviderId, ProviderStatus};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::VideoProvider;
use crate::providers::builtin;
use crate::transport::{ProviderTransport, RawGeneration};

struct SimGeneration {
    provider: ProviderId,
    progress: u8,
    cancelled: bool,
}

#[derive(Default)]
struct SimState {
    generations: HashMap<String, SimGeneration>,
    /// HTTP statuses returned by the next submits, in order
    scripted_submit_failures: VecDeque<u16>,
    next_id: u64,
    submit_calls: u32,
    fetch_calls: u32,
    cancel_calls: u32,
}

/// Fake upstream for every provider.
pub struct SimulatedTransport {
    progress_step: u8,
    latency: Duration,
    cancel_latency: Duration,
    terminal_failure: Option<String>,
    natives: HashMap<ProviderId, Arc<dyn VideoProvider>>,
    state: Mutex<SimState>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self {
            progress_step: 25,
            latency: Duration::ZERO,
            cancel_latency: Duration::ZERO,
            terminal_failure: None,
            natives: ProviderId::ALL.iter().map(|id| (*id, builtin(*id))).collect(),
            state: Mutex::new(SimState::default()),
        }
    }

    /// Progress added per fetch (clamped to 1-100).
    pub fn with_progress_step(mut self, step: u8) -> Self {
        self.progress_step = step.clamp(1, 100);
        self
    }

    /// Delay applied to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Extra delay before a cancel is acknowledged.
    pub fn with_cancel_latency(mut self, latency: Duration) -> Self {
        self.cancel_latency = latency;
        self
    }

    /// Finish every generation as failed with this message.
    pub fn with_terminal_failure(mut self, message: impl Into<String>) -> Self {
        self.terminal_failure = Some(message.into());
        self
    }

    /// Make the next `count` submits fail with HTTP `status`.
    pub fn fail_next_submits(&self, count: usize, status: u16) {
        let mut state = self.state.lock();
        state
            .scripted_submit_failures
            .extend(std::iter::repeat(status).take(count));
    }

    pub fn submit_calls(&self) -> u32 {
        self.state.lock().submit_calls
    }

    pub fn fetch_calls(&self) -> u32 {
        self.state.lock().fetch_calls
    }

    pub fn cancel_calls(&self) -> u32 {
        self.state.lock().cancel_calls
    }

    pub fn is_cancelled(&self, generation_id: &str) -> bool {
        self.state
            .lock()
            .generations
            .get(generation_id)
            .is_some_and(|g| g.cancelled)
    }

    fn native(&self, provider: ProviderId, status: ProviderStatus) -> String {
        match self.natives.get(&provider) {
            Some(p) => p.native_status(status).to_string(),
            None => status.as_str().to_string(),
        }
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderTransport for SimulatedTransport {
    async fn submit(&self, provider: ProviderId, _payload: &Value) -> ProviderResult<RawGeneration> {
        self.simulate_latency().await;

        let id = {
            let mut state = self.state.lock();
            state.submit_calls += 1;
            if let Some(status) = state.scripted_submit_failures.pop_front() {
                return Err(ProviderError::upstream(provider, status, "simulated upstream failure"));
            }
            state.next_id += 1;
            let id = format!("sim_{}_{}", provider.as_str(), state.next_id);
            state.generations.insert(
                id.clone(),
                SimGeneration {
                    provider,
                    progress: 0,
                    cancelled: false,
                },
            );
            id
        };

        debug!(provider = %provider, generation_id = %id, "Simulated generation started");
        Ok(RawGeneration {
            id,
            status: self.native(provider, ProviderStatus::Queued),
            progress: Some(0),
            ..Default::default()
        })
    }

    async fn fetch(&self, provider: ProviderId, generation_id: &str) -> ProviderResult<RawGeneration> {
        self.simulate_latency().await;

        let (progress, cancelled) = {
            let mut state = self.state.lock();
            state.fetch_calls += 1;
            let step = self.progress_step;
            let generation = state
                .generations
                .get_mut(generation_id)
                .filter(|g| g.provider == provider)
                .ok_or_else(|| ProviderError::upstream(provider, 404, "generation not found"))?;
            if !generation.cancelled {
                generation.progress = generation.progress.saturating_add(step).min(100);
            }
            (generation.progress, generation.cancelled)
        };

        let mut raw = RawGeneration {
            id: generation_id.to_string(),
            progress: Some(progress),
            ..Default::default()
        };

        if cancelled {
            raw.status = self.native(provider, ProviderStatus::Failed);
            raw.error = Some("cancelled".to_string());
        } else if progress < 100 {
            raw.status = self.native(provider, ProviderStatus::Processing);
            let remaining_fetches = (100 - progress).div_ceil(self.progress_step);
            raw.eta_secs = Some(u64::from(remaining_fetches) * 2);
        } else if let Some(message) = &self.terminal_failure {
            raw.status = self.native(provider, ProviderStatus::Failed);
            raw.error = Some(message.clone());
        } else {
            raw.status = self.native(provider, ProviderStatus::Completed);
            raw.video_url = Some(format!(
                "https://cdn.vgen.local/{}/{}.mp4",
                provider.as_str(),
                generation_id
            ));
            raw.thumbnail_url = Some(format!(
                "https://cdn.vgen.local/{}/{}.jpg",
                provider.as_str(),
                generation_id
            ));
        }

        Ok(raw)
    }

    async fn cancel(&self, provider: ProviderId, generation_id: &str) -> ProviderResult<()> {
        self.simulate_latency().await;
        if !self.cancel_latency.is_zero() {
            tokio::time::sleep(self.cancel_latency).await;
        }

        let mut state = self.state.lock();
        state.cancel_calls += 1;
        match state.generations.get_mut(generation_id) {
            Some(generation) if generation.provider == provider => {
                generation.cancelled = true;
                Ok(())
            }
            _ => Err(ProviderError::upstream(provider, 404, "generation not found")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_generation_progresses_to_completion() {
        let transport = SimulatedTransport::new().with_progress_step(50);
        let raw = transport.submit(ProviderId::Luma, &json!({})).await.unwrap();
        assert_eq!(raw.status, "queued");

        let first = transport.fetch(ProviderId::Luma, &raw.id).await.unwrap();
        assert_eq!(first.status, "dreaming");
        assert_eq!(first.progress, Some(50));

        let done = transport.fetch(ProviderId::Luma, &raw.id).await.unwrap();
        assert_eq!(done.status, "completed");
        assert!(done.video_url.is_some());
        assert_eq!(transport.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let transport = SimulatedTransport::new();
        transport.fail_next_submits(2, 503);

        for _ in 0..2 {
            let err = transport.submit(ProviderId::Pika, &json!({})).await.unwrap_err();
            assert_eq!(err.status(), Some(503));
        }
        assert!(transport.submit(ProviderId::Pika, &json!({})).await.is_ok());
        assert_eq!(transport.submit_calls(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_generation_reports_failed() {
        let transport = SimulatedTransport::new();
        let raw = transport.submit(ProviderId::Runway, &json!({})).await.unwrap();
        transport.cancel(ProviderId::Runway, &raw.id).await.unwrap();

        let fetched = transport.fetch(ProviderId::Runway, &raw.id).await.unwrap();
        assert_eq!(fetched.status, "FAILED");
        assert!(transport.is_cancelled(&raw.id));
    }
}
