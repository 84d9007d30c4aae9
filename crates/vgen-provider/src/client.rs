//! Resilient client for one provider.
//!
//! Every call goes: breaker gate → transport under the provider's retry
//! policy → breaker bookkeeping → normalization into the common contract.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};
use vgen_models::{
    ProviderCapabilities, ProviderId, ProviderRequest, ProviderResponse, ResponseMetadata,
};
use vgen_resilience::{execute_with_retry, CircuitBreaker};

use crate::error::{ProviderError, ProviderResult};
use crate::metrics::record_request;
use crate::provider::VideoProvider;
use crate::transport::{ProviderTransport, RawGeneration};

pub struct ProviderClient {
    provider: Arc<dyn VideoProvider>,
    transport: Arc<dyn ProviderTransport>,
    breaker: CircuitBreaker,
}

impl ProviderClient {
    pub fn new(
        provider: Arc<dyn VideoProvider>,
        transport: Arc<dyn ProviderTransport>,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            provider,
            transport,
            breaker,
        }
    }

    pub fn id(&self) -> ProviderId {
        self.provider.id()
    }

    pub fn provider(&self) -> &dyn VideoProvider {
        self.provider.as_ref()
    }

    pub fn capabilities(&self) -> &ProviderCapabilities {
        self.provider.capabilities()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn validate(&self, request: &ProviderRequest) -> ProviderResult<()> {
        self.provider.validate(request)
    }

    pub fn estimate_cost(&self, request: &ProviderRequest) -> f64 {
        self.provider.estimate_cost(request)
    }

    /// Validate, shape and submit a generation.
    pub async fn generate(&self, request: &ProviderRequest) -> ProviderResult<ProviderResponse> {
        self.provider.validate(request)?;
        let payload = self.provider.shape_payload(request);
        let started = Instant::now();

        let raw = self
            .guarded("generate", || self.transport.submit(self.id(), &payload))
            .await?;

        let mut response = self.normalize(raw, started);
        response.metadata.cost = Some(self.provider.estimate_cost(request));
        debug!(
            provider = %self.id(),
            generation_id = %response.id,
            status = %response.status,
            "Generation submitted"
        );
        Ok(response)
    }

    /// Current state of a generation.
    pub async fn get_progress(&self, generation_id: &str) -> ProviderResult<ProviderResponse> {
        let started = Instant::now();
        let raw = self
            .guarded("get_progress", || self.transport.fetch(self.id(), generation_id))
            .await?;
        Ok(self.normalize(raw, started))
    }

    pub async fn cancel(&self, generation_id: &str) -> ProviderResult<()> {
        self.guarded("cancel", || self.transport.cancel(self.id(), generation_id))
            .await
    }

    async fn guarded<T, F, Fut>(&self, operation: &'static str, op: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        if self.breaker.is_open() {
            let retry_after = self.breaker.retry_after().unwrap_or_default();
            record_request(self.id(), operation, "circuit_open", 0.0);
            return Err(ProviderError::CircuitOpen {
                provider: self.id(),
                retry_after,
            });
        }

        let start = Instant::now();
        let label = format!("{}.{}", self.id(), operation);
        let policy = self.provider.retry_policy();
        let result = execute_with_retry(policy, &label, op)
            .await
            .map_err(|e| {
                let verdict = policy.is_retryable(&e);
                e.with_retryable(verdict)
            });
        let latency_ms = start.elapsed().as_millis() as f64;

        match &result {
            Ok(_) => {
                self.breaker.record_success();
                record_request(self.id(), operation, "ok", latency_ms);
            }
            Err(e) => {
                if e.counts_against_breaker() {
                    self.breaker.record_failure();
                }
                warn!(provider = %self.id(), operation, error = %e, "Provider call failed");
                let outcome = e.status().map_or_else(|| "error".to_string(), |s| s.to_string());
                record_request(self.id(), operation, &outcome, latency_ms);
            }
        }

        result
    }

    fn normalize(&self, raw: RawGeneration, started: Instant) -> ProviderResponse {
        ProviderResponse {
            status: self.provider.map_status(&raw.status),
            id: raw.id,
            video_url: raw.video_url,
            thumbnail_url: raw.thumbnail_url,
            progress: raw.progress.map(|p| p.min(100)),
            estimated_time_secs: raw.eta_secs,
            error: raw.error,
            metadata: ResponseMetadata {
                model: raw.model.unwrap_or_else(|| self.provider.model().to_string()),
                processing_time_ms: Some(started.elapsed().as_millis() as u64),
                cost: None,
            },
        }
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("provider", &self.id())
            .field("breaker", &self.breaker.snapshot())
            .finish()
    }
}
