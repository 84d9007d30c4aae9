//! Provider lookup keyed by [`ProviderId`].

use std::collections::HashMap;
use std::sync::Arc;

use vgen_models::ProviderId;
use vgen_resilience::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerState};

use crate::client::ProviderClient;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::VideoProvider;
use crate::providers::all_builtin;
use crate::transport::ProviderTransport;

/// One [`ProviderClient`] per provider, all sharing a transport and a
/// breaker registry.
#[derive(Clone)]
pub struct ProviderRegistry {
    clients: HashMap<ProviderId, Arc<ProviderClient>>,
    breakers: CircuitBreakerRegistry,
}

impl ProviderRegistry {
    /// Registry with all built-in providers.
    pub fn new(transport: Arc<dyn ProviderTransport>, breaker_config: CircuitBreakerConfig) -> Self {
        Self::with_providers(all_builtin(), transport, breaker_config)
    }

    pub fn with_providers(
        providers: impl IntoIterator<Item = Arc<dyn VideoProvider>>,
        transport: Arc<dyn ProviderTransport>,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let breakers = CircuitBreakerRegistry::new(breaker_config);
        let clients = providers
            .into_iter()
            .map(|provider| {
                let id = provider.id();
                let breaker = breakers.get(id.as_str());
                let client = ProviderClient::new(provider, Arc::clone(&transport), breaker);
                (id, Arc::new(client))
            })
            .collect();

        Self { clients, breakers }
    }

    pub fn get(&self, id: ProviderId) -> ProviderResult<Arc<ProviderClient>> {
        self.clients
            .get(&id)
            .cloned()
            .ok_or(ProviderError::NotConfigured(id))
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        let mut ids: Vec<_> = self.clients.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn breaker_state(&self, id: ProviderId) -> ProviderResult<CircuitBreakerState> {
        Ok(self.get(id)?.breaker().snapshot())
    }

    pub fn breaker_states(&self) -> Vec<CircuitBreakerState> {
        self.breakers.snapshots()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::builtin;
    use crate::simulated::SimulatedTransport;

    #[test]
    fn test_registry_has_all_providers_with_own_breakers() {
        let registry = ProviderRegistry::new(
            Arc::new(SimulatedTransport::new()),
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );
        assert_eq!(registry.providers().len(), 6);

        registry.get(ProviderId::Kling).unwrap().breaker().record_failure();
        assert!(registry.breaker_state(ProviderId::Kling).unwrap().is_open);
        assert!(!registry.breaker_state(ProviderId::Haiper).unwrap().is_open);
        assert_eq!(registry.breaker_states().len(), 6);
    }

    #[test]
    fn test_missing_provider() {
        let registry = ProviderRegistry::with_providers(
            [builtin(ProviderId::Luma)],
            Arc::new(SimulatedTransport::new()),
            CircuitBreakerConfig::default(),
        );
        assert_eq!(
            registry.get(ProviderId::Pika).unwrap_err(),
            ProviderError::NotConfigured(ProviderId::Pika)
        );
    }
}
