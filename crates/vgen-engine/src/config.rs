//! Orchestrator configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use vgen_models::{DEFAULT_MAX_REGENERATION_ATTEMPTS, DEFAULT_PRIORITY};
use vgen_queue::QueueConfig;
use vgen_resilience::{BulkheadConfig, CircuitBreakerConfig};

/// Which transport provider clients talk through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderMode {
    /// In-process deterministic upstream
    #[default]
    Simulated,
    /// Real provider APIs over HTTPS
    Http,
}

impl FromStr for ProviderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simulated" | "sim" => Ok(ProviderMode::Simulated),
            "http" | "live" => Ok(ProviderMode::Http),
            other => Err(format!("Unknown provider mode: {}", other)),
        }
    }
}

impl fmt::Display for ProviderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderMode::Simulated => f.write_str("simulated"),
            ProviderMode::Http => f.write_str("http"),
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Jobs allowed to hold a processing slot at once
    pub max_concurrent_jobs: usize,
    /// Submissions allowed to wait for a slot
    pub max_queue_size: usize,
    /// How long a submission waits for a slot
    pub acquire_timeout: Duration,
    /// Wall-clock budget for one pipeline run
    pub job_timeout: Duration,
    /// Delay between provider progress polls
    pub poll_interval: Duration,
    /// Poll budget for the generating stage
    pub max_polls: u32,
    /// Submissions estimated above this (USD) are rejected
    pub max_cost_per_job: f64,
    pub max_regeneration_attempts: u32,
    pub default_priority: u8,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    pub provider_mode: ProviderMode,
    pub breaker: CircuitBreakerConfig,
    pub queue: QueueConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            max_queue_size: 10,
            acquire_timeout: Duration::from_secs(30),
            job_timeout: Duration::from_secs(600), // 10 minutes
            poll_interval: Duration::from_secs(2),
            max_polls: 300,
            max_cost_per_job: 50.0,
            max_regeneration_attempts: DEFAULT_MAX_REGENERATION_ATTEMPTS,
            default_priority: DEFAULT_PRIORITY,
            shutdown_timeout: Duration::from_secs(30),
            provider_mode: ProviderMode::default(),
            breaker: CircuitBreakerConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: std::env::var("VGEN_MAX_CONCURRENT_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            max_queue_size: std::env::var("VGEN_MAX_QUEUE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            acquire_timeout: Duration::from_secs(
                std::env::var("VGEN_ACQUIRE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            job_timeout: Duration::from_secs(
                std::env::var("VGEN_JOB_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            poll_interval: Duration::from_millis(
                std::env::var("VGEN_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
            max_polls: std::env::var("VGEN_MAX_POLLS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            max_cost_per_job: std::env::var("VGEN_MAX_COST_PER_JOB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(50.0),
            max_regeneration_attempts: std::env::var("VGEN_MAX_REGENERATIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_REGENERATION_ATTEMPTS),
            default_priority: DEFAULT_PRIORITY,
            shutdown_timeout: Duration::from_secs(
                std::env::var("VGEN_SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            provider_mode: std::env::var("VGEN_PROVIDER_MODE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            breaker: CircuitBreakerConfig::from_env(),
            queue: QueueConfig::from_env(),
        }
    }

    pub fn bulkhead(&self) -> BulkheadConfig {
        BulkheadConfig {
            max_concurrent: self.max_concurrent_jobs,
            max_queue_size: self.max_queue_size,
            acquire_timeout: self.acquire_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.max_regeneration_attempts, 3);
        assert_eq!(config.bulkhead().max_queue_size, 10);
        assert_eq!(config.provider_mode, ProviderMode::Simulated);
    }

    #[test]
    fn test_provider_mode_parse() {
        assert_eq!("HTTP".parse::<ProviderMode>(), Ok(ProviderMode::Http));
        assert_eq!("sim".parse::<ProviderMode>(), Ok(ProviderMode::Simulated));
        assert!("carrier-pigeon".parse::<ProviderMode>().is_err());
    }
}
