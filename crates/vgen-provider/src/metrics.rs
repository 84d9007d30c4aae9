//! Provider call metrics.
//!
//! Provides standardized metrics for monitoring provider traffic:
//! - Request counters by provider, operation and outcome
//! - Latency histograms
//! - Unmapped upstream statuses

use metrics::{counter, histogram};
use vgen_models::ProviderId;

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    /// Provider calls by provider, operation and outcome.
    pub const REQUESTS_TOTAL: &str = "vgen_provider_requests_total";

    /// Call latency in seconds (retries included).
    pub const LATENCY_SECONDS: &str = "vgen_provider_latency_seconds";

    /// Upstream statuses missing from the provider's status table.
    pub const UNMAPPED_STATUS_TOTAL: &str = "vgen_provider_unmapped_status_total";
}

// =============================================================================
// Recording Functions
// =============================================================================

pub fn record_request(provider: ProviderId, operation: &'static str, outcome: &str, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "provider" => provider.as_str(),
        "operation" => operation,
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "provider" => provider.as_str(),
        "operation" => operation
    )
    .record(latency_ms / 1000.0);
}

pub fn record_unmapped_status(provider: ProviderId, status: &str) {
    counter!(
        names::UNMAPPED_STATUS_TOTAL,
        "provider" => provider.as_str(),
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::REQUESTS_TOTAL.contains("requests"));
        assert!(names::LATENCY_SECONDS.contains("latency"));
        assert!(names::UNMAPPED_STATUS_TOTAL.starts_with("vgen_provider_"));
    }
}
