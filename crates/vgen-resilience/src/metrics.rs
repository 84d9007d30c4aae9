//! Resilience metrics.
//!
//! Counters and gauges for breaker transitions, retries and bulkhead pressure.

use metrics::{counter, gauge};

/// Metric name constants for consistency.
pub mod names {
    /// Breaker state changes by key and target state.
    pub const BREAKER_TRANSITIONS_TOTAL: &str = "vgen_circuit_breaker_transitions_total";

    /// Retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "vgen_retries_total";

    /// Slots currently held, by bulkhead.
    pub const BULKHEAD_ACTIVE: &str = "vgen_bulkhead_active";

    /// Callers waiting for a slot, by bulkhead.
    pub const BULKHEAD_WAITING: &str = "vgen_bulkhead_waiting";

    /// Rejected admissions by bulkhead and reason.
    pub const BULKHEAD_REJECTIONS_TOTAL: &str = "vgen_bulkhead_rejections_total";
}

pub fn record_breaker_transition(key: &str, state: &'static str) {
    counter!(
        names::BREAKER_TRANSITIONS_TOTAL,
        "key" => key.to_string(),
        "state" => state
    )
    .increment(1);
}

pub fn record_retry(operation: &str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn set_bulkhead_usage(name: &str, active: usize, waiting: usize) {
    gauge!(names::BULKHEAD_ACTIVE, "bulkhead" => name.to_string()).set(active as f64);
    gauge!(names::BULKHEAD_WAITING, "bulkhead" => name.to_string()).set(waiting as f64);
}

pub fn record_bulkhead_rejection(name: &str, reason: &'static str) {
    counter!(
        names::BULKHEAD_REJECTIONS_TOTAL,
        "bulkhead" => name.to_string(),
        "reason" => reason
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::BREAKER_TRANSITIONS_TOTAL.starts_with("vgen_"));
        assert!(names::RETRIES_TOTAL.contains("retries"));
        assert!(names::BULKHEAD_REJECTIONS_TOTAL.contains("rejections"));
    }
}
