//! Prometheus metrics for identity-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "identity_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Claim redemptions by outcome (consumed, expired, mismatch, ...).
pub static REGISTRATION_CLAIMS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "identity_registration_claims_total",
        "Total number of registration claim attempts",
        &["outcome"]
    )
    .expect("Failed to register registration_claims_total")
});

/// Effective-permission resolutions.
pub static AUTHZ_RESOLUTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "identity_authz_resolutions_total",
        "Total number of effective permission resolutions",
        &["result"] // empty, granted
    )
    .expect("Failed to register authz_resolutions_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "identity_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&REGISTRATION_CLAIMS_TOTAL);
    Lazy::force(&AUTHZ_RESOLUTIONS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        init_metrics();
        REGISTRATION_CLAIMS_TOTAL
            .with_label_values(&["consumed"])
            .inc();
        let text = gather_metrics();
        assert!(text.contains("identity_registration_claims_total"));
    }
}
