//! Prometheus metrics for ledger-sync-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Classified statement lines by category.
pub static LINES_CLASSIFIED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_sync_lines_classified_total",
        "Total number of statement lines classified",
        &["category"]
    )
    .expect("Failed to register lines_classified")
});

/// Matcher passes by tolerance level and result.
pub static MATCH_PASSES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_sync_match_passes_total",
        "Total number of matcher tolerance passes",
        &["level", "result"]
    )
    .expect("Failed to register match_passes")
});

/// Group dispositions (executed, simulated, already_present, failed).
pub static GROUP_OUTCOMES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_sync_group_outcomes_total",
        "Total number of plan groups by disposition",
        &["disposition"]
    )
    .expect("Failed to register group_outcomes")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_sync_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ledger_sync_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&LINES_CLASSIFIED);
    Lazy::force(&MATCH_PASSES);
    Lazy::force(&GROUP_OUTCOMES);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

pub fn record_classified(category: &str) {
    LINES_CLASSIFIED.with_label_values(&[category]).inc();
}

pub fn record_match_pass(level: &str, result: &str) {
    MATCH_PASSES.with_label_values(&[level, result]).inc();
}

pub fn record_group_outcome(disposition: &str) {
    GROUP_OUTCOMES.with_label_values(&[disposition]).inc();
}

pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_metrics_are_exported() {
        init_metrics();
        record_classified("CARD_SALE");
        record_match_pass("exact", "resolved");
        record_group_outcome("simulated");

        let text = get_metrics();
        assert!(text.contains("ledger_sync_lines_classified_total"));
        assert!(text.contains("ledger_sync_match_passes_total"));
        assert!(text.contains("ledger_sync_group_outcomes_total"));
    }
}
