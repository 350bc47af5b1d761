//! Prometheus metrics for returns-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "returns_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Return lines created by requested resolution.
pub static RETURN_LINES_CREATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "returns_lines_created_total",
        "Total number of return lines created",
        &["resolution"]
    )
    .expect("Failed to register lines_created")
});

/// State-machine transitions by operation and outcome.
pub static TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "returns_transitions_total",
        "Total number of attempted line transitions",
        &["transition", "outcome"] // ok, rejected - not line_id to avoid cardinality explosion
    )
    .expect("Failed to register transitions_total")
});

/// Inventory ledger postings by reason.
pub static LEDGER_ENTRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "returns_ledger_entries_total",
        "Total number of inventory ledger entries posted",
        &["reason"]
    )
    .expect("Failed to register ledger_entries_total")
});

/// Refund postings by outcome.
pub static REFUNDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "returns_refunds_total",
        "Total number of refund posting attempts",
        &["outcome"]
    )
    .expect("Failed to register refunds_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&RETURN_LINES_CREATED);
    Lazy::force(&TRANSITIONS_TOTAL);
    Lazy::force(&LEDGER_ENTRIES_TOTAL);
    Lazy::force(&REFUNDS_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
