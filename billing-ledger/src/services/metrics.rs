//! Prometheus metrics for billing-ledger.
//!
//! Everything is registered in the default registry under the
//! `billing_ledger_` namespace.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Facade calls by operation and outcome (`ok` or `error`).
pub static LEDGER_OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_ledger_operations_total",
        "Ledger facade calls by operation and outcome",
        &["operation", "status"]
    )
    .expect("Failed to register operations_total")
});

/// Wall time of a facade call. Includes conflict retries and their
/// backoff, hence the long tail.
pub static LEDGER_OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_ledger_operation_duration_seconds",
        "Ledger facade call duration in seconds, conflict retries included",
        &["operation"],
        vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register operation_duration")
});

pub static INVOICE_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_ledger_invoice_transitions_total",
        "Invoices entering a lifecycle status",
        &["status"] // draft, sent, partial_paid, paid, cancelled
    )
    .expect("Failed to register invoice_transitions_total")
});

/// Effective minutes of newly recorded billable time entries.
pub static BILLABLE_MINUTES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_ledger_billable_minutes_total",
        "Effective billable minutes recorded, by entry type",
        &["entry_type"]
    )
    .expect("Failed to register billable_minutes_total")
});

pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_ledger_errors_total",
        "Failed ledger calls by error kind (validation, overlap, cross_tenant, ...)",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// One store unit of work, lock waits included.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_ledger_store_duration_seconds",
        "Store unit-of-work duration in seconds, lock waits included",
        &["operation"],
        vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register store_duration")
});

pub static PAYMENTS_RECEIVED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_ledger_payments_received_total",
        "Sum of recorded invoice payments, by invoice currency",
        &["currency"]
    )
    .expect("Failed to register payments_received_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&LEDGER_OPERATIONS_TOTAL);
    Lazy::force(&LEDGER_OPERATION_DURATION);
    Lazy::force(&INVOICE_TRANSITIONS_TOTAL);
    Lazy::force(&BILLABLE_MINUTES_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&PAYMENTS_RECEIVED_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
