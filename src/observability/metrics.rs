//! # Metrics
//!
//! Prometheus metrics for stack reconciliation.
//!
//! ## Metrics Exposed
//!
//! - `stack_reconciler_operations_total` - Reconciler operations by operation and outcome
//! - `stack_reconciler_operation_duration_seconds` - Duration of reconciler operations
//! - `stack_reconciler_control_plane_calls_total` - Control-plane calls by call name
//! - `stack_reconciler_control_plane_errors_total` - Failed control-plane calls by call name
//! - `stack_reconciler_waiter_polls_total` - Status polls issued by waiters
//! - `stack_reconciler_secret_decryptions_total` - Secret values sent to the decryption oracle
//! - `stack_reconciler_secret_decryption_errors_total` - Failed secret decryptions

use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stack_reconciler_operations_total",
            "Total number of reconciler operations by operation and outcome",
        ),
        &["operation", "outcome"],
    )
    .expect("Failed to create OPERATIONS_TOTAL metric - this should never happen")
});

static OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "stack_reconciler_operation_duration_seconds",
            "Duration of reconciler operations in seconds",
        )
        .buckets(vec![1.0, 10.0, 60.0, 300.0, 600.0, 900.0, 1800.0]),
        &["operation"],
    )
    .expect("Failed to create OPERATION_DURATION metric - this should never happen")
});

static CONTROL_PLANE_CALLS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stack_reconciler_control_plane_calls_total",
            "Total number of control-plane calls by call name",
        ),
        &["call"],
    )
    .expect("Failed to create CONTROL_PLANE_CALLS_TOTAL metric - this should never happen")
});

static CONTROL_PLANE_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stack_reconciler_control_plane_errors_total",
            "Total number of failed control-plane calls by call name",
        ),
        &["call"],
    )
    .expect("Failed to create CONTROL_PLANE_ERRORS_TOTAL metric - this should never happen")
});

static WAITER_POLLS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stack_reconciler_waiter_polls_total",
        "Total number of status polls issued while waiting on a stack",
    )
    .expect("Failed to create WAITER_POLLS_TOTAL metric - this should never happen")
});

static SECRET_DECRYPTIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stack_reconciler_secret_decryptions_total",
        "Total number of secret values sent to the decryption oracle",
    )
    .expect("Failed to create SECRET_DECRYPTIONS_TOTAL metric - this should never happen")
});

static SECRET_DECRYPTION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stack_reconciler_secret_decryption_errors_total",
        "Total number of failed secret decryptions",
    )
    .expect("Failed to create SECRET_DECRYPTION_ERRORS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails when called twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(CONTROL_PLANE_CALLS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONTROL_PLANE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WAITER_POLLS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRET_DECRYPTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRET_DECRYPTION_ERRORS_TOTAL.clone()))?;

    Ok(())
}

/// Encode every registered metric in the Prometheus text exposition format
#[allow(
    clippy::missing_errors_doc,
    reason = "Encoding only fails on malformed metric families"
)]
pub fn render_metrics() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_operation(operation: &str, outcome: &str, duration: f64) {
    OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
    OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(duration);
}

pub fn increment_control_plane_calls(call: &str) {
    CONTROL_PLANE_CALLS_TOTAL.with_label_values(&[call]).inc();
}

pub fn increment_control_plane_errors(call: &str) {
    CONTROL_PLANE_ERRORS_TOTAL.with_label_values(&[call]).inc();
}

pub fn increment_waiter_polls() {
    WAITER_POLLS_TOTAL.inc();
}

pub fn increment_secret_decryptions() {
    SECRET_DECRYPTIONS_TOTAL.inc();
}

pub fn increment_secret_decryption_errors() {
    SECRET_DECRYPTION_ERRORS_TOTAL.inc();
}
