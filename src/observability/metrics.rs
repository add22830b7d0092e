//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `backup_maker_reconciliations_total{kind}` - Total number of reconciliations
//! - `backup_maker_reconciliation_errors_total{kind}` - Total number of failed reconciliations
//! - `backup_maker_reconciliation_duration_seconds{kind}` - Duration of reconciliation passes
//! - `backup_maker_requeues_total{kind, reason}` - Requeues scheduled by the control loops
//! - `backup_maker_applied_objects_total{kind, outcome}` - Rendered documents created, updated or recreated
//! - `backup_maker_lock_contention_total` - Lock attempts that found the key already held
//! - `backup_maker_status_update_conflicts_total` - Status writes retried after a version conflict

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "backup_maker_reconciliations_total",
            "Total number of reconciliations",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "backup_maker_reconciliation_errors_total",
            "Total number of failed reconciliations",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "backup_maker_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "backup_maker_requeues_total",
            "Requeues scheduled by the control loops",
        ),
        &["kind", "reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static APPLIED_OBJECTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "backup_maker_applied_objects_total",
            "Rendered documents applied to the cluster",
        ),
        &["kind", "outcome"],
    )
    .expect("Failed to create APPLIED_OBJECTS_TOTAL metric - this should never happen")
});

static LOCK_CONTENTION_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "backup_maker_lock_contention_total",
        "Lock attempts that found the key already held",
    )
    .expect("Failed to create LOCK_CONTENTION_TOTAL metric - this should never happen")
});

static STATUS_UPDATE_CONFLICTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "backup_maker_status_update_conflicts_total",
        "Status writes retried after a resourceVersion conflict",
    )
    .expect("Failed to create STATUS_UPDATE_CONFLICTS_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(APPLIED_OBJECTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LOCK_CONTENTION_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_UPDATE_CONFLICTS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

pub fn increment_requeues(kind: &str, reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[kind, reason]).inc();
}

pub fn increment_applied_objects(kind: &str, outcome: &str) {
    APPLIED_OBJECTS_TOTAL
        .with_label_values(&[kind, outcome])
        .inc();
}

pub fn increment_lock_contention() {
    LOCK_CONTENTION_TOTAL.inc();
}

pub fn increment_status_update_conflicts() {
    STATUS_UPDATE_CONFLICTS_TOTAL.inc();
}
