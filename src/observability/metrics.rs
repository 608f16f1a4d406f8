//! # Metrics
//!
//! Prometheus metrics for monitoring the sync job.
//!
//! ## Metrics Exposed
//!
//! - `vault_cred_sync_cycles_total` - Total number of sync cycles started
//! - `vault_cred_sync_cycle_errors_total{stage}` - Cycles aborted while reading the source or authenticating
//! - `vault_cred_sync_cycles_unchanged_total` - Cycles skipped because the source secret did not change
//! - `vault_cred_sync_cycle_duration_seconds` - Duration of cycles that processed entries
//! - `vault_cred_sync_credentials_written_total{type}` - Credentials written to Vault
//! - `vault_cred_sync_credential_failures_total{type,reason}` - Entries skipped due to parse, validation or write failures
//! - `vault_cred_sync_unsupported_keys_total` - Entries skipped because their key prefix is unknown
//! - `vault_cred_sync_last_successful_sync_timestamp_seconds` - Unix time of the last completed cycle (entry failures do not prevent completion)

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static CYCLES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_cred_sync_cycles_total",
        "Total number of sync cycles started",
    )
    .expect("Failed to create CYCLES_TOTAL metric - this should never happen")
});

static CYCLE_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_cred_sync_cycle_errors_total",
            "Total number of sync cycles aborted, by stage",
        ),
        &["stage"],
    )
    .expect("Failed to create CYCLE_ERRORS_TOTAL metric - this should never happen")
});

static CYCLES_UNCHANGED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_cred_sync_cycles_unchanged_total",
        "Total number of sync cycles skipped because the source secret was unchanged",
    )
    .expect("Failed to create CYCLES_UNCHANGED_TOTAL metric - this should never happen")
});

static CYCLE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "vault_cred_sync_cycle_duration_seconds",
            "Duration of sync cycles that processed entries, in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create CYCLE_DURATION metric - this should never happen")
});

static CREDENTIALS_WRITTEN_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_cred_sync_credentials_written_total",
            "Total number of credentials written to Vault, by credential type",
        ),
        &["type"],
    )
    .expect("Failed to create CREDENTIALS_WRITTEN_TOTAL metric - this should never happen")
});

static CREDENTIAL_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_cred_sync_credential_failures_total",
            "Total number of credential entries skipped, by credential type and reason",
        ),
        &["type", "reason"],
    )
    .expect("Failed to create CREDENTIAL_FAILURES_TOTAL metric - this should never happen")
});

static UNSUPPORTED_KEYS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_cred_sync_unsupported_keys_total",
        "Total number of entries skipped because their key prefix is not supported",
    )
    .expect("Failed to create UNSUPPORTED_KEYS_TOTAL metric - this should never happen")
});

static LAST_SUCCESSFUL_SYNC: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "vault_cred_sync_last_successful_sync_timestamp_seconds",
        "Unix time of the last sync cycle that attempted every entry, including cycles with failed entries",
    )
    .expect("Failed to create LAST_SUCCESSFUL_SYNC metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails if called twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(CYCLES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CYCLE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CYCLES_UNCHANGED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CYCLE_DURATION.clone()))?;
    REGISTRY.register(Box::new(CREDENTIALS_WRITTEN_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CREDENTIAL_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UNSUPPORTED_KEYS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LAST_SUCCESSFUL_SYNC.clone()))?;

    Ok(())
}

pub fn increment_cycles() {
    CYCLES_TOTAL.inc();
}

/// `stage` is `source` or `auth`
pub fn increment_cycle_errors(stage: &str) {
    CYCLE_ERRORS_TOTAL.with_label_values(&[stage]).inc();
}

pub fn increment_cycles_unchanged() {
    CYCLES_UNCHANGED_TOTAL.inc();
}

pub fn observe_cycle_duration(duration: f64) {
    CYCLE_DURATION.observe(duration);
}

pub fn increment_credentials_written(credential_type: &str) {
    CREDENTIALS_WRITTEN_TOTAL
        .with_label_values(&[credential_type])
        .inc();
}

pub fn increment_credential_failures(credential_type: &str, reason: &str) {
    CREDENTIAL_FAILURES_TOTAL
        .with_label_values(&[credential_type, reason])
        .inc();
}

pub fn increment_unsupported_keys() {
    UNSUPPORTED_KEYS_TOTAL.inc();
}

pub fn set_last_successful_sync(unix_seconds: i64) {
    LAST_SUCCESSFUL_SYNC.set(unix_seconds);
}
