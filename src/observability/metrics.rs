//! Prometheus metrics for the reconciler.
//!
//! Provides metrics for:
//! - Reconciliation runs by outcome
//! - Timetable entries deleted
//! - Orphans found by the most recent run
//! - Run duration

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, gauge, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for the metrics endpoint.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.duration_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    let handle = builder.install_recorder().map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Convert millisecond buckets to seconds.
#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciliation Metrics
// ─────────────────────────────────────────────────────────────────────────────

/// Record a finished reconciliation run.
///
/// # Arguments
/// * `outcome` - `success`, `store_unavailable`, `timeout` or `skipped`
/// * `duration_secs` - Wall time of the run; ignored for skipped triggers
pub fn record_reconciliation_run(outcome: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("reconciliation_runs_total", "outcome" => outcome.to_string()).increment(1);
        if outcome != "skipped" {
            histogram!("reconciliation_run_duration_seconds", "outcome" => outcome.to_string())
                .record(duration_secs);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (outcome, duration_secs);
    }
}

/// Record timetable entries removed by a run.
pub fn record_reconciliation_deletions(count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("reconciliation_deletions_total").increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = count;
    }
}

/// Record how many orphans the most recent run found.
pub fn record_orphans_found(count: usize) {
    #[cfg(feature = "prometheus")]
    {
        gauge!("reconciliation_orphans_found").set(count as f64);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = count;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
