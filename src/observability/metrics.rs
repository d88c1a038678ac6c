//! Prometheus metrics for the retention jobs.
//!
//! Recording functions compile to no-ops without the `prometheus` feature.

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Initialize the metrics system with the given configuration.
///
/// With `[observability.metrics.prometheus]` configured, this also starts
/// the scrape endpoint, so it must be called from inside a Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &config.duration_buckets_secs,
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    match &config.prometheus {
        Some(prometheus) => {
            let addr: std::net::SocketAddr = prometheus
                .listen_addr
                .parse()
                .map_err(|e| MetricsError::Setup(format!("invalid listen_addr: {e}")))?;
            builder.with_http_listener(addr).install()?;
            tracing::info!(%addr, "Prometheus scrape endpoint listening");
        }
        None => {
            builder.install_recorder()?;
        }
    }

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record a finished job run.
///
/// * `job` - "archiver" or "pruner"
/// * `status` - "success", "partial" or "error"
pub fn record_job_run(job: &str, status: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "chatvault_job_runs_total",
            "job" => job.to_string(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!("chatvault_job_duration_seconds", "job" => job.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (job, status, duration_secs);
    }
}

/// Record messages moved out of the record store.
///
/// * `outcome` - "archived", "deleted", "skipped_malformed"
pub fn record_archived_messages(outcome: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "chatvault_archive_messages_total",
            "outcome" => outcome.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (outcome, count);
    }
}

/// Record per-conversation archival outcomes.
///
/// * `outcome` - "succeeded", "failed", "skipped_locked"
pub fn record_archive_conversations(outcome: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "chatvault_archive_conversations_total",
            "outcome" => outcome.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (outcome, count);
    }
}

/// Record archive blobs written to cold storage.
pub fn record_blobs_written(count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("chatvault_archive_blobs_written_total").increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = count;
    }
}

/// Record pruning outcomes.
///
/// * `outcome` - "deleted", "failed"
pub fn record_pruned_objects(outcome: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "chatvault_pruned_objects_total",
            "outcome" => outcome.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (outcome, count);
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
