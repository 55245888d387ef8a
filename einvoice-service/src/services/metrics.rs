//! Metrics collection and Prometheus export.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder. Later calls are ignored.
pub fn init_metrics() -> anyhow::Result<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    // A concurrent caller may have won the race; either handle renders.
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

/// Current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}

/// One orchestrated submission finished with `outcome`.
pub fn record_submission(outcome: &'static str) {
    metrics::counter!("invoice_submissions_total", "outcome" => outcome).increment(1);
}

pub fn record_retry(operation: &'static str) {
    metrics::counter!("invoice_retries_total", "operation" => operation).increment(1);
}

pub fn record_authority_call(step: &'static str, result: &'static str) {
    metrics::counter!("authority_calls_total", "step" => step, "result" => result).increment(1);
}
