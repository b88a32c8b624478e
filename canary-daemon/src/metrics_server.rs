//! Prometheus recorder installation.
//!
//! The daemon serves the exposition itself (see [`crate::server`]) because a
//! scrape is also the canary's run trigger, so only the recorder is installed
//! here and its handle is passed to the HTTP layer.
//!
//! # Usage
//!
//! ```ignore
//! let handle = install_metrics_recorder()?;
//! // After this, all metrics::counter!() and metrics::gauge!() calls are recorded
//! let body = handle.render();
//! ```

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global metrics recorder and register metric descriptions.
///
/// This function should be called once per process.
///
/// # Errors
///
/// - Global recorder is already installed
pub fn install_metrics_recorder() -> Result<PrometheusHandle> {
    tracing::info!("installing Prometheus metrics recorder");

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    // Register metric descriptions
    canary_core::metrics::describe_all();

    Ok(handle)
}
