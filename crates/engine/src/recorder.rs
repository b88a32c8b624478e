//! Outcome recording.
//!
//! Every component reports its outcomes through an [`OutcomeRecorder`]: a
//! fire-and-forget sink of named counters and gauges. Recording never fails
//! the caller.
//!
//! - [`MetricsRecorder`]: forwards to the global `metrics` facade (Prometheus in the daemon)
//! - [`MemoryRecorder`]: keeps values in memory for tests and inspection

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Mutex;
use std::time::Instant;

use canary_core::metrics::{CallMetrics, UNCATEGORIZED_ERRORS_TOTAL};
use tracing::{error, warn};

/// Sink of named counters and gauges.
pub trait OutcomeRecorder: Send + Sync + 'static {
    /// Increments a counter by one.
    fn increment(&self, name: &'static str);

    /// Sets a gauge to `value`.
    fn set_gauge(&self, name: &'static str, value: f64);
}

/// Recorder backed by the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsRecorder;

impl OutcomeRecorder for MetricsRecorder {
    fn increment(&self, name: &'static str) {
        metrics::counter!(name).increment(1);
    }

    fn set_gauge(&self, name: &'static str, value: f64) {
        metrics::gauge!(name).set(value);
    }
}

/// In-memory recorder.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    counters: Mutex<HashMap<&'static str, u64>>,
    gauges: Mutex<HashMap<&'static str, f64>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counter value (0 if never incremented).
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .map(|c| c.get(name).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Current gauge value, if ever set.
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges
            .lock()
            .ok()
            .and_then(|g| g.get(name).copied())
    }

    /// Names from `names` whose counter is non-zero.
    pub fn nonzero<'a>(&self, names: &[&'a str]) -> Vec<&'a str> {
        names
            .iter()
            .copied()
            .filter(|name| self.counter(name) > 0)
            .collect()
    }
}

impl OutcomeRecorder for MemoryRecorder {
    fn increment(&self, name: &'static str) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(name).or_insert(0) += 1;
        }
    }

    fn set_gauge(&self, name: &'static str, value: f64) {
        if let Ok(mut gauges) = self.gauges.lock() {
            gauges.insert(name, value);
        }
    }
}

/// Runs `call` and records its count, latency and failure under `metrics`.
pub async fn metered<T, E, F>(
    recorder: &dyn OutcomeRecorder,
    metrics: CallMetrics,
    call: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    recorder.increment(metrics.count);
    let start = Instant::now();
    let result = call.await;
    recorder.set_gauge(metrics.latency_ms, start.elapsed().as_millis() as f64);
    if let Err(e) = &result {
        recorder.increment(metrics.errors);
        warn!(metric = metrics.count, error = %e, "call failed");
    }
    result
}

/// Records an uncategorized anomaly and logs it with a captured backtrace.
pub fn uncategorized(recorder: &dyn OutcomeRecorder, context: &str, detail: impl Display) {
    recorder.increment(UNCATEGORIZED_ERRORS_TOTAL);
    let backtrace = Backtrace::force_capture();
    error!(context, detail = %detail, backtrace = %backtrace, "uncategorized error");
}
