//! Prometheus Metrics Module
//!
//! Exposes scheduler metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Jobs**: submissions and terminal outcomes by status
//! - **Slots**: running and queued gauges
//! - **Latency**: job run duration
//! - **Persistence**: swallowed store failures by operation
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::job::JobStatus;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "backtest_jobs_submitted_total",
        "Total backtest jobs accepted"
    );
    describe_counter!(
        "backtest_jobs_finished_total",
        "Total backtest jobs reaching a terminal status"
    );

    describe_gauge!("backtest_jobs_running", "Jobs occupying an execution slot");
    describe_gauge!("backtest_jobs_queued", "Jobs waiting for an execution slot");

    describe_histogram!(
        "backtest_job_duration_seconds",
        "Wall-clock time from job start to terminal status"
    );

    describe_counter!(
        "backtest_persistence_failures_total",
        "Store operations that failed and were swallowed"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Store operation labels.
#[derive(Debug, Clone, Copy)]
pub enum StoreOperation {
    /// Index load at startup.
    Load,
    /// Index overwrite.
    Save,
    /// Per-job artifact write.
    Artifact,
}

impl StoreOperation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Save => "save",
            Self::Artifact => "artifact",
        }
    }
}

/// Record an accepted submission.
pub fn record_job_submitted() {
    counter!("backtest_jobs_submitted_total").increment(1);
}

/// Record a job reaching a terminal status.
pub fn record_job_finished(status: JobStatus) {
    counter!(
        "backtest_jobs_finished_total",
        "status" => status.as_str()
    )
    .increment(1);
}

/// Update slot gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_slot_gauges(running: usize, queued: usize) {
    gauge!("backtest_jobs_running").set(running as f64);
    gauge!("backtest_jobs_queued").set(queued as f64);
}

/// Record how long a job held its slot.
pub fn record_job_duration(status: JobStatus, duration: Duration) {
    histogram!(
        "backtest_job_duration_seconds",
        "status" => status.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Record a swallowed store failure.
pub fn record_persistence_failure(operation: StoreOperation) {
    counter!(
        "backtest_persistence_failures_total",
        "operation" => operation.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
