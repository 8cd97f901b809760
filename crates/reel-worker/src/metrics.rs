//! Prometheus metrics for the render worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_TOTAL: &str = "reel_jobs_total";
    pub const JOBS_IN_FLIGHT: &str = "reel_jobs_in_flight";
    pub const STAGE_FAILURES_TOTAL: &str = "reel_stage_failures_total";
    pub const STAGE_DURATION_SECONDS: &str = "reel_stage_duration_seconds";
    pub const DOWNLOADS_RETRIED_TOTAL: &str = "reel_downloads_retried_total";
    pub const RETRIES_PROMOTED_TOTAL: &str = "reel_retries_promoted_total";
    pub const JOBS_CLAIMED_TOTAL: &str = "reel_jobs_claimed_total";
}

/// Install the global recorder and serve `/metrics` on `port`.
pub fn install_exporter(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()
}

/// Record how a job attempt ended: `success`, `retried` or `dead_lettered`.
pub fn record_job_outcome(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::JOBS_TOTAL, &labels).increment(1);
}

pub fn record_stage_failure(stage: &str, kind: &str) {
    let labels = [("stage", stage.to_string()), ("kind", kind.to_string())];
    counter!(names::STAGE_FAILURES_TOTAL, &labels).increment(1);
}

pub fn record_stage_duration(stage: &str, duration_secs: f64) {
    let labels = [("stage", stage.to_string())];
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_download_retry() {
    counter!(names::DOWNLOADS_RETRIED_TOTAL).increment(1);
}

pub fn record_retries_promoted(count: usize) {
    counter!(names::RETRIES_PROMOTED_TOTAL).increment(count as u64);
}

pub fn record_jobs_claimed(count: usize) {
    counter!(names::JOBS_CLAIMED_TOTAL).increment(count as u64);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}
