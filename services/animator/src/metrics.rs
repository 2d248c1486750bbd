//! Prometheus metrics exposition
//!
//! - `generation_requests_total` (counter): label `outcome`
//! - `generation_job_duration_seconds` (histogram): label `outcome`
//! - `admission_denied_total` (counter)
//! - `generation_submissions_total` (counter): labels `candidate`, `result`;
//!   recorded by the `generation` crate per candidate attempt

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Buckets from 15s (one poll interval) to 30 minutes.
const JOB_DURATION_BUCKETS: &[f64] = &[
    15.0, 30.0, 60.0, 90.0, 120.0, 180.0, 240.0, 300.0, 450.0, 600.0, 900.0, 1200.0, 1800.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("generation_job_duration_seconds".to_string()),
            JOB_DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record the terminal outcome of one generation request.
pub fn record_request(outcome: &'static str) {
    metrics::counter!("generation_requests_total", "outcome" => outcome).increment(1);
}

/// Record time from submission to terminal poll outcome.
pub fn record_job_duration(outcome: &'static str, duration_secs: f64) {
    metrics::histogram!("generation_job_duration_seconds", "outcome" => outcome)
        .record(duration_secs);
}

pub fn record_denied() {
    metrics::counter!("admission_denied_total").increment(1);
}
