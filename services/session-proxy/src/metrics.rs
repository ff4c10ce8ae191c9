//! Prometheus metrics exposition
//!
//! Installs the process-wide recorder that also collects the session layer's
//! counters (`session_refresh_total`, `session_replays_total`,
//! `session_auth_failures_total`), and defines the proxy's own:
//!
//! - `session_proxy_requests_total` (counter): labels `status`, `method`
//! - `session_proxy_request_duration_seconds` (histogram): label `status`
//! - `session_proxy_upstream_errors_total` (counter): label `error_type`

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("session_proxy_request_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Request durations render as a histogram with `_bucket` lines rather than
/// the default summary.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed proxy request with status code and HTTP method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "session_proxy_requests_total",
        "status" => status_str.clone(),
        "method" => method.to_string()
    )
    .increment(1);
    metrics::histogram!("session_proxy_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Record a request that never got an upstream answer.
pub fn record_upstream_error(error_type: &'static str) {
    metrics::counter!("session_proxy_upstream_errors_total", "error_type" => error_type)
        .increment(1);
}
