//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, rejections, upstream errors)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, backend
//! - `proxy_request_duration_seconds` (histogram): latency by method, backend
//! - `proxy_rate_limited_total` (counter): requests rejected with 429
//! - `proxy_upstream_errors_total` (counter): failed backend calls by backend
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Backend label is the backend authority, or "none" when no route matched

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "proxy_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "proxy_request_duration_seconds";
    pub const RATE_LIMITED_TOTAL: &str = "proxy_rate_limited_total";
    pub const UPSTREAM_ERRORS_TOTAL: &str = "proxy_upstream_errors_total";
}

/// Backend label used when no route handled the request.
pub const NO_BACKEND: &str = "none";

/// Install the Prometheus exporter and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    describe_counter!(names::REQUESTS_TOTAL, "Total requests handled by the proxy");
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "Request duration in seconds, including middleware"
    );
    describe_counter!(names::RATE_LIMITED_TOTAL, "Requests rejected by rate limiting");
    describe_counter!(names::UPSTREAM_ERRORS_TOTAL, "Failed backend requests");

    tracing::info!(address = %addr, "Prometheus metrics endpoint started");
    Ok(())
}

pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    counter!(
        names::REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);

    histogram!(
        names::REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "backend" => backend.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

pub fn record_upstream_error(backend: String) {
    counter!(names::UPSTREAM_ERRORS_TOTAL, "backend" => backend).increment(1);
}
