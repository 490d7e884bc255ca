//! Prometheus Metrics Definitions
//!
//! Defines the proxy's metrics and exposes a /metrics endpoint for scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Proxy latency buckets (seconds). Upstream calls can run to the timeout.
const PROXY_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.025, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<ProxyMetrics>> = Lazy::new(ProxyMetrics::new);

/// Container for all BidScout proxy metrics.
#[derive(Clone)]
pub struct ProxyMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Proxied queries - labels: outcome (hit, miss, coalesced, error)
    pub proxy_requests_total: CounterVec,

    /// End-to-end proxy query duration
    pub proxy_request_duration_seconds: Histogram,

    /// Upstream calls - labels: status (ok, HTTP status, network, config)
    pub upstream_requests_total: CounterVec,
}

impl ProxyMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "bidscout_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "bidscout_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            proxy_requests_total: register_counter_vec!(
                "bidscout_proxy_requests_total",
                "Total number of proxied opportunity queries",
                &["outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register proxy_requests_total: {}", e)))?,

            proxy_request_duration_seconds: register_histogram!(
                "bidscout_proxy_request_duration_seconds",
                "Proxied query duration in seconds",
                PROXY_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register proxy_request_duration_seconds: {}", e)))?,

            upstream_requests_total: register_counter_vec!(
                "bidscout_upstream_requests_total",
                "Total number of calls to the upstream search API",
                &["status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register upstream_requests_total: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record one proxied query.
    pub fn record_proxy_query(&self, outcome: &str, duration_secs: f64) {
        self.proxy_requests_total.with_label_values(&[outcome]).inc();
        self.proxy_request_duration_seconds.observe(duration_secs);
    }

    pub fn record_upstream_request(&self, status: &str) {
        self.upstream_requests_total.with_label_values(&[status]).inc();
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
