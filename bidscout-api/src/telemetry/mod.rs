//! BidScout Telemetry - Observability Infrastructure
//!
//! Structured logging via `tracing` and Prometheus metrics for the proxy.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, ProxyMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracing, LogFormat, TelemetryConfig};
