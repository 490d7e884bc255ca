//! Axum Middleware for HTTP Request Tracing and Metrics

use axum::{extract::Request, middleware::Next, response::Response};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;
use tracing::{info_span, Instrument};

use super::metrics::METRICS;

/// Notice ids are opaque hex-ish tokens; numeric ids and UUIDs also show up.
static ID_SEGMENT: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^(?:[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}|\d+|[0-9a-fA-F]{16,})$").ok()
});

/// Paths whose final segment is always an identifier.
const ID_PARENTS: &[&str] = &["opportunities"];

/// Normalize path for metrics/spans, replacing identifiers with `{id}`.
///
/// Keeps Prometheus label cardinality bounded.
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let mut out = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        let after_id_parent = i > 0 && ID_PARENTS.contains(&segments[i - 1]) && *segment != "summary";
        let looks_like_id = ID_SEGMENT
            .as_ref()
            .map(|re| re.is_match(segment))
            .unwrap_or(false);
        if !segment.is_empty() && (after_id_parent || looks_like_id) {
            out.push("{id}");
        } else {
            out.push(segment);
        }
    }
    out.join("/")
}

/// Observability middleware for Axum.
///
/// Wraps every request in a span, records Prometheus metrics and logs
/// completion.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let normalized_path = normalize_path(&path);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %normalized_path,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_http_request(
            method.as_str(),
            &normalized_path,
            status.as_u16(),
            duration.as_secs_f64(),
        );
    }

    tracing::info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = duration.as_millis() as u64,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_notice_id() {
        assert_eq!(
            normalize_path("/api/v1/opportunities/abc123def"),
            "/api/v1/opportunities/{id}"
        );
    }

    #[test]
    fn test_normalize_path_summary_is_kept() {
        assert_eq!(
            normalize_path("/api/v1/opportunities/summary"),
            "/api/v1/opportunities/summary"
        );
    }

    #[test]
    fn test_normalize_path_uuid_and_numeric() {
        assert_eq!(
            normalize_path("/things/550e8400-e29b-41d4-a716-446655440000/items/12345"),
            "/things/{id}/items/{id}"
        );
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/v1/opportunities"), "/api/v1/opportunities");
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
    }
}
