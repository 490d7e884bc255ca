//! Health Check Endpoints
//!
//! - /health - Liveness, always `{"status": "ok"}`
//! - /health/ready - Readiness with upstream credential and cache status
//!
//! A missing upstream credential does not make the liveness check fail.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::proxy::{ProxyCache, ProxyStatsSnapshot};
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub upstream_configured: bool,
    pub caching_enabled: bool,
    pub version: String,
    pub uptime_seconds: u64,
    pub proxy: ProxyStatsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit_rate: Option<f64>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// GET /health/ready - 503 until the upstream credential is configured.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let proxy: &ProxyCache = &state.proxy;
    let upstream_configured = proxy.upstream_configured();

    let response = ReadinessResponse {
        status: if upstream_configured { "ok" } else { "degraded" }.to_string(),
        upstream_configured,
        caching_enabled: proxy.caching_enabled(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        proxy: proxy.stats(),
        cache_hit_rate: proxy.cache().map(|c| c.stats().hit_rate()),
    };

    let status_code = if upstream_configured {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create health check router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(health))
        .route("/ready", get(readiness))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let json = serde_json::to_value(HealthResponse {
            status: "ok".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"status": "ok"}));
    }

    #[test]
    fn test_readiness_omits_hit_rate_without_cache() {
        let response = ReadinessResponse {
            status: "degraded".to_string(),
            upstream_configured: false,
            caching_enabled: false,
            version: "0.1.0".to_string(),
            uptime_seconds: 5,
            proxy: ProxyStatsSnapshot::default(),
            cache_hit_rate: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("cache_hit_rate"));
        assert!(json.contains("\"uptime_seconds\":5"));
    }
}
