//! REST API Routes
//!
//! Router layout:
//! - `/api/v1/opportunities` search, summary and detail
//! - `/api/v1/organizations`, `/api/v1/set-asides` reference lists
//! - `/health`, `/health/ready`
//! - `/metrics` Prometheus scrape endpoint
//!
//! Every route is wrapped in the observability middleware and CORS layer.

pub mod health;
pub mod opportunities;
pub mod reference;

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::config::ApiConfig;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

/// Build the complete router for the proxy.
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let api_routes = Router::new()
        .nest("/opportunities", opportunities::create_router())
        .merge(reference::create_router());

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(from_fn(observability_middleware))
        .layer(build_cors_layer(config))
}

/// Build the CORS layer from ApiConfig.
///
/// In development mode (empty origins), allows all origins.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}
