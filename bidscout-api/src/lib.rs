//! BidScout API - caching proxy for contract-opportunity search
//!
//! Sits between browser clients and the upstream search API. Holds the
//! upstream credential, caches transformed responses per parameter set and
//! coalesces concurrent identical queries into one upstream call.

pub mod config;
pub mod constants;
pub mod error;
pub mod proxy;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod upstream;

pub use config::{ApiConfig, CacheBackendSetting};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use proxy::{CacheOutcome, ProxyCache, ProxyResponse, ProxyStatsSnapshot};
pub use routes::create_router;
pub use state::AppState;
pub use upstream::{OpportunitySource, UpstreamClient};
