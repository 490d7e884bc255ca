//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use bidscout_core::{system_clock, DateRangeToken, SharedClock};
use bidscout_storage::{LmdbMedium, MemoryMedium, Namespace, StorageMedium, TtlCache, TtlPolicy};
use chrono::NaiveDate;

use crate::config::{ApiConfig, CacheBackendSetting};
use crate::error::{ApiError, ApiResult};
use crate::proxy::ProxyCache;
use crate::upstream::{OpportunitySource, UpstreamClient};

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub proxy: ProxyCache,
    pub clock: SharedClock,
    /// Range applied when a query names no dates.
    pub default_range: DateRangeToken,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(proxy: ProxyCache, clock: SharedClock) -> Self {
        Self {
            proxy,
            clock,
            default_range: DateRangeToken::default(),
            start_time: Instant::now(),
        }
    }

    /// Wire the upstream client and cache described by `config`.
    ///
    /// An unopenable cache disables caching instead of failing startup.
    pub fn from_config(config: &ApiConfig) -> ApiResult<Self> {
        let clock = system_clock();
        let upstream: Arc<dyn OpportunitySource> = Arc::new(
            UpstreamClient::from_config(config)
                .map_err(|e| ApiError::internal_error(format!("Failed to build upstream client: {}", e)))?,
        );
        if !config.has_upstream_credential() {
            tracing::warn!("upstream API key not configured; queries will fail until it is set");
        }
        let cache = open_cache(config, clock.clone());
        Ok(Self::new(ProxyCache::new(upstream, cache), clock))
    }

    /// Today's date according to the state clock.
    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }
}

fn open_cache(config: &ApiConfig, clock: SharedClock) -> Option<TtlCache> {
    let quota_bytes = (config.cache_quota_mb as u64) * 1024 * 1024;
    let medium: Arc<dyn StorageMedium> = match &config.cache_backend {
        CacheBackendSetting::Disabled => {
            tracing::info!("response cache disabled");
            return None;
        }
        CacheBackendSetting::Memory => Arc::new(MemoryMedium::new(quota_bytes)),
        CacheBackendSetting::Lmdb(path) => match LmdbMedium::open(path, config.cache_quota_mb) {
            Ok(medium) => Arc::new(medium),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to open LMDB cache, caching disabled");
                return None;
            }
        },
    };
    tracing::info!(
        medium = medium.name(),
        quota_mb = config.cache_quota_mb,
        proxy_ttl_secs = config.proxy_ttl.as_secs(),
        "response cache ready"
    );
    let policy = TtlPolicy::default().with_ttl(Namespace::Proxy, config.proxy_ttl);
    Some(TtlCache::new(medium, policy, clock))
}
