//! API Configuration Module
//!
//! Configuration is loaded from environment variables with defaults suitable
//! for local development. A missing upstream credential does not prevent
//! startup; it fails each query instead.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::constants::{
    DEFAULT_CACHE_QUOTA_MB, DEFAULT_CORS_MAX_AGE_SECS, DEFAULT_UPSTREAM_BASE_URL,
    DEFAULT_UPSTREAM_TIMEOUT_SECS,
};

// ============================================================================
// CACHE BACKEND SELECTION
// ============================================================================

/// Where the proxy keeps cached upstream responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendSetting {
    /// No caching; every query goes upstream (still coalesced).
    Disabled,
    /// Process-local memory.
    Memory,
    /// LMDB environment at the given directory.
    Lmdb(PathBuf),
}

impl CacheBackendSetting {
    /// Parse a cache connection string.
    ///
    /// Accepts `memory://`, `memory`, `lmdb:///abs/path` and `lmdb:relative/path`.
    /// Anything else disables caching with a warning rather than failing startup.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return CacheBackendSetting::Disabled;
        };
        if raw == "memory" || raw.starts_with("memory:") {
            return CacheBackendSetting::Memory;
        }
        if let Some(path) = raw.strip_prefix("lmdb://").or_else(|| raw.strip_prefix("lmdb:")) {
            if !path.is_empty() {
                return CacheBackendSetting::Lmdb(PathBuf::from(path));
            }
        }
        tracing::warn!(cache_url = raw, "unrecognised cache URL, caching disabled");
        CacheBackendSetting::Disabled
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// Proxy server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Upstream base URL; `/search` is appended for queries.
    pub upstream_base_url: String,

    /// Upstream API key. Never logged.
    pub upstream_api_key: Option<SecretString>,

    /// Client-side timeout for one upstream call.
    pub upstream_timeout: Duration,

    /// Cache backend for upstream responses.
    pub cache_backend: CacheBackendSetting,

    /// Quota of the cache medium.
    pub cache_quota_mb: usize,

    /// TTL of cached upstream responses.
    pub proxy_ttl: Duration,

    /// Allowed CORS origins. Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            upstream_api_key: None,
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            cache_backend: CacheBackendSetting::Memory,
            cache_quota_mb: DEFAULT_CACHE_QUOTA_MB,
            proxy_ttl: Duration::from_secs(60 * 60),
            cors_origins: Vec::new(),
            cors_max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `BIDSCOUT_UPSTREAM_API_KEY`: upstream credential (required for queries)
    /// - `BIDSCOUT_UPSTREAM_BASE_URL`: upstream base URL
    /// - `BIDSCOUT_UPSTREAM_TIMEOUT_SECS`: upstream timeout (default: 10)
    /// - `BIDSCOUT_CACHE_URL`: `memory://` or `lmdb:///path` (absent = no caching)
    /// - `BIDSCOUT_CACHE_QUOTA_MB`: cache quota (default: 64)
    /// - `BIDSCOUT_PROXY_TTL_SECS`: cached response lifetime (default: 3600)
    /// - `BIDSCOUT_CORS_ORIGINS`: comma-separated allowed origins (empty = allow all)
    /// - `BIDSCOUT_CORS_MAX_AGE_SECS`: preflight cache duration (default: 86400)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let upstream_api_key = lookup("BIDSCOUT_UPSTREAM_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        let cors_origins = lookup("BIDSCOUT_CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            upstream_base_url: lookup("BIDSCOUT_UPSTREAM_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.upstream_base_url),
            upstream_api_key,
            upstream_timeout: lookup("BIDSCOUT_UPSTREAM_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.upstream_timeout),
            cache_backend: CacheBackendSetting::parse(lookup("BIDSCOUT_CACHE_URL").as_deref()),
            cache_quota_mb: lookup("BIDSCOUT_CACHE_QUOTA_MB")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cache_quota_mb),
            proxy_ttl: lookup("BIDSCOUT_PROXY_TTL_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.proxy_ttl),
            cors_origins,
            cors_max_age_secs: lookup("BIDSCOUT_CORS_MAX_AGE_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cors_max_age_secs),
        }
    }

    /// Whether the upstream credential is present.
    pub fn has_upstream_credential(&self) -> bool {
        self.upstream_api_key.is_some()
    }
}
