//! Default values shared across the API crate.

// ============================================================================
// SERVER
// ============================================================================

/// Port the proxy listens on when neither `PORT` nor `BIDSCOUT_API_PORT` is set.
pub const DEFAULT_PORT: u16 = 3001;

/// Bind host when `BIDSCOUT_API_BIND` is unset.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// CORS preflight cache duration.
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 86_400;

// ============================================================================
// UPSTREAM
// ============================================================================

/// Base URL of the upstream opportunity-search API. `/search` is appended.
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://api.sam.gov/opportunities/v2";

/// Client-side timeout for one upstream call.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// CACHE
// ============================================================================

/// Quota for the proxy's cache medium.
pub const DEFAULT_CACHE_QUOTA_MB: usize = 64;

/// Page size used when deriving reference lists (organizations, set-asides).
pub const REFERENCE_LIST_PAGE_SIZE: u32 = 100;
