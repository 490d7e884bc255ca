//! BidScout Storage - Cache, Media and Eviction
//!
//! - [`cache`]: namespaced TTL cache with access tracking, backed by an
//!   in-memory or LMDB medium
//! - [`eviction`]: quota monitoring and least-recently-accessed eviction
//! - [`bounded`]: ring logs for telemetry records

pub mod bounded;
pub mod cache;
pub mod eviction;

pub use bounded::BoundedLog;
pub use cache::{
    payload_size, CacheEntry, CacheStats, LmdbMedium, LmdbMediumError, MediumUsage, MemoryMedium,
    Namespace, StorageMedium, TtlCache, TtlPolicy,
};
pub use eviction::{
    EvictionConfig, EvictionManager, EvictionReport, SharedEvictionManager, StorageUsageSnapshot,
    DEFAULT_EVICTION_FRACTION, DEFAULT_EVICTION_THRESHOLD,
};
