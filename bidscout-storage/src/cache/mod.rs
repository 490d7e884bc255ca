//! Namespaced TTL cache over pluggable storage media.
//!
//! The cache owns every [`CacheEntry`]; consumers refer to entries only by
//! namespace and key and mutate them only through [`TtlCache`] operations.
//!
//! Expiry is lazy: an entry whose TTL has passed is removed the next time it
//! is read. [`TtlCache::purge_expired`] exists for periodic housekeeping.

pub mod entry;
pub mod lmdb_medium;
pub mod medium;
pub mod ttl_cache;

pub use entry::{CacheEntry, Namespace, TtlPolicy};
pub use lmdb_medium::{LmdbMedium, LmdbMediumError};
pub use medium::{MediumUsage, MemoryMedium, StorageMedium};
pub use ttl_cache::{payload_size, CacheStats, TtlCache};
