//! Namespaced key-value cache with lazy TTL expiry and access tracking.
//!
//! Every public operation is infallible from the caller's point of view:
//! medium failures are logged, counted, and reported as a miss (or as "not
//! stored"). The cache must never block the caller's primary data path.

use std::sync::{Arc, RwLock};

use bidscout_core::{CacheError, SharedClock};
use serde::{de::DeserializeOwned, Serialize};

use super::entry::{CacheEntry, Namespace, TtlPolicy};
use super::medium::{MediumUsage, StorageMedium};

/// Statistics for cache monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, including expired and unreadable entries.
    pub misses: u64,
    /// Entries dropped because their TTL had passed.
    pub expirations: u64,
    /// Successful writes.
    pub writes: u64,
    /// Entries removed by quota eviction.
    pub evictions: u64,
    /// Medium failures absorbed by the cache.
    pub errors: u64,
}

impl CacheStats {
    /// Calculate the hit rate (hits / total requests).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL cache over a [`StorageMedium`].
///
/// Cheap to clone; clones share the medium and statistics.
///
/// # Example
///
/// ```ignore
/// let cache = TtlCache::new(Arc::new(MemoryMedium::new(quota)), TtlPolicy::default(), system_clock());
/// cache.set(Namespace::Proxy, key.as_str(), &page).await;
/// if let Some(entry) = cache.get(Namespace::Proxy, key.as_str()).await {
///     // entry has already been touched
/// }
/// ```
#[derive(Clone)]
pub struct TtlCache {
    medium: Arc<dyn StorageMedium>,
    policy: TtlPolicy,
    clock: SharedClock,
    stats: Arc<RwLock<CacheStats>>,
}

impl std::fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("medium", &self.medium.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl TtlCache {
    pub fn new(medium: Arc<dyn StorageMedium>, policy: TtlPolicy, clock: SharedClock) -> Self {
        Self {
            medium,
            policy,
            clock,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }

    fn absorb(&self, op: &'static str, namespace: Namespace, key: &str, error: &CacheError) {
        tracing::warn!(
            op,
            namespace = %namespace,
            key,
            medium = self.medium.name(),
            error = %error,
            "cache operation failed; treating as miss"
        );
        self.record(|s| s.errors += 1);
    }

    /// Read and decode an entry, keeping the raw bytes for a later conditional write.
    async fn load(&self, namespace: Namespace, key: &str) -> Result<Option<(Vec<u8>, CacheEntry)>, CacheError> {
        let Some(bytes) = self.medium.read(namespace.as_str(), key).await? else {
            return Ok(None);
        };
        let entry = serde_json::from_slice(&bytes)
            .map_err(|e| CacheError::Serialization { reason: e.to_string() })?;
        Ok(Some((bytes, entry)))
    }

    async fn store(&self, namespace: Namespace, entry: &CacheEntry) -> Result<(), CacheError> {
        let bytes = encode(entry)?;
        self.medium.write(namespace.as_str(), &entry.key, bytes).await
    }

    /// Write access bookkeeping back only if nothing replaced or removed the
    /// entry since `original` was read. Returns whether the write landed.
    async fn store_touched(
        &self,
        namespace: Namespace,
        original: &[u8],
        entry: &CacheEntry,
    ) -> Result<bool, CacheError> {
        let bytes = encode(entry)?;
        let landed = self
            .medium
            .write_if_unchanged(namespace.as_str(), &entry.key, original, bytes)
            .await?;
        if !landed {
            tracing::debug!(
                namespace = %namespace,
                key = %entry.key,
                "entry changed during access; touch dropped"
            );
        }
        Ok(landed)
    }

    /// Look up a live entry and record the access.
    ///
    /// An entry whose TTL has passed is removed and reported as absent. A hit
    /// is touched exactly once (access count and last-access time) before it
    /// is returned; callers must not touch it again.
    pub async fn get(&self, namespace: Namespace, key: &str) -> Option<CacheEntry> {
        let (original, mut entry) = match self.load(namespace, key).await {
            Ok(Some(loaded)) => loaded,
            Ok(None) => {
                self.record(|s| s.misses += 1);
                return None;
            }
            Err(e) => {
                self.absorb("get", namespace, key, &e);
                self.record(|s| s.misses += 1);
                // An undecodable entry would otherwise shadow the key forever.
                if matches!(e, CacheError::Serialization { .. }) {
                    if let Err(e) = self.medium.delete(namespace.as_str(), key).await {
                        self.absorb("delete", namespace, key, &e);
                    }
                }
                return None;
            }
        };

        let now = self.clock.now();
        if entry.is_expired(self.policy.ttl(namespace), now) {
            if let Err(e) = self.medium.delete(namespace.as_str(), key).await {
                self.absorb("expire", namespace, key, &e);
            }
            self.record(|s| {
                s.misses += 1;
                s.expirations += 1;
            });
            return None;
        }

        entry.touch(now);
        if let Err(e) = self.store_touched(namespace, &original, &entry).await {
            self.absorb("touch", namespace, key, &e);
        }
        self.record(|s| s.hits += 1);
        Some(entry)
    }

    /// Typed convenience over [`TtlCache::get`].
    ///
    /// A payload that no longer deserializes as `T` is a miss.
    pub async fn get_payload<T: DeserializeOwned>(&self, namespace: Namespace, key: &str) -> Option<T> {
        let entry = self.get(namespace, key).await?;
        match serde_json::from_value(entry.payload) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(namespace = %namespace, key, error = %e, "cached payload has unexpected shape");
                None
            }
        }
    }

    /// Create or overwrite an entry. Returns whether it was stored.
    pub async fn set<T: Serialize + ?Sized>(&self, namespace: Namespace, key: &str, payload: &T) -> bool {
        match self.try_set(namespace, key, payload).await {
            Ok(()) => true,
            Err(e) => {
                self.absorb("set", namespace, key, &e);
                false
            }
        }
    }

    pub(crate) async fn try_set<T: Serialize + ?Sized>(
        &self,
        namespace: Namespace,
        key: &str,
        payload: &T,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| CacheError::Serialization { reason: e.to_string() })?;
        let size_bytes = payload_size(&payload);
        let entry = CacheEntry::new(key.to_string(), payload, size_bytes, self.clock.now());
        self.store(namespace, &entry).await?;
        self.record(|s| s.writes += 1);
        Ok(())
    }

    /// Record an access without returning the payload.
    ///
    /// Returns `false` if the key is absent or expired, or if the entry was
    /// replaced or removed while the access was being recorded.
    pub async fn touch(&self, namespace: Namespace, key: &str) -> bool {
        let (original, mut entry) = match self.load(namespace, key).await {
            Ok(Some(loaded)) => loaded,
            Ok(None) => return false,
            Err(e) => {
                self.absorb("touch", namespace, key, &e);
                return false;
            }
        };
        let now = self.clock.now();
        if entry.is_expired(self.policy.ttl(namespace), now) {
            return false;
        }
        entry.touch(now);
        match self.store_touched(namespace, &original, &entry).await {
            Ok(landed) => landed,
            Err(e) => {
                self.absorb("touch", namespace, key, &e);
                false
            }
        }
    }

    /// Remove an entry. Returns whether something was removed.
    pub async fn remove(&self, namespace: Namespace, key: &str) -> bool {
        match self.try_remove(namespace, key).await {
            Ok(removed) => removed,
            Err(e) => {
                self.absorb("remove", namespace, key, &e);
                false
            }
        }
    }

    pub(crate) async fn try_remove(&self, namespace: Namespace, key: &str) -> Result<bool, CacheError> {
        self.medium.delete(namespace.as_str(), key).await
    }

    pub(crate) fn record_evictions(&self, count: u64) {
        self.record(|s| s.evictions += count);
    }

    /// Every entry in a namespace, expired or not, without touching any.
    async fn scan(&self, namespace: Namespace) -> Vec<CacheEntry> {
        let raw = match self.medium.scan(namespace.as_str()).await {
            Ok(raw) => raw,
            Err(e) => {
                self.absorb("scan", namespace, "*", &e);
                return Vec::new();
            }
        };
        raw.into_iter()
            .filter_map(|(key, bytes)| match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::debug!(namespace = %namespace, key, error = %e, "skipping undecodable entry");
                    None
                }
            })
            .collect()
    }

    /// All live (non-expired) keys in a namespace.
    pub async fn keys(&self, namespace: Namespace) -> Vec<String> {
        let now = self.clock.now();
        let ttl = self.policy.ttl(namespace);
        self.scan(namespace)
            .await
            .into_iter()
            .filter(|entry| !entry.is_expired(ttl, now))
            .map(|entry| entry.key)
            .collect()
    }

    /// All live entries in a namespace, without touching them.
    pub async fn entries(&self, namespace: Namespace) -> Vec<CacheEntry> {
        let now = self.clock.now();
        let ttl = self.policy.ttl(namespace);
        self.scan(namespace)
            .await
            .into_iter()
            .filter(|entry| !entry.is_expired(ttl, now))
            .collect()
    }

    /// All live entries across every namespace, without touching them.
    pub async fn all_entries(&self) -> Vec<(Namespace, CacheEntry)> {
        let mut all = Vec::new();
        for namespace in Namespace::ALL {
            all.extend(self.entries(namespace).await.into_iter().map(|e| (namespace, e)));
        }
        all
    }

    /// Remove every expired entry in every namespace. Returns how many went.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut purged = 0usize;
        for namespace in Namespace::ALL {
            let ttl = self.policy.ttl(namespace);
            for entry in self.scan(namespace).await {
                if !entry.is_expired(ttl, now) {
                    continue;
                }
                match self.medium.delete(namespace.as_str(), &entry.key).await {
                    Ok(true) => purged += 1,
                    Ok(false) => {}
                    Err(e) => self.absorb("purge", namespace, &entry.key, &e),
                }
            }
        }
        self.record(|s| s.expirations += purged as u64);
        purged
    }

    /// Raw usage of the underlying medium.
    pub async fn medium_usage(&self) -> Result<MediumUsage, CacheError> {
        self.medium.usage().await
    }
}

fn encode(entry: &CacheEntry) -> Result<Vec<u8>, CacheError> {
    serde_json::to_vec(entry).map_err(|e| CacheError::Serialization { reason: e.to_string() })
}

/// Size of a payload as it is serialized.
pub fn payload_size(payload: &serde_json::Value) -> u64 {
    serde_json::to_vec(payload).map(|b| b.len() as u64).unwrap_or(0)
}
