//! Quota-aware eviction.
//!
//! Watches aggregate usage of the cache medium and, once usage passes the
//! configured threshold, removes the least-recently-accessed fifth of all
//! entries across every namespace.

use std::sync::Arc;

use bidscout_core::CacheError;
use serde::{Deserialize, Serialize};

use crate::cache::{payload_size, Namespace, TtlCache};

/// Default usage ratio above which eviction kicks in.
pub const DEFAULT_EVICTION_THRESHOLD: f64 = 0.8;

/// Default share of entries removed per eviction pass.
pub const DEFAULT_EVICTION_FRACTION: f64 = 0.2;

/// Point-in-time usage of the storage medium. Recomputed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageUsageSnapshot {
    pub used_bytes: u64,
    pub quota_bytes: u64,
    /// 0.0 ..= 100.0 (may exceed 100 if the medium over-reports).
    pub percent_used: f64,
}

impl StorageUsageSnapshot {
    pub fn new(used_bytes: u64, quota_bytes: u64) -> Self {
        let percent_used = if quota_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / quota_bytes as f64 * 100.0
        };
        Self {
            used_bytes,
            quota_bytes,
            percent_used,
        }
    }

    /// Whether usage is strictly above `threshold` (a 0.0 ..= 1.0 ratio).
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.percent_used > threshold * 100.0
    }

    pub fn available_bytes(&self) -> u64 {
        self.quota_bytes.saturating_sub(self.used_bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionConfig {
    /// Usage ratio (0.0 ..= 1.0) above which eviction runs.
    pub threshold: f64,
    /// Share of entries removed per pass.
    pub fraction: f64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_EVICTION_THRESHOLD,
            fraction: DEFAULT_EVICTION_FRACTION,
        }
    }
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Entries considered.
    pub candidates: usize,
    /// Entries the pass targeted (`floor(fraction * candidates)`).
    pub targeted: usize,
    /// Entries actually removed.
    pub evicted: usize,
    /// Entries whose removal failed and were skipped.
    pub failed: usize,
}

/// Monitors usage and evicts least-recently-accessed entries.
#[derive(Debug, Clone)]
pub struct EvictionManager {
    cache: TtlCache,
    config: EvictionConfig,
}

impl EvictionManager {
    pub fn new(cache: TtlCache, config: EvictionConfig) -> Self {
        Self { cache, config }
    }

    pub fn config(&self) -> &EvictionConfig {
        &self.config
    }

    /// Current usage of the medium backing the cache.
    pub async fn check_usage(&self) -> Result<StorageUsageSnapshot, CacheError> {
        let usage = self.cache.medium_usage().await?;
        Ok(StorageUsageSnapshot::new(usage.used_bytes, usage.quota_bytes))
    }

    pub fn is_over_threshold(&self, snapshot: &StorageUsageSnapshot) -> bool {
        snapshot.exceeds(self.config.threshold)
    }

    /// Evict if usage is above the threshold. Returns `None` when no pass ran.
    pub async fn evict_if_needed(&self) -> Result<Option<EvictionReport>, CacheError> {
        let snapshot = self.check_usage().await?;
        if !self.is_over_threshold(&snapshot) {
            tracing::debug!(
                percent_used = snapshot.percent_used,
                threshold = self.config.threshold,
                "storage usage below eviction threshold"
            );
            return Ok(None);
        }
        tracing::info!(
            used_bytes = snapshot.used_bytes,
            quota_bytes = snapshot.quota_bytes,
            percent_used = snapshot.percent_used,
            "storage usage above threshold, evicting"
        );
        Ok(Some(self.evict_least_recent().await))
    }

    /// Remove the least-recently-accessed `floor(fraction * N)` entries.
    ///
    /// Ranking is by `last_accessed` ascending, ties broken by `stored_at`.
    /// A failed removal is logged and skipped; the pass always continues.
    pub async fn evict_least_recent(&self) -> EvictionReport {
        let mut entries = self.cache.all_entries().await;
        entries.sort_by(|(_, a), (_, b)| {
            a.last_accessed
                .cmp(&b.last_accessed)
                .then_with(|| a.stored_at.cmp(&b.stored_at))
        });

        let candidates = entries.len();
        let targeted = (candidates as f64 * self.config.fraction).floor() as usize;
        let mut report = EvictionReport {
            candidates,
            targeted,
            ..Default::default()
        };

        for (namespace, entry) in entries.into_iter().take(targeted) {
            match self.cache.try_remove(namespace, &entry.key).await {
                Ok(_) => report.evicted += 1,
                Err(e) => {
                    tracing::warn!(
                        namespace = %namespace,
                        key = %entry.key,
                        error = %e,
                        "failed to evict entry, skipping"
                    );
                    report.failed += 1;
                }
            }
        }

        self.cache.record_evictions(report.evicted as u64);
        tracing::info!(
            candidates = report.candidates,
            evicted = report.evicted,
            failed = report.failed,
            "eviction pass complete"
        );
        report
    }

    /// Store an entry, evicting first if the write would push usage past quota.
    ///
    /// If the medium still rejects the write for quota reasons, one more
    /// eviction pass runs and the write is retried once.
    pub async fn set_with_headroom<T: Serialize + ?Sized>(
        &self,
        namespace: Namespace,
        key: &str,
        payload: &T,
    ) -> bool {
        let estimated = serde_json::to_value(payload).map(|v| payload_size(&v)).unwrap_or(0);
        if let Ok(snapshot) = self.check_usage().await {
            if estimated > snapshot.available_bytes() {
                self.evict_least_recent().await;
            }
        }

        match self.cache.try_set(namespace, key, payload).await {
            Ok(()) => true,
            Err(CacheError::QuotaExceeded { .. }) => {
                self.evict_least_recent().await;
                self.cache.set(namespace, key, payload).await
            }
            Err(e) => {
                tracing::warn!(namespace = %namespace, key, error = %e, "cache write failed");
                false
            }
        }
    }
}

/// Shared handle used by schedulers.
pub type SharedEvictionManager = Arc<EvictionManager>;
