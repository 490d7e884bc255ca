//! Cache entries, namespaces and their TTL classes.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use bidscout_core::Timestamp;
use serde::{Deserialize, Serialize};

/// An isolated logical partition of the cache.
///
/// Identical string keys in different namespaces never collide. Each
/// namespace carries its own TTL class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Individual opportunity records and result pages on the client.
    Opportunities,
    /// Search-result summaries.
    Searches,
    /// Slow-changing reference data.
    Metadata,
    /// Upstream responses held by the proxy.
    Proxy,
}

impl Namespace {
    pub const ALL: [Namespace; 4] = [
        Namespace::Opportunities,
        Namespace::Searches,
        Namespace::Metadata,
        Namespace::Proxy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Opportunities => "opportunities",
            Namespace::Searches => "searches",
            Namespace::Metadata => "metadata",
            Namespace::Proxy => "proxy",
        }
    }

    /// Default time-to-live for entries in this namespace.
    pub fn default_ttl(&self) -> Duration {
        match self {
            Namespace::Opportunities => Duration::from_secs(24 * 60 * 60),
            Namespace::Searches => Duration::from_secs(12 * 60 * 60),
            Namespace::Metadata => Duration::from_secs(7 * 24 * 60 * 60),
            Namespace::Proxy => Duration::from_secs(60 * 60),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-namespace TTL configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    ttls: HashMap<Namespace, Duration>,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            ttls: Namespace::ALL.iter().map(|ns| (*ns, ns.default_ttl())).collect(),
        }
    }
}

impl TtlPolicy {
    /// Override the TTL for one namespace.
    pub fn with_ttl(mut self, namespace: Namespace, ttl: Duration) -> Self {
        self.ttls.insert(namespace, ttl);
        self
    }

    pub fn ttl(&self, namespace: Namespace) -> Duration {
        self.ttls.get(&namespace).copied().unwrap_or_else(|| namespace.default_ttl())
    }
}

/// One cached payload plus its access bookkeeping.
///
/// `stored_at <= last_accessed` and `access_count >= 1` hold for every entry
/// produced by the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: serde_json::Value,
    pub stored_at: Timestamp,
    pub last_accessed: Timestamp,
    pub access_count: u64,
    pub size_bytes: u64,
}

impl CacheEntry {
    pub(crate) fn new(key: String, payload: serde_json::Value, size_bytes: u64, now: Timestamp) -> Self {
        Self {
            key,
            payload,
            stored_at: now,
            last_accessed: now,
            access_count: 1,
            size_bytes,
        }
    }

    /// How long ago the entry was stored. Zero if the clock went backwards.
    pub fn age(&self, now: Timestamp) -> Duration {
        (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Expired once `now - stored_at` strictly exceeds `ttl`.
    pub fn is_expired(&self, ttl: Duration, now: Timestamp) -> bool {
        self.age(now) > ttl
    }

    pub(crate) fn touch(&mut self, now: Timestamp) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = now.max(self.stored_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_new_entry_invariants() {
        let entry = CacheEntry::new("k".into(), serde_json::json!({"a": 1}), 7, t0());
        assert_eq!(entry.stored_at, entry.last_accessed);
        assert_eq!(entry.access_count, 1);
    }

    #[test]
    fn test_expiry_is_strict() {
        let entry = CacheEntry::new("k".into(), serde_json::Value::Null, 4, t0());
        let ttl = Duration::from_secs(60);
        assert!(!entry.is_expired(ttl, t0() + chrono::Duration::seconds(60)));
        assert!(entry.is_expired(ttl, t0() + chrono::Duration::seconds(61)));
    }

    #[test]
    fn test_touch_never_moves_before_stored_at() {
        let mut entry = CacheEntry::new("k".into(), serde_json::Value::Null, 4, t0());
        entry.touch(t0() - chrono::Duration::seconds(5));
        assert_eq!(entry.last_accessed, entry.stored_at);
        assert_eq!(entry.access_count, 2);
    }

    #[test]
    fn test_default_ttl_classes() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.ttl(Namespace::Proxy), Duration::from_secs(3600));
        assert_eq!(policy.ttl(Namespace::Metadata), Duration::from_secs(604_800));
        let custom = policy.with_ttl(Namespace::Proxy, Duration::from_secs(5));
        assert_eq!(custom.ttl(Namespace::Proxy), Duration::from_secs(5));
    }
}
