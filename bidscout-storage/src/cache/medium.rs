//! Storage media backing the TTL cache.
//!
//! A medium is a dumb namespaced byte store that can report how much of its
//! quota is in use. TTLs, access tracking and eviction policy live above it.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bidscout_core::CacheError;

/// Raw usage figures reported by a medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediumUsage {
    pub used_bytes: u64,
    pub quota_bytes: u64,
}

/// Namespaced persistent byte store.
///
/// Implementations must be safe to call concurrently; individual operations
/// are independent and need not be transactional across keys.
#[async_trait]
pub trait StorageMedium: Send + Sync {
    /// Read the raw value stored under `key` in `namespace`.
    async fn read(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Create or overwrite a value.
    ///
    /// Returns `CacheError::QuotaExceeded` if the write would not fit.
    async fn write(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), CacheError>;

    /// Overwrite a value only if it still holds exactly `expected`.
    ///
    /// Returns `false` without writing when the key is gone or holds other
    /// bytes. The comparison and the write happen atomically.
    async fn write_if_unchanged(
        &self,
        namespace: &str,
        key: &str,
        expected: &[u8],
        value: Vec<u8>,
    ) -> Result<bool, CacheError>;

    /// Remove a value. Returns whether anything was removed.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheError>;

    /// Every key/value pair currently held in `namespace`.
    async fn scan(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, CacheError>;

    /// Current usage against the medium's quota.
    async fn usage(&self) -> Result<MediumUsage, CacheError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// In-process medium with a byte quota.
///
/// Usage counts key and value bytes, which is what browser-style storage
/// quotas measure as well.
#[derive(Debug)]
pub struct MemoryMedium {
    quota_bytes: u64,
    stores: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryMedium {
    pub fn new(quota_bytes: u64) -> Self {
        Self {
            quota_bytes,
            stores: RwLock::new(HashMap::new()),
        }
    }

    fn used_bytes(stores: &HashMap<String, HashMap<String, Vec<u8>>>) -> u64 {
        stores
            .values()
            .flat_map(|store| store.iter())
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }

    fn check_quota(
        &self,
        stores: &HashMap<String, HashMap<String, Vec<u8>>>,
        namespace: &str,
        key: &str,
        value: &[u8],
    ) -> Result<(), CacheError> {
        let used = Self::used_bytes(stores);
        let replaced = stores
            .get(namespace)
            .and_then(|store| store.get(key))
            .map(|old| (key.len() + old.len()) as u64)
            .unwrap_or(0);
        let needed = (key.len() + value.len()) as u64;
        let available = self.quota_bytes.saturating_sub(used.saturating_sub(replaced));
        if needed > available {
            return Err(CacheError::QuotaExceeded { needed, available });
        }
        Ok(())
    }
}

#[async_trait]
impl StorageMedium for MemoryMedium {
    async fn read(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let stores = self.stores.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(stores.get(namespace).and_then(|store| store.get(key)).cloned())
    }

    async fn write(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        let mut stores = self.stores.write().map_err(|_| CacheError::LockPoisoned)?;
        self.check_quota(&stores, namespace, key, &value)?;
        stores
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn write_if_unchanged(
        &self,
        namespace: &str,
        key: &str,
        expected: &[u8],
        value: Vec<u8>,
    ) -> Result<bool, CacheError> {
        let mut stores = self.stores.write().map_err(|_| CacheError::LockPoisoned)?;
        let unchanged = stores
            .get(namespace)
            .and_then(|store| store.get(key))
            .is_some_and(|current| current.as_slice() == expected);
        if !unchanged {
            return Ok(false);
        }
        self.check_quota(&stores, namespace, key, &value)?;
        if let Some(store) = stores.get_mut(namespace) {
            store.insert(key.to_string(), value);
        }
        Ok(true)
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        let mut stores = self.stores.write().map_err(|_| CacheError::LockPoisoned)?;
        Ok(stores
            .get_mut(namespace)
            .map(|store| store.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn scan(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, CacheError> {
        let stores = self.stores.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(stores
            .get(namespace)
            .map(|store| store.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn usage(&self) -> Result<MediumUsage, CacheError> {
        let stores = self.stores.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(MediumUsage {
            used_bytes: Self::used_bytes(&stores),
            quota_bytes: self.quota_bytes,
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
