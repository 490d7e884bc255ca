//! LMDB-backed storage medium.
//!
//! Uses the heed crate (Rust bindings for LMDB). Each cache namespace maps to
//! its own named database inside one environment, so keys in different
//! namespaces can never collide. The environment's map size is the quota.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use bidscout_core::CacheError;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, MdbError};

use super::medium::{MediumUsage, StorageMedium};

/// Upper bound on named databases in one environment.
const MAX_NAMESPACES: u32 = 16;

/// Error type for LMDB environment setup.
#[derive(Debug, thiserror::Error)]
pub enum LmdbMediumError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn medium_error(e: heed::Error) -> CacheError {
    CacheError::Medium {
        reason: e.to_string(),
    }
}

/// LMDB-backed medium.
///
/// # Example
///
/// ```ignore
/// let medium = LmdbMedium::open("/var/lib/bidscout/cache", 64)?;
/// let cache = TtlCache::new(Arc::new(medium), TtlPolicy::default(), system_clock());
/// ```
pub struct LmdbMedium {
    env: Env,
    databases: RwLock<HashMap<String, Database<Bytes, Bytes>>>,
}

impl LmdbMedium {
    /// Open (or create) an environment at `path` with a `max_size_mb` quota.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbMediumError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(MAX_NAMESPACES)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbMediumError::EnvOpen(e.to_string()))?;

        Ok(Self {
            env,
            databases: RwLock::new(HashMap::new()),
        })
    }

    /// Look up the database for a namespace, creating it on first use.
    fn database(&self, namespace: &str) -> Result<Database<Bytes, Bytes>, CacheError> {
        if let Some(db) = self
            .databases
            .read()
            .map_err(|_| CacheError::LockPoisoned)?
            .get(namespace)
        {
            return Ok(*db);
        }

        let mut databases = self.databases.write().map_err(|_| CacheError::LockPoisoned)?;
        if let Some(db) = databases.get(namespace) {
            return Ok(*db);
        }

        let mut wtxn = self.env.write_txn().map_err(medium_error)?;
        let db: Database<Bytes, Bytes> = self
            .env
            .create_database(&mut wtxn, Some(namespace))
            .map_err(medium_error)?;
        wtxn.commit().map_err(medium_error)?;

        databases.insert(namespace.to_string(), db);
        Ok(db)
    }

    fn known_databases(&self) -> Result<Vec<Database<Bytes, Bytes>>, CacheError> {
        Ok(self
            .databases
            .read()
            .map_err(|_| CacheError::LockPoisoned)?
            .values()
            .copied()
            .collect())
    }
}

#[async_trait]
impl StorageMedium for LmdbMedium {
    async fn read(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let db = self.database(namespace)?;
        let rtxn = self.env.read_txn().map_err(medium_error)?;
        let value = db
            .get(&rtxn, key.as_bytes())
            .map_err(medium_error)?
            .map(<[u8]>::to_vec);
        Ok(value)
    }

    async fn write(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        let db = self.database(namespace)?;
        let mut wtxn = self.env.write_txn().map_err(medium_error)?;
        let put = db.put(&mut wtxn, key.as_bytes(), &value).and_then(|_| wtxn.commit());
        match put {
            Ok(()) => Ok(()),
            Err(heed::Error::Mdb(MdbError::MapFull)) => Err(CacheError::QuotaExceeded {
                needed: (key.len() + value.len()) as u64,
                available: 0,
            }),
            Err(e) => Err(medium_error(e)),
        }
    }

    async fn write_if_unchanged(
        &self,
        namespace: &str,
        key: &str,
        expected: &[u8],
        value: Vec<u8>,
    ) -> Result<bool, CacheError> {
        let db = self.database(namespace)?;
        let mut wtxn = self.env.write_txn().map_err(medium_error)?;
        let unchanged = db
            .get(&wtxn, key.as_bytes())
            .map_err(medium_error)?
            .is_some_and(|current| current == expected);
        if !unchanged {
            wtxn.abort();
            return Ok(false);
        }
        let put = db.put(&mut wtxn, key.as_bytes(), &value).and_then(|_| wtxn.commit());
        match put {
            Ok(()) => Ok(true),
            Err(heed::Error::Mdb(MdbError::MapFull)) => Err(CacheError::QuotaExceeded {
                needed: (key.len() + value.len()) as u64,
                available: 0,
            }),
            Err(e) => Err(medium_error(e)),
        }
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        let db = self.database(namespace)?;
        let mut wtxn = self.env.write_txn().map_err(medium_error)?;
        let removed = db.delete(&mut wtxn, key.as_bytes()).map_err(medium_error)?;
        wtxn.commit().map_err(medium_error)?;
        Ok(removed)
    }

    async fn scan(&self, namespace: &str) -> Result<Vec<(String, Vec<u8>)>, CacheError> {
        let db = self.database(namespace)?;
        let rtxn = self.env.read_txn().map_err(medium_error)?;
        let mut entries = Vec::new();
        for result in db.iter(&rtxn).map_err(medium_error)? {
            match result {
                Ok((key, value)) => match std::str::from_utf8(key) {
                    Ok(key) => entries.push((key.to_string(), value.to_vec())),
                    Err(_) => tracing::warn!(namespace, "skipping non-UTF-8 key in LMDB medium"),
                },
                Err(e) => return Err(medium_error(e)),
            }
        }
        Ok(entries)
    }

    async fn usage(&self) -> Result<MediumUsage, CacheError> {
        let rtxn = self.env.read_txn().map_err(medium_error)?;
        let mut used_bytes = 0u64;
        for db in self.known_databases()? {
            for result in db.iter(&rtxn).map_err(medium_error)? {
                let (key, value) = result.map_err(medium_error)?;
                used_bytes += (key.len() + value.len()) as u64;
            }
        }
        Ok(MediumUsage {
            used_bytes,
            quota_bytes: self.env.info().map_size as u64,
        })
    }

    fn name(&self) -> &'static str {
        "lmdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, LmdbMedium) {
        let dir = TempDir::new().unwrap();
        let medium = LmdbMedium::open(dir.path(), 1).unwrap();
        (dir, medium)
    }

    #[tokio::test]
    async fn test_roundtrip_and_isolation() {
        let (_dir, medium) = open();
        medium.write("opportunities", "k", b"opp".to_vec()).await.unwrap();
        medium.write("searches", "k", b"search".to_vec()).await.unwrap();

        assert_eq!(medium.read("opportunities", "k").await.unwrap(), Some(b"opp".to_vec()));
        assert_eq!(medium.read("searches", "k").await.unwrap(), Some(b"search".to_vec()));
        assert_eq!(medium.read("metadata", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_and_scan() {
        let (_dir, medium) = open();
        medium.write("proxy", "a", b"1".to_vec()).await.unwrap();
        medium.write("proxy", "b", b"2".to_vec()).await.unwrap();
        assert!(medium.delete("proxy", "a").await.unwrap());
        assert!(!medium.delete("proxy", "a").await.unwrap());

        let scanned = medium.scan("proxy").await.unwrap();
        assert_eq!(scanned, vec![("b".to_string(), b"2".to_vec())]);
    }

    #[tokio::test]
    async fn test_write_if_unchanged_in_one_txn() {
        let (_dir, medium) = open();
        medium.write("proxy", "k", b"v1".to_vec()).await.unwrap();
        assert!(medium.write_if_unchanged("proxy", "k", b"v1", b"v1-touched".to_vec()).await.unwrap());

        medium.write("proxy", "k", b"v2".to_vec()).await.unwrap();
        assert!(!medium.write_if_unchanged("proxy", "k", b"v1-touched", b"stale".to_vec()).await.unwrap());
        assert_eq!(medium.read("proxy", "k").await.unwrap(), Some(b"v2".to_vec()));

        medium.delete("proxy", "k").await.unwrap();
        assert!(!medium.write_if_unchanged("proxy", "k", b"v2", b"stale".to_vec()).await.unwrap());
        assert_eq!(medium.read("proxy", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_usage_reports_map_size_quota() {
        let (_dir, medium) = open();
        medium.write("proxy", "abc", vec![0; 10]).await.unwrap();
        let usage = medium.usage().await.unwrap();
        assert_eq!(usage.used_bytes, 13);
        assert_eq!(usage.quota_bytes, 1024 * 1024);
    }
}
