//! Encrypted cookie-style key/value storage.
//!
//! Values are serialized to JSON, sealed with AES-256-GCM under a random
//! 96-bit nonce, and stored as base64 of `nonce || ciphertext`. Each cookie
//! carries an expiry. Reads never fail: an expired, missing, tampered or
//! undecryptable value reads as `None`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bidscout_core::{SharedClock, Timestamp};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ClientError, ClientResult};

const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCookie {
    value: String,
    expires_at: Timestamp,
}

/// Derive the 256-bit key: base64 of exactly 32 bytes is used as-is,
/// anything else is hashed with SHA-256.
fn derive_key(material: &str) -> [u8; 32] {
    if let Ok(bytes) = STANDARD.decode(material.trim()) {
        if let Ok(key) = <[u8; 32]>::try_from(bytes.as_slice()) {
            return key;
        }
    }
    Sha256::digest(material.as_bytes()).into()
}

pub struct CookieJar {
    cipher: Aes256Gcm,
    prefix: String,
    ttl: chrono::Duration,
    clock: SharedClock,
    path: Option<PathBuf>,
    cookies: RwLock<BTreeMap<String, StoredCookie>>,
}

impl std::fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieJar")
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .field("path", &self.path)
            .finish()
    }
}

impl CookieJar {
    /// An in-memory jar.
    pub fn new(key_material: &str, prefix: &str, ttl_days: u32, clock: SharedClock) -> ClientResult<Self> {
        let key = derive_key(key_material);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| ClientError::Encryption(e.to_string()))?;
        Ok(Self {
            cipher,
            prefix: prefix.to_string(),
            ttl: chrono::Duration::days(i64::from(ttl_days)),
            clock,
            path: None,
            cookies: RwLock::new(BTreeMap::new()),
        })
    }

    /// A jar persisted to `path`. An unreadable file starts an empty jar.
    pub fn open(
        path: impl AsRef<Path>,
        key_material: &str,
        prefix: &str,
        ttl_days: u32,
        clock: SharedClock,
    ) -> ClientResult<Self> {
        let mut jar = Self::new(key_material, prefix, ttl_days, clock)?;
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            let loaded: ClientResult<BTreeMap<String, StoredCookie>> = std::fs::read_to_string(&path)
                .map_err(ClientError::from)
                .and_then(|s| serde_json::from_str(&s).map_err(ClientError::from));
            match loaded {
                Ok(cookies) => jar.cookies = RwLock::new(cookies),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable cookie file"),
            }
        }
        jar.path = Some(path);
        Ok(jar)
    }

    fn full_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn seal(&self, plaintext: &[u8]) -> ClientResult<String> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| ClientError::Encryption(e.to_string()))?;
        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    fn open_sealed(&self, sealed: &str) -> Option<Vec<u8>> {
        let bytes = STANDARD.decode(sealed).ok()?;
        if bytes.len() <= NONCE_LEN {
            return None;
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        self.cipher.decrypt(Nonce::from_slice(nonce), ciphertext).ok()
    }

    /// Seal and store `value`, resetting its expiry.
    pub fn set<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> ClientResult<()> {
        let json = serde_json::to_vec(value)?;
        let cookie = StoredCookie {
            value: self.seal(&json)?,
            expires_at: self.clock.now() + self.ttl,
        };
        self.cookies
            .write()
            .map_err(|_| ClientError::Persistence("cookie jar lock poisoned".to_string()))?
            .insert(self.full_name(name), cookie);
        self.persist();
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let full_name = self.full_name(name);
        let cookie = self.cookies.read().ok()?.get(&full_name).cloned()?;
        if cookie.expires_at <= self.clock.now() {
            self.remove(name);
            return None;
        }
        let Some(plaintext) = self.open_sealed(&cookie.value) else {
            tracing::warn!(cookie = %full_name, "cookie failed to decrypt, ignoring");
            return None;
        };
        match serde_json::from_slice(&plaintext) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(cookie = %full_name, error = %e, "cookie holds unexpected data, ignoring");
                None
            }
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        let removed = self
            .cookies
            .write()
            .map(|mut cookies| cookies.remove(&self.full_name(name)).is_some())
            .unwrap_or(false);
        if removed {
            self.persist();
        }
        removed
    }

    /// Names of live cookies, without the prefix.
    pub fn names(&self) -> Vec<String> {
        let now = self.clock.now();
        self.cookies
            .read()
            .map(|cookies| {
                cookies
                    .iter()
                    .filter(|(_, c)| c.expires_at > now)
                    .filter_map(|(n, _)| n.strip_prefix(&self.prefix).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Write the jar to its file, if it has one. Failures are logged only.
    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let result = self
            .cookies
            .read()
            .map_err(|_| ClientError::Persistence("cookie jar lock poisoned".to_string()))
            .and_then(|cookies| serde_json::to_string(&*cookies).map_err(ClientError::from))
            .and_then(|json| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, json).map_err(ClientError::from)
            });
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist cookies");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidscout_test_utils::ManualClock;

    fn jar(clock: &ManualClock) -> CookieJar {
        CookieJar::new("test passphrase", "bidscout_", 7, clock.shared()).unwrap()
    }

    #[test]
    fn test_roundtrip_value() {
        let clock = ManualClock::at_date(2024, 6, 1);
        let jar = jar(&clock);
        jar.set("theme", "dark").unwrap();
        assert_eq!(jar.get::<String>("theme").as_deref(), Some("dark"));
        assert_eq!(jar.names(), vec!["theme".to_string()]);
    }

    #[test]
    fn test_value_is_not_stored_in_clear() {
        let clock = ManualClock::at_date(2024, 6, 1);
        let jar = jar(&clock);
        jar.set("secret", "plain-marker").unwrap();
        let stored = jar.cookies.read().unwrap().get("bidscout_secret").cloned().unwrap();
        assert!(!stored.value.contains("plain-marker"));
    }

    #[test]
    fn test_expired_cookie_reads_none() {
        let clock = ManualClock::at_date(2024, 6, 1);
        let jar = jar(&clock);
        jar.set("last_visit", &42).unwrap();
        clock.advance_secs(7 * 24 * 3600);
        assert_eq!(jar.get::<i32>("last_visit"), None);
        assert!(jar.names().is_empty());
    }

    #[test]
    fn test_wrong_key_reads_none() {
        let clock = ManualClock::at_date(2024, 6, 1);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");

        let writer = CookieJar::open(&path, "key one", "bidscout_", 7, clock.shared()).unwrap();
        writer.set("prefs", &vec![1, 2, 3]).unwrap();

        let reader = CookieJar::open(&path, "key two", "bidscout_", 7, clock.shared()).unwrap();
        assert_eq!(reader.get::<Vec<i32>>("prefs"), None);

        let same_key = CookieJar::open(&path, "key one", "bidscout_", 7, clock.shared()).unwrap();
        assert_eq!(same_key.get::<Vec<i32>>("prefs"), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_tampered_value_reads_none() {
        let clock = ManualClock::at_date(2024, 6, 1);
        let jar = jar(&clock);
        jar.set("prefs", "value").unwrap();
        {
            let mut cookies = jar.cookies.write().unwrap();
            let cookie = cookies.get_mut("bidscout_prefs").unwrap();
            cookie.value = STANDARD.encode(b"definitely not a sealed value");
        }
        assert_eq!(jar.get::<String>("prefs"), None);
    }

    #[test]
    fn test_base64_key_used_directly() {
        let raw = [7u8; 32];
        assert_eq!(derive_key(&STANDARD.encode(raw)), raw);
        assert_ne!(derive_key("short"), [0u8; 32]);
    }

    #[test]
    fn test_remove() {
        let clock = ManualClock::at_date(2024, 6, 1);
        let jar = jar(&clock);
        jar.set("a", &1).unwrap();
        assert!(jar.remove("a"));
        assert!(!jar.remove("a"));
        assert_eq!(jar.get::<i32>("a"), None);
    }
}
