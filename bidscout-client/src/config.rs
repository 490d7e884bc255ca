//! Configuration loading for the BidScout client.
//!
//! The proxy URL, data directory and encryption key are required. Everything
//! else has a default.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bidscout_storage::{Namespace, TtlPolicy};

use crate::jobs::cleanup::{
    DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_MAX_ACTIVITY, DEFAULT_MAX_ERRORS, DEFAULT_MAX_METRICS,
    DEFAULT_MAX_OFFLINE, DEFAULT_MAX_RECENT_SEARCHES,
};

pub const DEFAULT_COOKIE_PREFIX: &str = "bidscout_";
pub const DEFAULT_COOKIE_TTL_DAYS: u32 = 7;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CLIENT_QUOTA_MB: usize = 50;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub proxy_base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    pub data_dir: PathBuf,
    /// Base64 of 32 bytes, or any passphrase (stretched with SHA-256).
    pub encryption_key: String,
    #[serde(default = "default_cookie_prefix")]
    pub cookie_prefix: String,
    #[serde(default = "default_cookie_ttl_days")]
    pub cookie_ttl_days: u32,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub cleanup: CleanupSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheSettings {
    pub opportunities_ttl_secs: u64,
    pub searches_ttl_secs: u64,
    pub metadata_ttl_secs: u64,
    pub quota_mb: usize,
    /// Keep the cache in LMDB under `data_dir/cache`; otherwise in memory.
    pub persistent: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            opportunities_ttl_secs: Namespace::Opportunities.default_ttl().as_secs(),
            searches_ttl_secs: Namespace::Searches.default_ttl().as_secs(),
            metadata_ttl_secs: Namespace::Metadata.default_ttl().as_secs(),
            quota_mb: DEFAULT_CLIENT_QUOTA_MB,
            persistent: true,
        }
    }
}

impl CacheSettings {
    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy::default()
            .with_ttl(Namespace::Opportunities, Duration::from_secs(self.opportunities_ttl_secs))
            .with_ttl(Namespace::Searches, Duration::from_secs(self.searches_ttl_secs))
            .with_ttl(Namespace::Metadata, Duration::from_secs(self.metadata_ttl_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CleanupSettings {
    pub interval_secs: u64,
    pub threshold: f64,
    pub max_errors: usize,
    pub max_metrics: usize,
    pub max_activity: usize,
    pub max_offline: usize,
    pub max_recent_searches: usize,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            threshold: bidscout_storage::DEFAULT_EVICTION_THRESHOLD,
            max_errors: DEFAULT_MAX_ERRORS,
            max_metrics: DEFAULT_MAX_METRICS,
            max_activity: DEFAULT_MAX_ACTIVITY,
            max_offline: DEFAULT_MAX_OFFLINE,
            max_recent_searches: DEFAULT_MAX_RECENT_SEARCHES,
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_cookie_prefix() -> String {
    DEFAULT_COOKIE_PREFIX.to_string()
}

fn default_cookie_ttl_days() -> u32 {
    DEFAULT_COOKIE_TTL_DAYS
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or BIDSCOUT_CLIENT_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "proxy_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "data_dir",
                reason: "must not be empty".to_string(),
            });
        }
        if self.encryption_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "encryption_key",
                reason: "must not be empty".to_string(),
            });
        }
        if self.cookie_ttl_days == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cookie_ttl_days",
                reason: "must be > 0".to_string(),
            });
        }
        if self.cache.quota_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.quota_mb",
                reason: "must be > 0".to_string(),
            });
        }
        if self.cleanup.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cleanup.interval_secs",
                reason: "must be > 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.cleanup.threshold) {
            return Err(ConfigError::InvalidValue {
                field: "cleanup.threshold",
                reason: "must be between 0.0 and 1.0".to_string(),
            });
        }
        if self.cleanup.max_metrics == 0 || self.cleanup.max_errors == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cleanup",
                reason: "log limits must be > 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn telemetry_path(&self) -> PathBuf {
        self.data_dir.join("telemetry.json")
    }

    pub fn cookie_path(&self) -> PathBuf {
        self.data_dir.join("cookies.json")
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("BIDSCOUT_CLIENT_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
proxy_base_url = "http://localhost:3001"
data_dir = "/tmp/bidscout"
encryption_key = "correct horse battery staple"
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = ClientConfig::from_toml(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.cookie_prefix, "bidscout_");
        assert_eq!(config.cookie_ttl_days, 7);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.cleanup.interval_secs, 3600);
        assert_eq!(config.cleanup.max_metrics, 100);
        assert_eq!(config.cleanup.max_recent_searches, 10);
        assert_eq!(config.cache.searches_ttl_secs, 12 * 3600);
        assert_eq!(config.telemetry_path(), PathBuf::from("/tmp/bidscout/telemetry.json"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = format!("{}\nmystery = true\n", MINIMAL);
        assert!(matches!(ClientConfig::from_toml(&toml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_cleanup_table_overrides() {
        let toml = format!("{}\n[cleanup]\ninterval_secs = 60\nmax_metrics = 5\n", MINIMAL);
        let config = ClientConfig::from_toml(&toml).unwrap();
        assert_eq!(config.cleanup.interval_secs, 60);
        assert_eq!(config.cleanup.max_metrics, 5);
        assert_eq!(config.cleanup.max_errors, 50);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let toml = format!("{}\n[cleanup]\nthreshold = 1.5\n", MINIMAL);
        let config = ClientConfig::from_toml(&toml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "cleanup.threshold", .. })
        ));
    }

    #[test]
    fn test_ttl_policy_from_settings() {
        let settings = CacheSettings {
            opportunities_ttl_secs: 60,
            ..CacheSettings::default()
        };
        let policy = settings.ttl_policy();
        assert_eq!(policy.ttl(Namespace::Opportunities), Duration::from_secs(60));
        assert_eq!(policy.ttl(Namespace::Metadata), Duration::from_secs(7 * 24 * 3600));
    }
}
