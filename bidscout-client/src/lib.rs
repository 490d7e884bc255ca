//! BidScout Client
//!
//! Client-side half of BidScout: resolves searches against stored
//! preferences, serves repeats from a local TTL cache, falls back to the
//! proxy, and records telemetry. A background scheduler keeps local storage
//! inside its quota.
//!
//! Everything is wired once by [`ClientServices::from_config`] and handed to
//! callers by reference; nothing here is global.

pub mod api_client;
pub mod config;
pub mod cookies;
pub mod error;
pub mod jobs;
pub mod orchestrator;
pub mod persistence;
pub mod preferences;
pub mod telemetry;

use std::sync::Arc;

use bidscout_core::{system_clock, SharedClock};
use bidscout_storage::{
    EvictionConfig, EvictionManager, LmdbMedium, MemoryMedium, SharedEvictionManager,
    StorageMedium, TtlCache,
};

pub use api_client::{HttpProxyClient, OpportunityProxy, ProxyPage};
pub use config::ClientConfig;
pub use cookies::CookieJar;
pub use error::{ClientError, ClientResult};
pub use jobs::{CleanupConfig, CleanupContext, CleanupScheduler};
pub use orchestrator::{FetchOrchestrator, FetchSource, SearchInput, SearchOutcome};
pub use preferences::{PreferenceStore, UserPreferences};
pub use telemetry::{ActivityKind, ActivityRecord, TelemetryLimits, TelemetryStore};

/// The constructed client: orchestrator plus its cleanup scheduler.
#[derive(Debug)]
pub struct ClientServices {
    orchestrator: FetchOrchestrator,
    scheduler: CleanupScheduler,
}

impl ClientServices {
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let proxy: Arc<dyn OpportunityProxy> = Arc::new(HttpProxyClient::from_config(config)?);
        Self::with_proxy(config, proxy, system_clock())
    }

    /// Wire the client around an arbitrary proxy and clock.
    pub fn with_proxy(
        config: &ClientConfig,
        proxy: Arc<dyn OpportunityProxy>,
        clock: SharedClock,
    ) -> ClientResult<Self> {
        let cache = TtlCache::new(open_medium(config), config.cache.ttl_policy(), clock.clone());
        let evictor: SharedEvictionManager = Arc::new(EvictionManager::new(
            cache.clone(),
            EvictionConfig {
                threshold: config.cleanup.threshold,
                ..EvictionConfig::default()
            },
        ));

        let jar = CookieJar::open(
            config.cookie_path(),
            &config.encryption_key,
            &config.cookie_prefix,
            config.cookie_ttl_days,
            clock.clone(),
        )?;
        let preferences = PreferenceStore::new(Arc::new(jar), config.cleanup.max_recent_searches);
        let telemetry = Arc::new(TelemetryStore::open(
            config.telemetry_path(),
            TelemetryLimits::from(&config.cleanup),
        ));

        let scheduler = CleanupScheduler::new(
            CleanupContext {
                cache: cache.clone(),
                evictor: Arc::clone(&evictor),
                telemetry: Arc::clone(&telemetry),
                preferences: Some(preferences.clone()),
            },
            CleanupConfig::from_settings(&config.cleanup),
        );
        let orchestrator = FetchOrchestrator::new(proxy, cache, evictor, preferences, telemetry, clock);

        Ok(Self {
            orchestrator,
            scheduler,
        })
    }

    pub fn orchestrator(&self) -> &FetchOrchestrator {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &CleanupScheduler {
        &self.scheduler
    }

    pub fn start_background(&mut self) -> bool {
        self.scheduler.start()
    }

    /// Stop the scheduler and save telemetry.
    pub async fn shutdown(&mut self) {
        self.scheduler.stop().await;
        if let Err(e) = self.orchestrator.telemetry().persist() {
            tracing::warn!(error = %e, "failed to persist telemetry on shutdown");
        }
    }
}

/// LMDB under the data directory when persistence is on, memory otherwise.
/// An LMDB failure falls back to memory.
fn open_medium(config: &ClientConfig) -> Arc<dyn StorageMedium> {
    let quota_bytes = (config.cache.quota_mb as u64) * 1024 * 1024;
    if config.cache.persistent {
        let path = config.cache_dir();
        match LmdbMedium::open(&path, config.cache.quota_mb) {
            Ok(medium) => return Arc::new(medium),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "persistent cache unavailable, using memory");
            }
        }
    }
    Arc::new(MemoryMedium::new(quota_bytes))
}
