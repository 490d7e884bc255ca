//! Periodic Cleanup Background Task
//!
//! Each cycle, in order:
//!
//! 1. Snapshot storage usage
//! 2. Evict least-recently-accessed entries if usage is above the threshold
//! 3. Purge entries past their TTL in every namespace
//! 4. Trim telemetry logs and recent searches to their configured maximums
//! 5. Persist telemetry, if enabled
//!
//! A failing step is logged and counted; the remaining steps still run. A
//! panic inside a cycle is caught and the next cycle is still scheduled.
//! The next cycle is timed from the end of the previous one, so cycles never
//! overlap.
//!
//! # Usage
//!
//! ```ignore
//! let mut scheduler = CleanupScheduler::new(context, CleanupConfig::default());
//! scheduler.start();
//! // ...
//! scheduler.stop().await;
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bidscout_storage::{SharedEvictionManager, StorageUsageSnapshot, TtlCache};
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::CleanupSettings;
use crate::preferences::PreferenceStore;
use crate::telemetry::{TelemetryLimits, TelemetryStore};

pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_MAX_ERRORS: usize = 50;
pub const DEFAULT_MAX_METRICS: usize = 100;
pub const DEFAULT_MAX_ACTIVITY: usize = 50;
pub const DEFAULT_MAX_OFFLINE: usize = 20;
pub const DEFAULT_MAX_RECENT_SEARCHES: usize = 10;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Pause between the end of one cycle and the start of the next
    /// (default: 1 hour)
    pub interval: Duration,

    /// Usage ratio above which eviction runs (default: 0.8)
    pub threshold: f64,

    /// Maximum sizes for the telemetry logs
    pub limits: TelemetryLimits,

    /// Maximum number of recent searches kept (default: 10)
    pub max_recent_searches: usize,

    /// Save telemetry to disk at the end of each cycle (default: true)
    pub persist_telemetry: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self::from_settings(&CleanupSettings::default())
    }
}

impl CleanupConfig {
    pub fn from_settings(settings: &CleanupSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.interval_secs),
            threshold: settings.threshold,
            limits: TelemetryLimits::from(settings),
            max_recent_searches: settings.max_recent_searches,
            persist_telemetry: true,
        }
    }

    /// Create CleanupConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `BIDSCOUT_CLEANUP_INTERVAL_SECS`: Seconds between cycles (default: 3600)
    /// - `BIDSCOUT_CLEANUP_THRESHOLD`: Eviction threshold ratio (default: 0.8)
    /// - `BIDSCOUT_CLEANUP_MAX_METRICS`: Performance metrics kept (default: 100)
    /// - `BIDSCOUT_CLEANUP_MAX_ERRORS`: Error records kept (default: 50)
    /// - `BIDSCOUT_CLEANUP_PERSIST_TELEMETRY`: Save telemetry each cycle (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let interval = Duration::from_secs(
            std::env::var("BIDSCOUT_CLEANUP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_CLEANUP_INTERVAL_SECS),
        );

        let threshold = std::env::var("BIDSCOUT_CLEANUP_THRESHOLD")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|t| (0.0..=1.0).contains(t))
            .unwrap_or(defaults.threshold);

        let max_metrics = std::env::var("BIDSCOUT_CLEANUP_MAX_METRICS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_METRICS);

        let max_errors = std::env::var("BIDSCOUT_CLEANUP_MAX_ERRORS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_ERRORS);

        let persist_telemetry = std::env::var("BIDSCOUT_CLEANUP_PERSIST_TELEMETRY")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            interval,
            threshold,
            limits: TelemetryLimits {
                max_metrics,
                max_errors,
                ..defaults.limits
            },
            persist_telemetry,
            ..defaults
        }
    }

    /// Short interval for local development.
    pub fn development() -> Self {
        Self {
            interval: Duration::from_secs(60),
            persist_telemetry: false,
            ..Self::default()
        }
    }

    pub fn production() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            persist_telemetry: true,
            ..Self::default()
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct CleanupMetrics {
    /// Cycles completed, including ones that hit errors
    pub cycles: AtomicU64,

    /// Entries removed by eviction
    pub entries_evicted: AtomicU64,

    /// Entries removed because their TTL had passed
    pub entries_expired: AtomicU64,

    /// Telemetry and recent-search records trimmed
    pub records_trimmed: AtomicU64,

    /// Failed steps and caught panics
    pub cleanup_errors: AtomicU64,
}

impl CleanupMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CleanupSnapshot {
        CleanupSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            entries_evicted: self.entries_evicted.load(Ordering::Relaxed),
            entries_expired: self.entries_expired.load(Ordering::Relaxed),
            records_trimmed: self.records_trimmed.load(Ordering::Relaxed),
            cleanup_errors: self.cleanup_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSnapshot {
    pub cycles: u64,
    pub entries_evicted: u64,
    pub entries_expired: u64,
    pub records_trimmed: u64,
    pub cleanup_errors: u64,
}

/// Outcome of a single cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub usage: Option<StorageUsageSnapshot>,
    pub evicted: usize,
    pub expired: usize,
    pub trimmed: usize,
    pub errors: usize,
}

// ============================================================================
// CYCLE
// ============================================================================

/// What a cycle operates on.
#[derive(Debug, Clone)]
pub struct CleanupContext {
    pub cache: TtlCache,
    pub evictor: SharedEvictionManager,
    pub telemetry: Arc<TelemetryStore>,
    pub preferences: Option<PreferenceStore>,
}

async fn run_cycle(
    context: &CleanupContext,
    config: &CleanupConfig,
    metrics: &CleanupMetrics,
) -> CycleReport {
    let mut report = CycleReport::default();

    match context.evictor.check_usage().await {
        Ok(snapshot) => {
            report.usage = Some(snapshot);
            if snapshot.exceeds(config.threshold) {
                let eviction = context.evictor.evict_least_recent().await;
                report.evicted = eviction.evicted;
                report.errors += eviction.failed;
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to read storage usage, skipping eviction");
            report.errors += 1;
        }
    }

    report.expired = context.cache.purge_expired().await;

    report.trimmed = context.telemetry.trim(config.limits);
    if let Some(preferences) = &context.preferences {
        match preferences.trim_recent_searches(config.max_recent_searches) {
            Ok(dropped) => report.trimmed += dropped,
            Err(e) => {
                tracing::error!(error = %e, "Failed to trim recent searches");
                report.errors += 1;
            }
        }
    }

    if config.persist_telemetry {
        if let Err(e) = context.telemetry.persist() {
            tracing::error!(error = %e, "Failed to persist telemetry");
            report.errors += 1;
        }
    }

    metrics.cycles.fetch_add(1, Ordering::Relaxed);
    metrics
        .entries_evicted
        .fetch_add(report.evicted as u64, Ordering::Relaxed);
    metrics
        .entries_expired
        .fetch_add(report.expired as u64, Ordering::Relaxed);
    metrics
        .records_trimmed
        .fetch_add(report.trimmed as u64, Ordering::Relaxed);
    metrics
        .cleanup_errors
        .fetch_add(report.errors as u64, Ordering::Relaxed);

    tracing::info!(
        percent_used = report.usage.map(|u| u.percent_used),
        evicted = report.evicted,
        expired = report.expired,
        trimmed = report.trimmed,
        errors = report.errors,
        "Cleanup cycle completed"
    );

    report
}

/// Run one cycle, turning a panic into a counted error.
async fn guarded_cycle(
    context: &CleanupContext,
    config: &CleanupConfig,
    metrics: &CleanupMetrics,
) -> Option<CycleReport> {
    match AssertUnwindSafe(run_cycle(context, config, metrics))
        .catch_unwind()
        .await
    {
        Ok(report) => Some(report),
        Err(_) => {
            tracing::error!("Cleanup cycle panicked; next cycle still scheduled");
            metrics.cycles.fetch_add(1, Ordering::Relaxed);
            metrics.cleanup_errors.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}

async fn cleanup_task(
    context: CleanupContext,
    config: CleanupConfig,
    metrics: Arc<CleanupMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::info!(interval_secs = config.interval.as_secs(), "Cleanup scheduler started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(config.interval) => {
                guarded_cycle(&context, &config, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        entries_evicted = snapshot.entries_evicted,
        entries_expired = snapshot.entries_expired,
        records_trimmed = snapshot.records_trimmed,
        cleanup_errors = snapshot.cleanup_errors,
        "Cleanup scheduler stopped"
    );
}

// ============================================================================
// SCHEDULER
// ============================================================================

enum SchedulerState {
    Stopped,
    Running {
        handle: JoinHandle<()>,
        shutdown_tx: watch::Sender<bool>,
    },
}

pub struct CleanupScheduler {
    context: CleanupContext,
    config: CleanupConfig,
    metrics: Arc<CleanupMetrics>,
    state: SchedulerState,
}

impl std::fmt::Debug for CleanupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupScheduler")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl CleanupScheduler {
    pub fn new(context: CleanupContext, config: CleanupConfig) -> Self {
        Self {
            context,
            config,
            metrics: Arc::new(CleanupMetrics::new()),
            state: SchedulerState::Stopped,
        }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    pub fn metrics(&self) -> CleanupSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SchedulerState::Running { .. })
    }

    /// Spawn the background loop. The first cycle runs one interval from now.
    ///
    /// Returns `false` if the scheduler was already running. Must be called
    /// from within a tokio runtime.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(cleanup_task(
            self.context.clone(),
            self.config.clone(),
            Arc::clone(&self.metrics),
            shutdown_rx,
        ));
        self.state = SchedulerState::Running { handle, shutdown_tx };
        true
    }

    /// Signal the loop and wait for it to finish. A cycle in progress
    /// completes first.
    pub async fn stop(&mut self) {
        let state = std::mem::replace(&mut self.state, SchedulerState::Stopped);
        if let SchedulerState::Running { handle, shutdown_tx } = state {
            let _ = shutdown_tx.send(true);
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Cleanup task ended abnormally");
            }
        }
    }

    /// Run one cycle now, outside the schedule.
    pub async fn run_once(&self) -> Option<CycleReport> {
        guarded_cycle(&self.context, &self.config, &self.metrics).await
    }
}
