//! Client-side telemetry: performance metrics, error log, user activity,
//! the offline-access queue and usage analytics.
//!
//! Every collection is a [`BoundedLog`]; appends past capacity drop the
//! oldest records. Recording never fails.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use bidscout_core::{Opportunity, Timestamp};
use bidscout_storage::BoundedLog;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CleanupSettings;
use crate::error::ClientResult;
use crate::orchestrator::FetchSource;
use crate::persistence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryLimits {
    pub max_errors: usize,
    pub max_metrics: usize,
    pub max_activity: usize,
    pub max_offline: usize,
}

impl From<&CleanupSettings> for TelemetryLimits {
    fn from(settings: &CleanupSettings) -> Self {
        Self {
            max_errors: settings.max_errors,
            max_metrics: settings.max_metrics,
            max_activity: settings.max_activity,
            max_offline: settings.max_offline,
        }
    }
}

impl Default for TelemetryLimits {
    fn default() -> Self {
        Self::from(&CleanupSettings::default())
    }
}

/// One fetch, hit or miss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetricRecord {
    pub request_id: Uuid,
    pub start_time: Timestamp,
    pub duration_ms: u64,
    pub cache_hit: bool,
    pub params_snapshot: BTreeMap<String, String>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogRecord {
    pub request_id: Option<Uuid>,
    pub message: String,
    pub code: String,
    pub stack_trace: Option<String>,
    pub context: Option<serde_json::Value>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Search,
}

/// A search that returned data from the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub source: FetchSource,
    pub request_id: Uuid,
    pub query: BTreeMap<String, String>,
    pub duration_ms: u64,
    pub result_count: usize,
    pub total: u64,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineItem {
    pub opportunity: Opportunity,
    pub queued_at: Timestamp,
}

/// Keyword counts and an hour-of-day histogram of searches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPatterns {
    pub keywords: BTreeMap<String, u64>,
    pub hours: BTreeMap<u32, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryData {
    pub metrics: BoundedLog<PerformanceMetricRecord>,
    pub errors: BoundedLog<ErrorLogRecord>,
    pub activity: BoundedLog<ActivityRecord>,
    pub offline_queue: BoundedLog<OfflineItem>,
    #[serde(default)]
    pub frequently_viewed: BTreeMap<String, u64>,
    #[serde(default)]
    pub search_patterns: SearchPatterns,
}

impl TelemetryData {
    fn new(limits: TelemetryLimits) -> Self {
        Self {
            metrics: BoundedLog::new(limits.max_metrics),
            errors: BoundedLog::new(limits.max_errors),
            activity: BoundedLog::new(limits.max_activity),
            offline_queue: BoundedLog::new(limits.max_offline),
            frequently_viewed: BTreeMap::new(),
            search_patterns: SearchPatterns::default(),
        }
    }

    fn apply_limits(&mut self, limits: TelemetryLimits) -> usize {
        self.metrics.set_capacity(limits.max_metrics)
            + self.errors.set_capacity(limits.max_errors)
            + self.activity.set_capacity(limits.max_activity)
            + self.offline_queue.set_capacity(limits.max_offline)
    }
}

#[derive(Debug)]
pub struct TelemetryStore {
    data: RwLock<TelemetryData>,
    path: Option<PathBuf>,
}

impl TelemetryStore {
    pub fn new(limits: TelemetryLimits) -> Self {
        Self {
            data: RwLock::new(TelemetryData::new(limits)),
            path: None,
        }
    }

    /// Load from `path` if present. A corrupt file is logged and replaced
    /// with an empty store on the next save.
    pub fn open(path: impl AsRef<Path>, limits: TelemetryLimits) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut data = match persistence::load::<TelemetryData>(&path) {
            Ok(Some(data)) => data,
            Ok(None) => TelemetryData::new(limits),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding unreadable telemetry file");
                TelemetryData::new(limits)
            }
        };
        data.apply_limits(limits);
        Self {
            data: RwLock::new(data),
            path: Some(path),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TelemetryData> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TelemetryData> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_metric(&self, record: PerformanceMetricRecord) {
        self.write().metrics.push(record);
    }

    pub fn record_error(&self, record: ErrorLogRecord) {
        self.write().errors.push(record);
    }

    pub fn record_activity(&self, record: ActivityRecord) {
        self.write().activity.push(record);
    }

    /// Queue an opportunity for offline access. A record already queued is
    /// replaced rather than duplicated.
    pub fn enqueue_offline(&self, opportunity: Opportunity, at: Timestamp) {
        let mut data = self.write();
        data.offline_queue
            .retain(|item| item.opportunity.notice_id != opportunity.notice_id);
        data.offline_queue.push(OfflineItem { opportunity, queued_at: at });
    }

    pub fn record_view(&self, notice_id: &str) -> u64 {
        let mut data = self.write();
        let count = data.frequently_viewed.entry(notice_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_search_pattern(&self, keyword: Option<&str>, hour: u32) {
        let mut data = self.write();
        if let Some(keyword) = keyword {
            *data
                .search_patterns
                .keywords
                .entry(keyword.to_lowercase())
                .or_insert(0) += 1;
        }
        *data.search_patterns.hours.entry(hour).or_insert(0) += 1;
    }

    pub fn metrics(&self) -> Vec<PerformanceMetricRecord> {
        self.read().metrics.to_vec()
    }

    pub fn errors(&self) -> Vec<ErrorLogRecord> {
        self.read().errors.to_vec()
    }

    pub fn activity(&self) -> Vec<ActivityRecord> {
        self.read().activity.to_vec()
    }

    pub fn offline_queue(&self) -> Vec<OfflineItem> {
        self.read().offline_queue.to_vec()
    }

    pub fn search_patterns(&self) -> SearchPatterns {
        self.read().search_patterns.clone()
    }

    /// The `limit` most viewed notice ids, most viewed first.
    pub fn frequently_viewed(&self, limit: usize) -> Vec<(String, u64)> {
        let mut counts: Vec<(String, u64)> = self
            .read()
            .frequently_viewed
            .iter()
            .map(|(id, count)| (id.clone(), *count))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(limit);
        counts
    }

    /// Trim every log to `limits`, keeping the newest records.
    /// Returns the number of records removed.
    pub fn trim(&self, limits: TelemetryLimits) -> usize {
        self.write().apply_limits(limits)
    }

    pub fn snapshot(&self) -> TelemetryData {
        self.read().clone()
    }

    /// Write to the backing file. A store without one is a no-op.
    pub fn persist(&self) -> ClientResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = self.snapshot();
        persistence::save(path, &data)
    }
}
