//! Client fetch orchestration.
//!
//! A search resolves user input against stored preferences, consults the
//! client cache, falls back to the proxy, and records telemetry. Recent
//! searches and the last-visit time are updated after every call, whatever
//! its outcome, and failures there are only logged.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use bidscout_core::{Opportunity, OpportunityPage, SearchParams, SharedClock, Timestamp};
use bidscout_storage::{Namespace, SharedEvictionManager, TtlCache};
use chrono::Timelike;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api_client::OpportunityProxy;
use crate::error::ClientResult;
use crate::preferences::{PreferenceStore, UserPreferences};
use crate::telemetry::{ActivityKind, ActivityRecord, ErrorLogRecord, PerformanceMetricRecord, TelemetryStore};

/// Key prefix for individually viewed records in the metadata namespace.
const VIEWED_KEY_PREFIX: &str = "opportunity:";

/// Raw search input as the user typed it, under query-string names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchInput {
    pairs: BTreeMap<String, String>,
}

impl SearchInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.insert(name.into(), value.into());
        self
    }

    pub fn keyword(self, keyword: impl Into<String>) -> Self {
        self.with("q", keyword)
    }

    pub fn pairs(&self) -> &BTreeMap<String, String> {
        &self.pairs
    }

    /// Resolve into concrete parameters for `today`.
    ///
    /// A missing page size comes from preferences; a missing date window uses
    /// the preferred relative range. Explicit input always wins.
    pub fn resolve(&self, preferences: &UserPreferences, today: chrono::NaiveDate) -> ClientResult<SearchParams> {
        let mut pairs = self.pairs.clone();
        if !self.pairs.contains_key("limit") {
            pairs.insert("limit".to_string(), preferences.results_per_page.to_string());
        }
        let params = SearchParams::from_pairs(&pairs, preferences.date_range_token(), today)?;
        Ok(params)
    }
}

/// Where a search result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    ClientCache,
    ProxyCache,
    Upstream,
}

impl FetchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchSource::ClientCache => "client_cache",
            FetchSource::ProxyCache => "proxy_cache",
            FetchSource::Upstream => "upstream",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub request_id: Uuid,
    pub params: SearchParams,
    pub opportunities: Vec<Opportunity>,
    pub total: u64,
    pub source: FetchSource,
}

impl SearchOutcome {
    /// Served from the client cache without contacting the proxy.
    pub fn from_cache(&self) -> bool {
        self.source == FetchSource::ClientCache
    }
}

/// Compact record of a search, kept in the searches namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub query: BTreeMap<String, String>,
    pub total: u64,
    pub notice_ids: Vec<String>,
    pub searched_at: Timestamp,
}

pub struct FetchOrchestrator {
    proxy: Arc<dyn OpportunityProxy>,
    cache: TtlCache,
    evictor: SharedEvictionManager,
    preferences: PreferenceStore,
    telemetry: Arc<TelemetryStore>,
    clock: SharedClock,
}

impl std::fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("cache", &self.cache)
            .field("preferences", &self.preferences)
            .finish_non_exhaustive()
    }
}

impl FetchOrchestrator {
    pub fn new(
        proxy: Arc<dyn OpportunityProxy>,
        cache: TtlCache,
        evictor: SharedEvictionManager,
        preferences: PreferenceStore,
        telemetry: Arc<TelemetryStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            proxy,
            cache,
            evictor,
            preferences,
            telemetry,
            clock,
        }
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    pub fn telemetry(&self) -> &Arc<TelemetryStore> {
        &self.telemetry
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    /// Run one search.
    ///
    /// Every call records a performance metric. A failure is added to the
    /// error log and returned unchanged.
    pub async fn search(&self, input: &SearchInput) -> ClientResult<SearchOutcome> {
        let request_id = Uuid::now_v7();
        let started = Instant::now();
        let start_time = self.clock.now();
        let preferences = self.preferences.load();

        let result = match input.resolve(&preferences, start_time.date_naive()) {
            Ok(params) => self.fetch(request_id, started, params).await,
            Err(e) => Err(e),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let (cache_hit, params_snapshot) = match &result {
            Ok(outcome) => (outcome.from_cache(), owned_pairs(&outcome.params)),
            Err(_) => (false, input.pairs.clone()),
        };
        self.telemetry.record_metric(PerformanceMetricRecord {
            request_id,
            start_time,
            duration_ms,
            cache_hit,
            params_snapshot,
            timestamp: self.clock.now(),
        });

        match &result {
            Ok(outcome) => {
                tracing::info!(
                    request_id = %request_id,
                    source = outcome.source.as_str(),
                    results = outcome.opportunities.len(),
                    total = outcome.total,
                    duration_ms,
                    "search completed"
                );
            }
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, duration_ms, "search failed");
                self.telemetry.record_error(ErrorLogRecord {
                    request_id: Some(request_id),
                    message: e.to_string(),
                    code: e.code(),
                    stack_trace: None,
                    context: serde_json::to_value(input.pairs()).ok(),
                    timestamp: self.clock.now(),
                });
            }
        }

        self.record_visit(input, start_time);
        result
    }

    async fn fetch(
        &self,
        request_id: Uuid,
        started: Instant,
        params: SearchParams,
    ) -> ClientResult<SearchOutcome> {
        let key = params.cache_key();
        if let Some(page) = self
            .cache
            .get_payload::<OpportunityPage>(Namespace::Opportunities, key.as_str())
            .await
        {
            tracing::debug!(request_id = %request_id, cache_key = %key, "client cache hit");
            return Ok(SearchOutcome {
                request_id,
                params,
                opportunities: page.opportunities,
                total: page.total,
                source: FetchSource::ClientCache,
            });
        }

        let page = self.proxy.search(&params).await?;
        let source = if page.from_cache {
            FetchSource::ProxyCache
        } else {
            FetchSource::Upstream
        };
        let stored = OpportunityPage {
            opportunities: page.data,
            total: page.total,
        };
        self.evictor
            .set_with_headroom(Namespace::Opportunities, key.as_str(), &stored)
            .await;

        let now = self.clock.now();
        let query = owned_pairs(&params);
        self.telemetry.record_activity(ActivityRecord {
            kind: ActivityKind::Search,
            source,
            request_id,
            query: query.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            result_count: stored.opportunities.len(),
            total: stored.total,
            timestamp: now,
        });
        self.telemetry
            .record_search_pattern(params.keyword.as_deref(), now.hour());
        for opportunity in stored.opportunities.iter().filter(|o| o.is_high_importance()) {
            self.telemetry.enqueue_offline(opportunity.clone(), now);
        }

        let summary = SearchSummary {
            query,
            total: stored.total,
            notice_ids: stored.opportunities.iter().map(|o| o.notice_id.clone()).collect(),
            searched_at: now,
        };
        self.evictor
            .set_with_headroom(Namespace::Searches, key.as_str(), &summary)
            .await;

        Ok(SearchOutcome {
            request_id,
            params,
            opportunities: stored.opportunities,
            total: stored.total,
            source,
        })
    }

    fn record_visit(&self, input: &SearchInput, at: Timestamp) {
        if let Err(e) = self.preferences.record_search(input.pairs.clone(), at) {
            tracing::warn!(error = %e, "failed to record recent search");
        }
        if let Err(e) = self.preferences.touch_last_visit(at) {
            tracing::warn!(error = %e, "failed to record last visit");
        }
    }

    /// Record that the user opened `opportunity` and keep it for later reads.
    /// Returns the new view count.
    pub async fn view_opportunity(&self, opportunity: &Opportunity) -> u64 {
        let key = format!("{}{}", VIEWED_KEY_PREFIX, opportunity.notice_id);
        self.evictor
            .set_with_headroom(Namespace::Metadata, &key, opportunity)
            .await;
        self.telemetry.record_view(&opportunity.notice_id)
    }

    pub async fn cached_opportunity(&self, notice_id: &str) -> Option<Opportunity> {
        let key = format!("{}{}", VIEWED_KEY_PREFIX, notice_id);
        self.cache.get_payload(Namespace::Metadata, &key).await
    }

    pub async fn search_summary(&self, params: &SearchParams) -> Option<SearchSummary> {
        self.cache
            .get_payload(Namespace::Searches, params.cache_key().as_str())
            .await
    }

    pub fn frequently_viewed(&self, limit: usize) -> Vec<(String, u64)> {
        self.telemetry.frequently_viewed(limit)
    }
}

fn owned_pairs(params: &SearchParams) -> BTreeMap<String, String> {
    params
        .canonical_pairs()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidscout_core::DateRangeToken;
    use chrono::NaiveDate;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    #[test]
    fn test_resolve_applies_preference_defaults() {
        let preferences = UserPreferences {
            results_per_page: 25,
            date_range: "3months".to_string(),
            ..Default::default()
        };
        let params = SearchInput::new().keyword("radar").resolve(&preferences, today()).unwrap();
        assert_eq!(params.limit, 25);
        assert_eq!(params.posted_from, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(params.posted_to, today());
        assert_eq!(params.keyword.as_deref(), Some("radar"));
    }

    #[test]
    fn test_explicit_input_wins_over_preferences() {
        let preferences = UserPreferences {
            results_per_page: 25,
            ..Default::default()
        };
        let params = SearchInput::from_pairs([("limit", "50"), ("dateRange", "1week")])
            .resolve(&preferences, today())
            .unwrap();
        assert_eq!(params.limit, 50);
        let (from, _) = DateRangeToken::OneWeek.resolve(today());
        assert_eq!(params.posted_from, from);
    }

    #[test]
    fn test_invalid_input_is_a_validation_error() {
        let err = SearchInput::from_pairs([("limit", "500")])
            .resolve(&UserPreferences::default(), today())
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }

    #[test]
    fn test_fetch_source_labels() {
        assert_eq!(FetchSource::ClientCache.as_str(), "client_cache");
        assert_eq!(FetchSource::Upstream.as_str(), "upstream");
    }
}
