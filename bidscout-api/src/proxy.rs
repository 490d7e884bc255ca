//! Request proxy/cache layer.
//!
//! Every search goes through [`ProxyCache::query`]:
//!
//! 1. the upstream credential is checked (missing = configuration error);
//! 2. the deterministic [`CacheKey`] is derived from the full parameter set;
//! 3. a live cache entry is returned as-is with `from_cache = true`;
//! 4. otherwise exactly one upstream call is made for the key, however many
//!    requests are waiting on it, and the transformed page is cached under the
//!    proxy TTL class. Upstream failures are returned and never cached.
//!
//! Each call emits one structured log line and one metric observation with
//! the request id, duration and cache outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bidscout_core::{
    transform_search_body, BidScoutError, BidScoutResult, CacheKey, Opportunity, OpportunityPage,
    SearchParams,
};
use bidscout_storage::{EvictionConfig, EvictionManager, Namespace, TtlCache};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::telemetry::METRICS;
use crate::upstream::OpportunitySource;

type SharedFetch = Shared<BoxFuture<'static, BidScoutResult<OpportunityPage>>>;

/// What happened to one proxied query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    /// Served from the cache.
    Hit,
    /// This request performed the upstream call.
    Miss,
    /// Joined an upstream call already in flight for the same key.
    Coalesced,
    /// The query failed.
    Error,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Coalesced => "coalesced",
            CacheOutcome::Error => "error",
        }
    }
}

/// Successful proxy response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
    pub success: bool,
    pub data: Vec<Opportunity>,
    pub total: u64,
    pub from_cache: bool,
}

impl ProxyResponse {
    fn from_page(page: OpportunityPage, from_cache: bool) -> Self {
        Self {
            success: true,
            data: page.opportunities,
            total: page.total,
            from_cache,
        }
    }
}

/// Per-instance counters, independent of the global Prometheus registry.
#[derive(Debug, Default)]
pub struct ProxyStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub coalesced: AtomicU64,
    pub errors: AtomicU64,
    pub upstream_calls: AtomicU64,
}

impl ProxyStats {
    fn record(&self, outcome: CacheOutcome) {
        let counter = match outcome {
            CacheOutcome::Hit => &self.hits,
            CacheOutcome::Miss => &self.misses,
            CacheOutcome::Coalesced => &self.coalesced,
            CacheOutcome::Error => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProxyStatsSnapshot {
        ProxyStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            upstream_calls: self.upstream_calls.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProxyStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub errors: u64,
    pub upstream_calls: u64,
}

struct ProxyInner {
    upstream: Arc<dyn OpportunitySource>,
    cache: Option<TtlCache>,
    evictor: Option<EvictionManager>,
    in_flight: DashMap<String, SharedFetch>,
    stats: ProxyStats,
}

/// Caching, coalescing front for an [`OpportunitySource`].
///
/// Construct once at startup and share; clones are cheap handles onto the
/// same cache, in-flight table and statistics.
#[derive(Clone)]
pub struct ProxyCache {
    inner: Arc<ProxyInner>,
}

impl std::fmt::Debug for ProxyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCache")
            .field("cache", &self.inner.cache)
            .field("in_flight", &self.inner.in_flight.len())
            .finish()
    }
}

impl ProxyCache {
    /// `cache = None` disables caching; coalescing still applies.
    pub fn new(upstream: Arc<dyn OpportunitySource>, cache: Option<TtlCache>) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                upstream,
                evictor: cache
                    .clone()
                    .map(|c| EvictionManager::new(c, EvictionConfig::default())),
                cache,
                in_flight: DashMap::new(),
                stats: ProxyStats::default(),
            }),
        }
    }

    pub fn caching_enabled(&self) -> bool {
        self.inner.cache.is_some()
    }

    /// The backing cache, when caching is enabled.
    pub fn cache(&self) -> Option<&TtlCache> {
        self.inner.cache.as_ref()
    }

    pub fn stats(&self) -> ProxyStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Whether the upstream credential is configured.
    pub fn upstream_configured(&self) -> bool {
        self.inner.upstream.check_credentials().is_ok()
    }

    /// Run one proxied search.
    pub async fn query(&self, params: &SearchParams) -> BidScoutResult<ProxyResponse> {
        let request_id = Uuid::now_v7();
        let started = Instant::now();
        let key = params.cache_key();

        let result = self.query_inner(params, &key).await;

        let outcome = match &result {
            Ok((_, outcome)) => *outcome,
            Err(_) => CacheOutcome::Error,
        };
        let duration = started.elapsed();
        self.inner.stats.record(outcome);
        if let Ok(metrics) = METRICS.as_ref() {
            metrics.record_proxy_query(outcome.as_str(), duration.as_secs_f64());
        }

        match &result {
            Ok((response, _)) => tracing::info!(
                request_id = %request_id,
                cache_key = %key,
                cache_outcome = outcome.as_str(),
                duration_ms = duration.as_millis() as u64,
                results = response.data.len(),
                total = response.total,
                "proxy query served"
            ),
            Err(e) => tracing::warn!(
                request_id = %request_id,
                cache_key = %key,
                cache_outcome = outcome.as_str(),
                duration_ms = duration.as_millis() as u64,
                error = %e,
                "proxy query failed"
            ),
        }

        result.map(|(response, _)| response)
    }

    async fn query_inner(
        &self,
        params: &SearchParams,
        key: &CacheKey,
    ) -> BidScoutResult<(ProxyResponse, CacheOutcome)> {
        self.inner.upstream.check_credentials()?;

        if let Some(cache) = &self.inner.cache {
            if let Some(page) = cache
                .get_payload::<OpportunityPage>(Namespace::Proxy, key.as_str())
                .await
            {
                return Ok((ProxyResponse::from_page(page, true), CacheOutcome::Hit));
            }
        }

        let (fetch, outcome) = self.join_or_start(params, key);
        let page = fetch.await?;
        Ok((ProxyResponse::from_page(page, false), outcome))
    }

    /// Join the in-flight fetch for `key`, or start one.
    fn join_or_start(&self, params: &SearchParams, key: &CacheKey) -> (SharedFetch, CacheOutcome) {
        match self.inner.in_flight.entry(key.as_str().to_string()) {
            Entry::Occupied(existing) => (existing.get().clone(), CacheOutcome::Coalesced),
            Entry::Vacant(slot) => {
                let fetch = Self::fetch_and_store(self.inner.clone(), params.clone(), key.clone())
                    .boxed()
                    .shared();
                slot.insert(fetch.clone());
                // Drive the fetch to completion even if every caller goes away.
                tokio::spawn(fetch.clone());
                (fetch, CacheOutcome::Miss)
            }
        }
    }

    async fn fetch_and_store(
        inner: Arc<ProxyInner>,
        params: SearchParams,
        key: CacheKey,
    ) -> BidScoutResult<OpportunityPage> {
        inner.stats.upstream_calls.fetch_add(1, Ordering::Relaxed);
        let result = inner.upstream.search(&params).await;

        if let Ok(metrics) = METRICS.as_ref() {
            let status = match &result {
                Ok(_) => "ok".to_string(),
                Err(BidScoutError::Upstream(e)) => e
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "network".to_string()),
                Err(_) => "config".to_string(),
            };
            metrics.record_upstream_request(&status);
        }

        let outcome = match result {
            Ok(body) => {
                let page = transform_search_body(&body);
                if let Some(evictor) = &inner.evictor {
                    evictor
                        .set_with_headroom(Namespace::Proxy, key.as_str(), &page)
                        .await;
                }
                Ok(page)
            }
            Err(e) => Err(e),
        };

        inner.in_flight.remove(key.as_str());
        outcome
    }

    /// Look up one opportunity by notice id.
    pub async fn opportunity(&self, params: &SearchParams) -> BidScoutResult<Option<Opportunity>> {
        let notice_id = params.notice_id.clone();
        let response = self.query(params).await?;
        Ok(response
            .data
            .into_iter()
            .find(|o| Some(&o.notice_id) == notice_id.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bidscout_core::{ConfigError, DateRangeToken, UpstreamError};
    use bidscout_storage::{MemoryMedium, TtlPolicy};
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Source that replays a scripted list of responses and counts calls.
    struct ScriptedSource {
        responses: Mutex<Vec<BidScoutResult<Value>>>,
        calls: AtomicU64,
        delay: Duration,
        configured: bool,
    }

    impl ScriptedSource {
        fn new(responses: Vec<BidScoutResult<Value>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicU64::new(0),
                delay: Duration::ZERO,
                configured: true,
            })
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OpportunitySource for ScriptedSource {
        fn check_credentials(&self) -> Result<(), ConfigError> {
            if self.configured {
                Ok(())
            } else {
                Err(ConfigError::MissingRequired { field: "key".into() })
            }
        }

        async fn search(&self, _params: &SearchParams) -> Result<Value, BidScoutError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            }
        }
    }

    fn params() -> SearchParams {
        SearchParams::for_range(DateRangeToken::OneMonth, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    fn cache() -> TtlCache {
        TtlCache::new(
            Arc::new(MemoryMedium::new(1 << 20)),
            TtlPolicy::default(),
            bidscout_core::system_clock(),
        )
    }

    fn one_result() -> Value {
        json!({"totalRecords": 1, "opportunitiesData": [{"noticeId": "n1", "title": "Radar upgrade"}]})
    }

    #[tokio::test]
    async fn test_second_identical_query_is_cache_hit() {
        let source = ScriptedSource::new(vec![Ok(one_result())]);
        let proxy = ProxyCache::new(source.clone(), Some(cache()));

        let first = proxy.query(&params()).await.unwrap();
        let second = proxy.query(&params()).await.unwrap();
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(second.data, first.data);
        assert_eq!(source.calls(), 1);
        assert_eq!(proxy.stats().hits, 1);
        assert_eq!(proxy.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_missing_credential_fails_fast() {
        let source = Arc::new(ScriptedSource {
            responses: Mutex::new(vec![Ok(one_result())]),
            calls: AtomicU64::new(0),
            delay: Duration::ZERO,
            configured: false,
        });
        let proxy = ProxyCache::new(source.clone(), Some(cache()));
        let err = proxy.query(&params()).await.unwrap_err();
        assert!(matches!(err, BidScoutError::Configuration(_)));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_errors_not_cached() {
        let source = ScriptedSource::new(vec![
            Err(UpstreamError::http(503, None).into()),
            Ok(one_result()),
        ]);
        let proxy = ProxyCache::new(source.clone(), Some(cache()));

        assert!(proxy.query(&params()).await.is_err());
        let retry = proxy.query(&params()).await.unwrap();
        assert!(!retry.from_cache);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce() {
        let source = Arc::new(ScriptedSource {
            responses: Mutex::new(vec![Ok(one_result())]),
            calls: AtomicU64::new(0),
            delay: Duration::from_millis(100),
            configured: true,
        });
        let proxy = ProxyCache::new(source.clone(), Some(cache()));

        let queries = (0..8).map(|_| {
            let proxy = proxy.clone();
            async move { proxy.query(&params()).await }
        });
        let results = futures_util::future::join_all(queries).await;

        assert!(results.iter().all(|r| r.as_ref().map(|r| r.total == 1).unwrap_or(false)));
        assert_eq!(source.calls(), 1);
        let stats = proxy.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.coalesced, 7);
    }

    #[tokio::test]
    async fn test_without_cache_every_sequential_query_goes_upstream() {
        let source = ScriptedSource::new(vec![Ok(one_result())]);
        let proxy = ProxyCache::new(source.clone(), None);
        proxy.query(&params()).await.unwrap();
        let second = proxy.query(&params()).await.unwrap();
        assert!(!second.from_cache);
        assert_eq!(source.calls(), 2);
        assert!(!proxy.caching_enabled());
    }

    #[tokio::test]
    async fn test_opportunity_lookup() {
        let source = ScriptedSource::new(vec![Ok(one_result())]);
        let proxy = ProxyCache::new(source, Some(cache()));
        let found = proxy.opportunity(&params().with_notice_id("n1")).await.unwrap();
        assert_eq!(found.map(|o| o.title), Some("Radar upgrade".to_string()));
    }

    #[test]
    fn test_response_serializes_camel_case() {
        let response = ProxyResponse::from_page(OpportunityPage::empty(), true);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, json!({"success": true, "data": [], "total": 0, "fromCache": true}));
    }
}
