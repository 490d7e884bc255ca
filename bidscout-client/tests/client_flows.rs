//! End-to-end flows through the client services with a scripted proxy.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bidscout_client::preferences::PreferencesUpdate;
use bidscout_client::telemetry::ActivityKind;
use bidscout_client::{
    ClientConfig, ClientError, ClientResult, ClientServices, FetchSource, OpportunityProxy,
    ProxyPage, SearchInput,
};
use bidscout_core::{Clock, DateRangeToken, OpportunityPage, SearchParams};
use bidscout_storage::Namespace;
use bidscout_test_utils::{fixtures, ManualClock, Script};
use chrono::NaiveDate;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// MOCK PROXY
// ============================================================================

/// Scripted proxy. `Err(status)` entries become structured proxy failures.
struct MockProxy {
    script: Script<Result<ProxyPage, u16>>,
    seen: Mutex<Vec<SearchParams>>,
}

impl MockProxy {
    fn new(responses: impl IntoIterator<Item = Result<ProxyPage, u16>>) -> Arc<Self> {
        Arc::new(Self {
            script: Script::new(responses),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.script.calls()
    }

    fn seen(&self) -> Vec<SearchParams> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl OpportunityProxy for MockProxy {
    async fn search(&self, params: &SearchParams) -> ClientResult<ProxyPage> {
        self.seen.lock().unwrap().push(params.clone());
        match self.script.next() {
            Some(Ok(page)) => Ok(page),
            Some(Err(status)) => Err(ClientError::Proxy {
                status,
                code: Some("UPSTREAM_ERROR".to_string()),
                message: format!("upstream answered {}", status),
                details: Some(json!({"status": status})),
            }),
            None => Err(ClientError::Proxy {
                status: 500,
                code: None,
                message: "script exhausted".to_string(),
                details: None,
            }),
        }
    }
}

fn proxy_page(page: OpportunityPage) -> ProxyPage {
    ProxyPage {
        total: page.total,
        data: page.opportunities,
        from_cache: false,
    }
}

// ============================================================================
// HARNESS
// ============================================================================

struct Harness {
    _dir: TempDir,
    config: ClientConfig,
    clock: ManualClock,
    proxy: Arc<MockProxy>,
    services: ClientServices,
}

fn config_for(dir: &TempDir, proxy_url: &str) -> ClientConfig {
    let toml = format!(
        r#"
proxy_base_url = "{}"
data_dir = "{}"
encryption_key = "integration test key"

[cache]
persistent = false
"#,
        proxy_url,
        dir.path().display()
    );
    let config = ClientConfig::from_toml(&toml).unwrap();
    config.validate().unwrap();
    config
}

impl Harness {
    fn new(responses: impl IntoIterator<Item = Result<ProxyPage, u16>>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&dir, "http://127.0.0.1:9");
        let clock = ManualClock::at_date(2024, 6, 10);
        let proxy = MockProxy::new(responses);
        let services = ClientServices::with_proxy(&config, proxy.clone(), clock.shared()).unwrap();
        Self {
            _dir: dir,
            config,
            clock,
            proxy,
            services,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_repeat_search_served_from_client_cache() {
    let h = Harness::new([Ok(proxy_page(fixtures::page("gsa", 3)))]);
    let orchestrator = h.services.orchestrator();
    let input = SearchInput::new().keyword("janitorial");

    let first = orchestrator.search(&input).await.unwrap();
    let second = orchestrator.search(&input).await.unwrap();

    assert_eq!(first.source, FetchSource::Upstream);
    assert!(second.from_cache());
    assert_eq!(second.opportunities, first.opportunities);
    assert_eq!(h.proxy.calls(), 1);

    let metrics = orchestrator.telemetry().metrics();
    assert_eq!(metrics.len(), 2);
    assert_eq!(
        metrics.iter().map(|m| m.cache_hit).collect::<Vec<_>>(),
        vec![false, true]
    );
    let activity = orchestrator.telemetry().activity();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].kind, ActivityKind::Search);
    assert_eq!(activity[0].source, FetchSource::Upstream);
    assert_eq!(activity[0].result_count, 3);
    assert_eq!(activity[0].query.get("q").map(String::as_str), Some("janitorial"));
    assert!(activity[0].duration_ms <= metrics[0].duration_ms);

    let json = serde_json::to_value(&activity[0]).unwrap();
    assert_eq!(json["type"], "search");
    assert_eq!(json["source"], "upstream");
}

#[tokio::test]
async fn test_activity_records_proxy_cache_source() {
    let mut page = proxy_page(fixtures::page("dla", 2));
    page.from_cache = true;
    let h = Harness::new([Ok(page)]);
    let orchestrator = h.services.orchestrator();

    let outcome = orchestrator.search(&SearchInput::new().keyword("fuel")).await.unwrap();
    assert_eq!(outcome.source, FetchSource::ProxyCache);

    let activity = orchestrator.telemetry().activity();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].source, FetchSource::ProxyCache);
    assert_eq!(activity[0].result_count, 2);
}

#[tokio::test]
async fn test_relative_range_on_later_day_misses_cache() {
    let h = Harness::new([Ok(proxy_page(fixtures::page("a", 1)))]);
    let orchestrator = h.services.orchestrator();
    let input = SearchInput::new().with("dateRange", "1month");

    let day_d = orchestrator.search(&input).await.unwrap();
    h.clock.advance(chrono::Duration::days(2));
    let day_d_plus_2 = orchestrator.search(&input).await.unwrap();

    assert_eq!(h.proxy.calls(), 2);
    assert!(!day_d.from_cache());
    assert!(!day_d_plus_2.from_cache());
    assert_eq!(day_d.params.posted_from, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
    assert_eq!(day_d_plus_2.params.posted_from, NaiveDate::from_ymd_opt(2024, 5, 12).unwrap());
    assert_ne!(day_d.params.cache_key(), day_d_plus_2.params.cache_key());
}

#[tokio::test]
async fn test_proxy_failure_logged_and_returned_unchanged() {
    let h = Harness::new([Err(429), Ok(proxy_page(fixtures::page("x", 1)))]);
    let orchestrator = h.services.orchestrator();
    let input = SearchInput::new().keyword("radar");

    match orchestrator.search(&input).await {
        Err(ClientError::Proxy { status, code, details, .. }) => {
            assert_eq!(status, 429);
            assert_eq!(code.as_deref(), Some("UPSTREAM_ERROR"));
            assert_eq!(details, Some(json!({"status": 429})));
        }
        other => panic!("expected proxy error, got {:?}", other),
    }

    let errors = orchestrator.telemetry().errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, "UPSTREAM_ERROR");
    assert_eq!(orchestrator.telemetry().metrics().len(), 1);
    assert!(orchestrator.telemetry().activity().is_empty());

    // Side channel still ran.
    let recent = orchestrator.preferences().recent_searches();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].query.get("q").map(String::as_str), Some("radar"));
    assert_eq!(orchestrator.preferences().last_visit(), Some(h.clock.now()));

    // Nothing was cached, so the retry reaches the proxy.
    let retry = orchestrator.search(&input).await.unwrap();
    assert_eq!(retry.source, FetchSource::Upstream);
    assert_eq!(h.proxy.calls(), 2);
}

#[tokio::test]
async fn test_validation_failure_skips_proxy() {
    let h = Harness::new([Ok(ProxyPage::default())]);
    let orchestrator = h.services.orchestrator();

    let err = orchestrator
        .search(&SearchInput::new().with("limit", "0"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");
    assert_eq!(h.proxy.calls(), 0);
    assert_eq!(orchestrator.telemetry().errors().len(), 1);
    assert_eq!(orchestrator.telemetry().metrics().len(), 1);
}

#[tokio::test]
async fn test_preferences_merged_into_params() {
    let h = Harness::new([Ok(ProxyPage::default())]);
    let orchestrator = h.services.orchestrator();
    orchestrator
        .preferences()
        .update(PreferencesUpdate {
            results_per_page: Some(25),
            date_range: Some(DateRangeToken::OneWeek),
            ..Default::default()
        })
        .unwrap();

    orchestrator.search(&SearchInput::new()).await.unwrap();
    let seen = h.proxy.seen();
    assert_eq!(seen[0].limit, 25);
    assert_eq!(seen[0].posted_from, NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
    assert_eq!(seen[0].posted_to, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
}

#[tokio::test]
async fn test_defaults_without_preferences() {
    let h = Harness::new([Ok(ProxyPage::default())]);
    h.services.orchestrator().search(&SearchInput::new()).await.unwrap();
    let seen = h.proxy.seen();
    assert_eq!(seen[0].limit, 10);
    assert_eq!(seen[0].posted_from, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
}

#[tokio::test]
async fn test_high_importance_results_queued_offline() {
    let page = ProxyPage {
        data: vec![
            fixtures::opportunity("plain"),
            fixtures::high_importance_opportunity("urgent"),
        ],
        total: 2,
        from_cache: true,
    };
    let h = Harness::new([Ok(page)]);
    let orchestrator = h.services.orchestrator();

    let outcome = orchestrator.search(&SearchInput::new()).await.unwrap();
    assert_eq!(outcome.source, FetchSource::ProxyCache);

    let queued = orchestrator.telemetry().offline_queue();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].opportunity.notice_id, "urgent");
}

#[tokio::test]
async fn test_empty_result_is_cached() {
    let h = Harness::new([Ok(ProxyPage::default())]);
    let orchestrator = h.services.orchestrator();
    let input = SearchInput::new().keyword("nothing matches");

    let first = orchestrator.search(&input).await.unwrap();
    let second = orchestrator.search(&input).await.unwrap();
    assert!(first.opportunities.is_empty());
    assert!(second.from_cache());
    assert_eq!(second.total, 0);
    assert_eq!(h.proxy.calls(), 1);
}

#[tokio::test]
async fn test_client_cache_expires_after_ttl() {
    let h = Harness::new([Ok(proxy_page(fixtures::page("t", 1)))]);
    let orchestrator = h.services.orchestrator();
    let input = SearchInput::new()
        .with("postedFrom", "2024-05-01")
        .with("postedTo", "2024-06-01");

    orchestrator.search(&input).await.unwrap();
    h.clock.advance_secs(24 * 3600);
    assert!(orchestrator.search(&input).await.unwrap().from_cache());
    h.clock.advance_secs(1);
    assert!(!orchestrator.search(&input).await.unwrap().from_cache());
    assert_eq!(h.proxy.calls(), 2);
}

#[tokio::test]
async fn test_hundred_twenty_searches_keep_last_hundred_metrics() {
    let h = Harness::new([Ok(ProxyPage::default())]);
    let orchestrator = h.services.orchestrator();
    for i in 0..120 {
        orchestrator
            .search(&SearchInput::new().keyword(format!("k{}", i)))
            .await
            .unwrap();
    }

    let metrics = orchestrator.telemetry().metrics();
    assert_eq!(metrics.len(), 100);
    assert_eq!(metrics[0].params_snapshot.get("q").map(String::as_str), Some("k20"));
    assert_eq!(metrics[99].params_snapshot.get("q").map(String::as_str), Some("k119"));
    assert_eq!(orchestrator.preferences().recent_searches().len(), 10);
}

#[tokio::test]
async fn test_search_summary_and_patterns_recorded() {
    let h = Harness::new([Ok(proxy_page(fixtures::page("s", 2)))]);
    let orchestrator = h.services.orchestrator();
    let outcome = orchestrator
        .search(&SearchInput::new().keyword("Roofing"))
        .await
        .unwrap();

    let summary = orchestrator.search_summary(&outcome.params).await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.notice_ids, vec!["s-0".to_string(), "s-1".to_string()]);

    let patterns = orchestrator.telemetry().search_patterns();
    assert_eq!(patterns.keywords.get("roofing"), Some(&1));
    assert_eq!(patterns.hours.get(&0), Some(&1));
}

#[tokio::test]
async fn test_view_opportunity_tracks_frequency() {
    let h = Harness::new([Ok(ProxyPage::default())]);
    let orchestrator = h.services.orchestrator();
    let popular = fixtures::opportunity("popular");
    let other = fixtures::opportunity("other");

    orchestrator.view_opportunity(&popular).await;
    orchestrator.view_opportunity(&other).await;
    assert_eq!(orchestrator.view_opportunity(&popular).await, 2);

    assert_eq!(
        orchestrator.frequently_viewed(1),
        vec![("popular".to_string(), 2)]
    );
    assert_eq!(orchestrator.cached_opportunity("other").await, Some(other));
    assert!(orchestrator
        .cache()
        .keys(Namespace::Metadata)
        .await
        .contains(&"opportunity:popular".to_string()));
}

#[tokio::test]
async fn test_shutdown_persists_telemetry() {
    let mut h = Harness::new([Ok(ProxyPage::default())]);
    h.services
        .orchestrator()
        .search(&SearchInput::new().keyword("persist me"))
        .await
        .unwrap();
    h.services.shutdown().await;
    assert!(h.config.telemetry_path().exists());

    let reopened =
        ClientServices::with_proxy(&h.config, MockProxy::new(Vec::new()), h.clock.shared()).unwrap();
    assert_eq!(reopened.orchestrator().telemetry().metrics().len(), 1);
    assert_eq!(reopened.orchestrator().preferences().recent_searches().len(), 1);
}

#[tokio::test]
async fn test_http_proxy_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/opportunities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": fixtures::page("w", 1).opportunities,
            "total": 1,
            "fromCache": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir, &server.uri());
    let services = ClientServices::from_config(&config).unwrap();
    let input = SearchInput::new().keyword("wire");

    let first = services.orchestrator().search(&input).await.unwrap();
    let second = services.orchestrator().search(&input).await.unwrap();
    assert_eq!(first.opportunities.len(), 1);
    assert!(second.from_cache());
}
