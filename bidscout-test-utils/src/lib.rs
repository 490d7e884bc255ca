//! BidScout Test Utilities
//!
//! Shared test infrastructure for the BidScout workspace:
//! - A manually driven clock
//! - Scripted response queues for mock upstreams and proxies
//! - Proptest generators for search parameters
//! - Fixtures for opportunities and raw upstream bodies
//! - Assertions for cache entry bookkeeping

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub use bidscout_core::{
    BidScoutError, BidScoutResult, Clock, DateRangeToken, Opportunity, OpportunityPage,
    SearchParams, SharedClock, Timestamp,
};
pub use bidscout_storage::{CacheEntry, MemoryMedium, Namespace, TtlCache, TtlPolicy};

use chrono::{Duration, TimeZone, Utc};

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Midnight UTC on the given day.
    pub fn at_date(year: i32, month: u32, day: u32) -> Self {
        let start = Utc
            .with_ymd_and_hms(year, month, day, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(start)
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }

    /// A shareable handle onto this same clock.
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An in-memory cache driven by `clock`, with a generous quota.
pub fn memory_cache(clock: &ManualClock) -> TtlCache {
    memory_cache_with_quota(clock, 16 * 1024 * 1024)
}

pub fn memory_cache_with_quota(clock: &ManualClock, quota_bytes: u64) -> TtlCache {
    TtlCache::new(
        Arc::new(MemoryMedium::new(quota_bytes)),
        TtlPolicy::default(),
        clock.shared(),
    )
}

// ============================================================================
// SCRIPTED RESPONSES
// ============================================================================

/// A queue of canned results for mock collaborators.
///
/// Results are handed out in order; once one remains it repeats forever.
/// Every call is counted, including calls on an empty script.
#[derive(Debug)]
pub struct Script<T> {
    responses: Mutex<VecDeque<T>>,
    calls: AtomicUsize,
}

impl<T: Clone> Script<T> {
    pub fn new(responses: impl IntoIterator<Item = T>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Record a call and return the next scripted result.
    pub fn next(&self) -> Option<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().cloned()
        }
    }

    pub fn push(&self, response: T) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for search inputs.

    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    pub fn arb_date_range_token() -> impl Strategy<Value = DateRangeToken> {
        prop_oneof![
            Just(DateRangeToken::OneWeek),
            Just(DateRangeToken::OneMonth),
            Just(DateRangeToken::ThreeMonths),
            Just(DateRangeToken::SixMonths),
            Just(DateRangeToken::OneYear),
        ]
    }

    /// Days between 2020-01-01 and roughly 2030.
    pub fn arb_date() -> impl Strategy<Value = NaiveDate> {
        (0i64..3650).prop_map(|offset| {
            NaiveDate::from_ymd_opt(2020, 1, 1)
                .map(|base| base + Duration::days(offset))
                .expect("valid base date")
        })
    }

    pub fn arb_keyword() -> impl Strategy<Value = Option<String>> {
        proptest::option::of("[a-z]{3,12}( [a-z]{3,12}){0,2}")
    }

    /// Name/value pairs as they would arrive in a query string.
    pub fn arb_query_pairs() -> impl Strategy<Value = Vec<(String, String)>> {
        (
            arb_keyword(),
            proptest::option::of(prop_oneof![Just("541330"), Just("236220"), Just("561720")]),
            proptest::option::of(prop_oneof![Just("SBA"), Just("8A"), Just("WOSB")]),
            proptest::option::of(prop_oneof![Just("o"), Just("p"), Just("k")]),
            1u32..=100,
            1u32..=20,
        )
            .prop_map(|(keyword, naics, set_aside, notice_type, limit, page)| {
                let mut pairs = vec![
                    ("limit".to_string(), limit.to_string()),
                    ("page".to_string(), page.to_string()),
                ];
                if let Some(k) = keyword {
                    pairs.push(("q".to_string(), k));
                }
                if let Some(n) = naics {
                    pairs.push(("naicsCodes".to_string(), n.to_string()));
                }
                if let Some(s) = set_aside {
                    pairs.push(("setAsides".to_string(), s.to_string()));
                }
                if let Some(t) = notice_type {
                    pairs.push(("type".to_string(), t.to_string()));
                }
                pairs
            })
    }

    /// Valid search parameters anchored at `today`.
    pub fn arb_search_params(today: NaiveDate) -> impl Strategy<Value = SearchParams> {
        (arb_date_range_token(), arb_keyword(), 1u32..=100, 1u32..=20).prop_map(
            move |(range, keyword, limit, page)| {
                let mut params = SearchParams::for_range(range, today).with_limit(limit).with_page(page);
                if let Some(k) = keyword {
                    params = params.with_keyword(k);
                }
                params
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built opportunities and raw upstream bodies.

    use super::*;
    use bidscout_core::{AgencyHierarchy, Importance, SetAside};
    use serde_json::{json, Value};

    /// A minimal canonical opportunity.
    pub fn opportunity(notice_id: &str) -> Opportunity {
        Opportunity {
            notice_id: notice_id.to_string(),
            title: format!("Opportunity {}", notice_id),
            solicitation_number: None,
            notice_type: Some("o".to_string()),
            posted_date: None,
            response_deadline: None,
            description: None,
            agency: AgencyHierarchy {
                department: Some("GENERAL SERVICES ADMINISTRATION".to_string()),
                ..AgencyHierarchy::default()
            },
            location: None,
            naics_code: Some("541330".to_string()),
            set_aside: Some(SetAside {
                code: "SBA".to_string(),
                description: Some("Total Small Business Set-Aside".to_string()),
            }),
            estimated_value: None,
            ui_link: None,
            active: true,
            importance: None,
        }
    }

    /// An opportunity flagged for offline access.
    pub fn high_importance_opportunity(notice_id: &str) -> Opportunity {
        Opportunity {
            importance: Some(Importance::High),
            ..opportunity(notice_id)
        }
    }

    /// A page holding `count` opportunities with ids `{prefix}-0 ..`.
    pub fn page(prefix: &str, count: usize) -> OpportunityPage {
        OpportunityPage {
            opportunities: (0..count).map(|i| opportunity(&format!("{}-{}", prefix, i))).collect(),
            total: count as u64,
        }
    }

    /// One record in the upstream's raw shape.
    pub fn raw_record(notice_id: &str, title: &str) -> Value {
        json!({
            "noticeId": notice_id,
            "title": title,
            "solicitationNumber": format!("SOL-{}", notice_id),
            "fullParentPathName": "GENERAL SERVICES ADMINISTRATION.FEDERAL ACQUISITION SERVICE.PBS",
            "postedDate": "2024-05-01",
            "type": "o",
            "typeOfSetAside": "SBA",
            "typeOfSetAsideDescription": "Total Small Business Set-Aside",
            "responseDeadLine": "2024-06-30T17:00:00-04:00",
            "naicsCode": "541330",
            "active": "Yes",
            "placeOfPerformance": {"state": {"code": "VA"}, "zip": "22201"},
            "uiLink": format!("https://sam.gov/opp/{}/view", notice_id)
        })
    }

    /// A raw search body with `count` records.
    pub fn raw_search_body(count: usize) -> Value {
        let records: Vec<Value> = (0..count)
            .map(|i| raw_record(&format!("notice-{}", i), &format!("Opportunity {}", i)))
            .collect();
        json!({"totalRecords": count, "opportunitiesData": records})
    }

    /// The upstream's empty answer.
    pub fn raw_empty_body() -> Value {
        json!({"totalRecords": 0, "opportunitiesData": []})
    }

    /// A typical rate-limit error body.
    pub fn raw_rate_limit_body() -> Value {
        json!({
            "error": {
                "code": "OVER_RATE_LIMIT",
                "message": "The API key has exceeded the rate limit"
            }
        })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache bookkeeping.

    use super::*;

    /// Assert the entry's access bookkeeping is consistent.
    #[track_caller]
    pub fn assert_entry_consistent(entry: &CacheEntry) {
        assert!(
            entry.stored_at <= entry.last_accessed,
            "stored_at {} is after last_accessed {}",
            entry.stored_at,
            entry.last_accessed
        );
        assert!(entry.access_count >= 1, "access_count is zero for {}", entry.key);
    }

    /// Assert a result is a configuration error.
    #[track_caller]
    pub fn assert_configuration_error<T: std::fmt::Debug>(result: &BidScoutResult<T>) {
        match result {
            Err(BidScoutError::Configuration(_)) => {}
            other => panic!("Expected Configuration error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_date(2024, 6, 1);
        let start = clock.now();
        clock.advance_secs(90);
        assert_eq!(clock.now() - start, Duration::seconds(90));

        let shared = clock.shared();
        clock.advance_secs(10);
        assert_eq!(shared.now() - start, Duration::seconds(100));
    }

    #[test]
    fn test_script_repeats_last() {
        let script = Script::new(vec![1, 2]);
        assert_eq!(script.next(), Some(1));
        assert_eq!(script.next(), Some(2));
        assert_eq!(script.next(), Some(2));
        assert_eq!(script.calls(), 3);
    }

    #[test]
    fn test_empty_script_counts_calls() {
        let script: Script<u8> = Script::new(vec![]);
        assert_eq!(script.next(), None);
        assert_eq!(script.calls(), 1);
    }

    #[test]
    fn test_raw_body_transforms() {
        let page = bidscout_core::transform_search_body(&fixtures::raw_search_body(3));
        assert_eq!(page.total, 3);
        assert_eq!(page.opportunities[2].notice_id, "notice-2");
    }
}
