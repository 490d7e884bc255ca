//! Normalized search parameters and the deterministic cache key derived from them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::dates::{format_upstream_date, parse_input_date, DateRangeToken};
use crate::error::ValidationError;

/// Default page size when neither the caller nor preferences specify one.
pub const DEFAULT_LIMIT: u32 = 10;

/// Largest page size the upstream API accepts.
pub const MAX_LIMIT: u32 = 100;

/// Characters stripped from free-text keywords before they reach the upstream.
const KEYWORD_STRIP_CHARS: &[char] = &['<', '>', '{', '}', '(', ')'];

/// Fully resolved, validated search parameters.
///
/// Dates are always absolute here; relative tokens are resolved before a
/// `SearchParams` is built. Field names on the wire follow the upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    pub keyword: Option<String>,
    pub naics_code: Option<String>,
    pub set_aside: Option<String>,
    pub notice_type: Option<String>,
    pub notice_id: Option<String>,
    pub organization_id: Option<String>,
    pub organization_name: Option<String>,
    pub state: Option<String>,
    pub zipcode: Option<String>,
    pub active: Option<bool>,
    pub posted_from: NaiveDate,
    pub posted_to: NaiveDate,
    pub limit: u32,
    pub offset: u32,
}

impl SearchParams {
    /// Parameters for an explicit posted-date window, first page, default size.
    pub fn new(posted_from: NaiveDate, posted_to: NaiveDate) -> Self {
        Self {
            keyword: None,
            naics_code: None,
            set_aside: None,
            notice_type: None,
            notice_id: None,
            organization_id: None,
            organization_name: None,
            state: None,
            zipcode: None,
            active: None,
            posted_from,
            posted_to,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }

    /// Parameters for a relative window resolved against `today`.
    pub fn for_range(range: DateRangeToken, today: NaiveDate) -> Self {
        let (from, to) = range.resolve(today);
        Self::new(from, to)
    }

    pub fn with_keyword(mut self, keyword: impl AsRef<str>) -> Self {
        self.keyword = sanitize_keyword(keyword.as_ref());
        self
    }

    pub fn with_naics_code(mut self, code: impl Into<String>) -> Self {
        self.naics_code = non_empty(code.into());
        self
    }

    pub fn with_set_aside(mut self, set_aside: impl Into<String>) -> Self {
        self.set_aside = non_empty(set_aside.into());
        self
    }

    pub fn with_notice_type(mut self, notice_type: impl Into<String>) -> Self {
        self.notice_type = non_empty(notice_type.into());
        self
    }

    pub fn with_notice_id(mut self, notice_id: impl Into<String>) -> Self {
        self.notice_id = non_empty(notice_id.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = non_empty(state.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Set the 1-based page; the offset follows from the current limit.
    pub fn with_page(mut self, page: u32) -> Self {
        self.offset = page.saturating_sub(1).saturating_mul(self.limit);
        self
    }

    pub fn page(&self) -> u32 {
        if self.limit == 0 {
            1
        } else {
            self.offset / self.limit + 1
        }
    }

    /// Build parameters from unordered name/value pairs, e.g. a query string.
    ///
    /// Unknown names are ignored. Missing dates default to `default_range`
    /// resolved against `today`. `page` is applied after `limit` regardless of
    /// the order the pairs arrive in.
    pub fn from_pairs<I, K, V>(
        pairs: I,
        default_range: DateRangeToken,
        today: NaiveDate,
    ) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut params = Self::for_range(default_range, today);
        let mut page: Option<u32> = None;
        let mut range_override: Option<DateRangeToken> = None;
        let mut from: Option<NaiveDate> = None;
        let mut to: Option<NaiveDate> = None;

        for (name, value) in pairs {
            let value = value.as_ref();
            match name.as_ref() {
                "q" | "keyword" => params.keyword = sanitize_keyword(value),
                "naicsCodes" | "naicsCode" | "naics_code" => params.naics_code = non_empty(value.to_string()),
                "setAsides" | "setAside" | "set_aside" => params.set_aside = non_empty(value.to_string()),
                "type" | "noticeType" | "notice_type" => params.notice_type = non_empty(value.to_string()),
                "noticeid" | "noticeId" | "notice_id" => params.notice_id = non_empty(value.to_string()),
                "organizationId" | "organization_id" => params.organization_id = non_empty(value.to_string()),
                "organizationName" | "organization_name" => {
                    params.organization_name = non_empty(value.to_string())
                }
                "placeOfPerformanceState" | "state" => params.state = non_empty(value.to_string()),
                "placeOfPerformanceZipcode" | "zipcode" => params.zipcode = non_empty(value.to_string()),
                "active" => params.active = Some(parse_bool("active", value)?),
                "postedFrom" | "posted_from" => from = Some(parse_input_date("postedFrom", value)?),
                "postedTo" | "posted_to" => to = Some(parse_input_date("postedTo", value)?),
                "dateRange" | "date_range" => range_override = Some(value.parse()?),
                "limit" => params.limit = parse_u32("limit", value)?,
                "offset" => params.offset = parse_u32("offset", value)?,
                "page" => page = Some(parse_u32("page", value)?),
                _ => {}
            }
        }

        if let Some(range) = range_override {
            let (range_from, range_to) = range.resolve(today);
            params.posted_from = range_from;
            params.posted_to = range_to;
        }
        if let Some(from) = from {
            params.posted_from = from;
        }
        if let Some(to) = to {
            params.posted_to = to;
        }
        if let Some(page) = page {
            if page == 0 {
                return Err(ValidationError::OutOfRange {
                    field: "page".to_string(),
                    min: 1,
                    max: i64::from(u32::MAX),
                });
            }
            params = params.with_page(page);
        }

        params.validate()?;
        Ok(params)
    }

    /// Check ranges and date ordering.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(ValidationError::OutOfRange {
                field: "limit".to_string(),
                min: 1,
                max: i64::from(MAX_LIMIT),
            });
        }
        if self.posted_from > self.posted_to {
            return Err(ValidationError::InvalidValue {
                field: "postedFrom".to_string(),
                reason: format!(
                    "{} is after postedTo {}",
                    self.posted_from, self.posted_to
                ),
            });
        }
        Ok(())
    }

    /// The full parameter set under upstream names, sorted by name.
    ///
    /// This is both the upstream query (minus the credential) and the input to
    /// [`CacheKey`] derivation, so a cached entry always corresponds to exactly
    /// one upstream request.
    pub fn canonical_pairs(&self) -> BTreeMap<&'static str, String> {
        let mut pairs = BTreeMap::new();
        let optional = [
            ("q", &self.keyword),
            ("naicsCodes", &self.naics_code),
            ("setAsides", &self.set_aside),
            ("type", &self.notice_type),
            ("noticeid", &self.notice_id),
            ("organizationId", &self.organization_id),
            ("organizationName", &self.organization_name),
            ("placeOfPerformanceState", &self.state),
            ("placeOfPerformanceZipcode", &self.zipcode),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                pairs.insert(name, value.clone());
            }
        }
        if let Some(active) = self.active {
            pairs.insert("active", if active { "Yes" } else { "No" }.to_string());
        }
        pairs.insert("postedFrom", format_upstream_date(self.posted_from));
        pairs.insert("postedTo", format_upstream_date(self.posted_to));
        pairs.insert("limit", self.limit.to_string());
        pairs.insert("offset", self.offset.to_string());
        pairs
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_canonical(&self.canonical_pairs())
    }
}

/// Deterministic cache key for a parameter set.
///
/// Derived by hashing the name-sorted pairs, each name and value prefixed
/// with its byte length, so the key is independent of the order in which the
/// parameters were supplied and no value can spell out another pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    const PREFIX: &'static str = "search:v1:";

    fn from_canonical(pairs: &BTreeMap<&'static str, String>) -> Self {
        let mut hasher = Sha256::new();
        for (name, value) in pairs {
            for part in [name.as_bytes(), value.as_bytes()] {
                hasher.update((part.len() as u64).to_be_bytes());
                hasher.update(part);
            }
        }
        Self(format!("{}{}", Self::PREFIX, hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strip markup-ish characters and surrounding whitespace from a keyword.
pub fn sanitize_keyword(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| !KEYWORD_STRIP_CHARS.contains(c)).collect();
    non_empty(cleaned)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_u32(field: &str, value: &str) -> Result<u32, ValidationError> {
    value.trim().parse().map_err(|_| ValidationError::InvalidValue {
        field: field.to_string(),
        reason: format!("'{}' is not a non-negative integer", value),
    })
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ValidationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{}' is not a boolean", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn test_pair_order_does_not_change_key() {
        let a = SearchParams::from_pairs(
            [("q", "cyber"), ("limit", "25"), ("naicsCodes", "541512"), ("page", "2")],
            DateRangeToken::OneMonth,
            today(),
        )
        .unwrap();
        let b = SearchParams::from_pairs(
            [("page", "2"), ("naicsCodes", "541512"), ("q", "cyber"), ("limit", "25")],
            DateRangeToken::OneMonth,
            today(),
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.offset, 25);
    }

    #[test]
    fn test_builder_and_pairs_agree() {
        let built = SearchParams::for_range(DateRangeToken::OneMonth, today())
            .with_keyword("cyber")
            .with_limit(25)
            .with_page(2);
        let parsed = SearchParams::from_pairs(
            [("page", "2"), ("limit", "25"), ("keyword", "cyber")],
            DateRangeToken::OneMonth,
            today(),
        )
        .unwrap();
        assert_eq!(built.cache_key(), parsed.cache_key());
    }

    #[test]
    fn test_different_values_change_key() {
        let base = SearchParams::for_range(DateRangeToken::OneMonth, today());
        let other = base.clone().with_page(2);
        assert_ne!(base.cache_key(), other.cache_key());
    }

    #[test]
    fn test_canonical_pairs_roundtrip_through_from_pairs() {
        let params = SearchParams::for_range(DateRangeToken::ThreeMonths, today())
            .with_keyword("bridge repair")
            .with_state("VA")
            .with_limit(50)
            .with_page(3);
        let reparsed = SearchParams::from_pairs(
            params.canonical_pairs(),
            DateRangeToken::OneMonth,
            today(),
        )
        .unwrap();
        assert_eq!(params, reparsed);
    }

    #[test]
    fn test_keyword_sanitized() {
        assert_eq!(sanitize_keyword("  <script>(x) "), Some("scriptx".to_string()));
        assert_eq!(sanitize_keyword("{}()"), None);
    }

    #[test]
    fn test_limit_out_of_range_rejected() {
        let err = SearchParams::from_pairs([("limit", "500")], DateRangeToken::OneMonth, today())
            .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { ref field, .. } if field == "limit"));
    }

    #[test]
    fn test_zero_page_rejected() {
        assert!(SearchParams::from_pairs([("page", "0")], DateRangeToken::OneMonth, today()).is_err());
    }

    #[test]
    fn test_inverted_dates_rejected() {
        let err = SearchParams::from_pairs(
            [("postedFrom", "2024-05-10"), ("postedTo", "2024-05-01")],
            DateRangeToken::OneMonth,
            today(),
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { .. }));
    }

    #[test]
    fn test_upstream_dates_in_canonical_pairs() {
        let params = SearchParams::for_range(DateRangeToken::OneMonth, today());
        let pairs = params.canonical_pairs();
        assert_eq!(pairs.get("postedFrom").map(String::as_str), Some("05/01/2024"));
        assert_eq!(pairs.get("postedTo").map(String::as_str), Some("06/01/2024"));
        assert_eq!(pairs.get("offset").map(String::as_str), Some("0"));
    }

    #[test]
    fn test_relative_token_on_different_days_changes_key() {
        let day_d = SearchParams::for_range(DateRangeToken::OneMonth, today());
        let day_d2 = SearchParams::for_range(
            DateRangeToken::OneMonth,
            today().succ_opt().and_then(|d| d.succ_opt()).unwrap(),
        );
        assert_ne!(day_d.posted_from, day_d2.posted_from);
        assert_ne!(day_d.cache_key(), day_d2.cache_key());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    proptest! {
        #[test]
        fn prop_key_independent_of_pair_order(
            keyword in "[a-z]{1,12}",
            naics in "[0-9]{6}",
            limit in 1u32..=100,
            page in 1u32..20,
            rotate in 0usize..5,
        ) {
            let limit_s = limit.to_string();
            let page_s = page.to_string();
            let mut pairs = vec![
                ("q", keyword.as_str()),
                ("naicsCodes", naics.as_str()),
                ("limit", limit_s.as_str()),
                ("page", page_s.as_str()),
                ("type", "o"),
            ];
            let forward = SearchParams::from_pairs(pairs.clone(), DateRangeToken::OneMonth, today()).unwrap();
            pairs.rotate_left(rotate);
            pairs.reverse();
            let shuffled = SearchParams::from_pairs(pairs, DateRangeToken::OneMonth, today()).unwrap();
            prop_assert_eq!(forward.cache_key(), shuffled.cache_key());
        }

        #[test]
        fn prop_separator_in_keyword_never_aliases_split_pairs(
            head in "[a-z]{1,8}",
            tail in "[a-z]{1,8}",
        ) {
            let (from, to) = DateRangeToken::OneMonth.resolve(today());
            let joined = SearchParams::new(from, to).with_keyword(format!("{}&type={}", head, tail));
            let split = SearchParams::new(from, to).with_keyword(&head).with_notice_type(tail.clone());
            prop_assert_ne!(joined.cache_key(), split.cache_key());
        }
    }

    #[test]
    fn test_keyword_containing_pair_syntax_gets_own_key() {
        let (from, to) = DateRangeToken::OneMonth.resolve(today());
        let joined = SearchParams::new(from, to).with_keyword("x&type=o");
        let split = SearchParams::new(from, to).with_keyword("x").with_notice_type("o");
        assert_eq!(joined.keyword.as_deref(), Some("x&type=o"));
        assert_ne!(joined.cache_key(), split.cache_key());
    }
}
