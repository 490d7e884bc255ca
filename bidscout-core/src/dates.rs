//! Posted-date handling: relative range tokens and upstream date formats.

use std::fmt;
use std::str::FromStr;

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

/// Date format the upstream API expects for `postedFrom` / `postedTo`.
pub const UPSTREAM_DATE_FORMAT: &str = "%m/%d/%Y";

/// ISO date format accepted from callers.
pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

/// A relative posted-date window, resolved against "today" at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DateRangeToken {
    OneWeek,
    #[default]
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
}

impl DateRangeToken {
    pub const ALL: [DateRangeToken; 5] = [
        DateRangeToken::OneWeek,
        DateRangeToken::OneMonth,
        DateRangeToken::ThreeMonths,
        DateRangeToken::SixMonths,
        DateRangeToken::OneYear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DateRangeToken::OneWeek => "1week",
            DateRangeToken::OneMonth => "1month",
            DateRangeToken::ThreeMonths => "3months",
            DateRangeToken::SixMonths => "6months",
            DateRangeToken::OneYear => "1year",
        }
    }

    /// Resolve to an absolute `(posted_from, posted_to)` window ending today.
    ///
    /// The result depends on `today`; the same token on different days gives
    /// different windows and therefore different cache keys.
    pub fn resolve(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let from = match self {
            DateRangeToken::OneWeek => today.checked_sub_days(Days::new(7)),
            DateRangeToken::OneMonth => today.checked_sub_months(Months::new(1)),
            DateRangeToken::ThreeMonths => today.checked_sub_months(Months::new(3)),
            DateRangeToken::SixMonths => today.checked_sub_months(Months::new(6)),
            DateRangeToken::OneYear => today.checked_sub_months(Months::new(12)),
        };
        (from.unwrap_or(NaiveDate::MIN), today)
    }
}

impl fmt::Display for DateRangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DateRangeToken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        DateRangeToken::ALL
            .into_iter()
            .find(|token| token.as_str() == normalized)
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "date_range".to_string(),
                reason: format!("unknown date range '{}'", s),
            })
    }
}

impl Serialize for DateRangeToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DateRangeToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a caller-supplied date in either `YYYY-MM-DD` or `MM/DD/YYYY` form.
pub fn parse_input_date(field: &str, value: &str) -> Result<NaiveDate, ValidationError> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, ISO_DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(value, UPSTREAM_DATE_FORMAT))
        .map_err(|_| ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{}' is not YYYY-MM-DD or MM/DD/YYYY", value),
        })
}

/// Render a date the way the upstream API wants it.
pub fn format_upstream_date(date: NaiveDate) -> String {
    date.format(UPSTREAM_DATE_FORMAT).to_string()
}
