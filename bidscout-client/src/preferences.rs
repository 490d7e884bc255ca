//! User preferences, recent searches and last-visit time, kept in the
//! encrypted cookie jar.

use std::collections::BTreeMap;
use std::sync::Arc;

use bidscout_core::{DateRangeToken, Timestamp, ValidationError, DEFAULT_LIMIT, MAX_LIMIT};
use serde::{Deserialize, Serialize};

use crate::cookies::CookieJar;
use crate::error::ClientResult;

const PREFERENCES_COOKIE: &str = "preferences";
const RECENT_SEARCHES_COOKIE: &str = "recent_searches";
const LAST_VISIT_COOKIE: &str = "last_visit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// A named set of query pairs the user can re-apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedFilter {
    pub name: String,
    pub query: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub theme: Theme,
    pub results_per_page: u32,
    /// Stored as the token string so an unknown value survives a round trip.
    pub date_range: String,
    pub saved_filters: Vec<SavedFilter>,
    pub notifications_enabled: bool,
    pub auto_refresh: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            results_per_page: DEFAULT_LIMIT,
            date_range: DateRangeToken::OneMonth.as_str().to_string(),
            saved_filters: Vec::new(),
            notifications_enabled: true,
            auto_refresh: false,
        }
    }
}

impl UserPreferences {
    /// The preferred date range. Unknown tokens fall back to one month.
    pub fn date_range_token(&self) -> DateRangeToken {
        match self.date_range.parse() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(date_range = %self.date_range, error = %e, "unknown preferred date range, using 1month");
                DateRangeToken::OneMonth
            }
        }
    }
}

/// Partial update applied by [`PreferenceStore::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PreferencesUpdate {
    pub theme: Option<Theme>,
    pub results_per_page: Option<u32>,
    pub date_range: Option<DateRangeToken>,
    pub notifications_enabled: Option<bool>,
    pub auto_refresh: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentSearch {
    pub query: BTreeMap<String, String>,
    pub searched_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct PreferenceStore {
    jar: Arc<CookieJar>,
    max_recent_searches: usize,
}

impl PreferenceStore {
    pub fn new(jar: Arc<CookieJar>, max_recent_searches: usize) -> Self {
        Self {
            jar,
            max_recent_searches,
        }
    }

    /// Stored preferences, or the defaults when absent or unreadable.
    pub fn load(&self) -> UserPreferences {
        self.jar.get(PREFERENCES_COOKIE).unwrap_or_default()
    }

    pub fn save(&self, preferences: &UserPreferences) -> ClientResult<()> {
        self.jar.set(PREFERENCES_COOKIE, preferences)
    }

    /// Apply the set fields and save. A page size outside `1..=MAX_LIMIT` is
    /// rejected and nothing is saved.
    pub fn update(&self, update: PreferencesUpdate) -> ClientResult<UserPreferences> {
        if let Some(results_per_page) = update.results_per_page {
            if results_per_page == 0 || results_per_page > MAX_LIMIT {
                return Err(ValidationError::OutOfRange {
                    field: "resultsPerPage".to_string(),
                    min: 1,
                    max: i64::from(MAX_LIMIT),
                }
                .into());
            }
        }
        let mut preferences = self.load();
        if let Some(theme) = update.theme {
            preferences.theme = theme;
        }
        if let Some(results_per_page) = update.results_per_page {
            preferences.results_per_page = results_per_page;
        }
        if let Some(date_range) = update.date_range {
            preferences.date_range = date_range.as_str().to_string();
        }
        if let Some(enabled) = update.notifications_enabled {
            preferences.notifications_enabled = enabled;
        }
        if let Some(auto_refresh) = update.auto_refresh {
            preferences.auto_refresh = auto_refresh;
        }
        self.save(&preferences)?;
        Ok(preferences)
    }

    pub fn reset(&self) -> ClientResult<UserPreferences> {
        let preferences = UserPreferences::default();
        self.save(&preferences)?;
        Ok(preferences)
    }

    /// Add a filter, replacing any existing filter with the same name.
    pub fn add_saved_filter(&self, filter: SavedFilter) -> ClientResult<UserPreferences> {
        let mut preferences = self.load();
        preferences.saved_filters.retain(|f| f.name != filter.name);
        preferences.saved_filters.push(filter);
        self.save(&preferences)?;
        Ok(preferences)
    }

    pub fn remove_saved_filter(&self, name: &str) -> ClientResult<UserPreferences> {
        let mut preferences = self.load();
        preferences.saved_filters.retain(|f| f.name != name);
        self.save(&preferences)?;
        Ok(preferences)
    }

    /// Newest first.
    pub fn recent_searches(&self) -> Vec<RecentSearch> {
        self.jar.get(RECENT_SEARCHES_COOKIE).unwrap_or_default()
    }

    /// Put `query` at the front; a repeat of an earlier search moves it there.
    pub fn record_search(&self, query: BTreeMap<String, String>, at: Timestamp) -> ClientResult<()> {
        let mut searches = self.recent_searches();
        searches.retain(|s| s.query != query);
        searches.insert(0, RecentSearch { query, searched_at: at });
        searches.truncate(self.max_recent_searches);
        self.jar.set(RECENT_SEARCHES_COOKIE, &searches)
    }

    /// Keep the `max` newest searches. Returns how many were dropped.
    pub fn trim_recent_searches(&self, max: usize) -> ClientResult<usize> {
        let mut searches = self.recent_searches();
        if searches.len() <= max {
            return Ok(0);
        }
        let dropped = searches.len() - max;
        searches.truncate(max);
        self.jar.set(RECENT_SEARCHES_COOKIE, &searches)?;
        Ok(dropped)
    }

    pub fn last_visit(&self) -> Option<Timestamp> {
        self.jar.get(LAST_VISIT_COOKIE)
    }

    pub fn touch_last_visit(&self, at: Timestamp) -> ClientResult<()> {
        self.jar.set(LAST_VISIT_COOKIE, &at)
    }
}
