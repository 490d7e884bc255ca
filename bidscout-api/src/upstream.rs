//! Client for the upstream opportunity-search API.

use std::time::Duration;

use async_trait::async_trait;
use bidscout_core::{BidScoutError, ConfigError, SearchParams, UpstreamError};
use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::config::ApiConfig;

/// Environment variable holding the upstream credential, for error messages.
pub const API_KEY_FIELD: &str = "BIDSCOUT_UPSTREAM_API_KEY";

/// A source of raw upstream search bodies.
///
/// The proxy layer only sees this trait, so tests can substitute a scripted
/// source for the HTTP client.
#[async_trait]
pub trait OpportunitySource: Send + Sync {
    /// Fail fast if the source cannot authenticate.
    fn check_credentials(&self) -> Result<(), ConfigError>;

    /// Run one upstream search and return the raw JSON body.
    ///
    /// An empty or non-JSON 2xx body is returned as `Value::Null`, which the
    /// transform turns into an empty page.
    async fn search(&self, params: &SearchParams) -> Result<Value, BidScoutError>;
}

/// HTTP client for the SAM.gov-style search endpoint.
pub struct UpstreamClient {
    http: reqwest::Client,
    search_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("search_url", &self.search_url)
            .field("has_api_key", &self.api_key.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl UpstreamClient {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, BidScoutError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "upstream_client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            search_url: format!("{}/search", base_url.trim_end_matches('/')),
            api_key,
            timeout,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, BidScoutError> {
        Self::new(
            &config.upstream_base_url,
            config.upstream_api_key.clone(),
            config.upstream_timeout,
        )
    }

    fn map_transport_error(&self, e: reqwest::Error) -> UpstreamError {
        if e.is_timeout() {
            UpstreamError::timeout(self.timeout.as_secs())
        } else {
            UpstreamError::network(e.to_string())
        }
    }
}

#[async_trait]
impl OpportunitySource for UpstreamClient {
    fn check_credentials(&self) -> Result<(), ConfigError> {
        match &self.api_key {
            Some(_) => Ok(()),
            None => Err(ConfigError::MissingRequired {
                field: API_KEY_FIELD.to_string(),
            }),
        }
    }

    async fn search(&self, params: &SearchParams) -> Result<Value, BidScoutError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| ConfigError::MissingRequired {
            field: API_KEY_FIELD.to_string(),
        })?;

        let mut query: Vec<(&str, String)> = params.canonical_pairs().into_iter().collect();
        query.push(("api_key", api_key.expose_secret().to_string()));

        tracing::debug!(url = %self.search_url, params = ?params.canonical_pairs(), "calling upstream");

        let response = self
            .http
            .get(&self.search_url)
            .header(ACCEPT, "application/json")
            .query(&query)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            let details = if body.trim().is_empty() {
                None
            } else {
                Some(serde_json::from_str(&body).unwrap_or(Value::String(body)))
            };
            return Err(UpstreamError::http(status.as_u16(), details).into());
        }

        if body.trim().is_empty() {
            tracing::warn!(status = status.as_u16(), "upstream returned an empty body");
            return Ok(Value::Null);
        }
        match serde_json::from_str(&body) {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(error = %e, "upstream returned malformed JSON, treating as no results");
                Ok(Value::Null)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidscout_core::{DateRangeToken, UpstreamErrorKind};
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params() -> SearchParams {
        SearchParams::for_range(DateRangeToken::OneMonth, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
            .with_keyword("radar")
    }

    fn client(server: &MockServer, key: Option<&str>) -> UpstreamClient {
        UpstreamClient::new(
            &server.uri(),
            key.map(|k| SecretString::from(k.to_string())),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sends_upstream_query_with_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("api_key", "k-123"))
            .and(query_param("postedFrom", "05/01/2024"))
            .and(query_param("postedTo", "06/01/2024"))
            .and(query_param("q", "radar"))
            .and(query_param("limit", "10"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"totalRecords": 0, "opportunitiesData": []})))
            .expect(1)
            .mount(&server)
            .await;

        let body = client(&server, Some("k-123")).search(&params()).await.unwrap();
        assert_eq!(body["totalRecords"], 0);
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let upstream = client(&server, None);
        assert!(upstream.check_credentials().is_err());
        let err = upstream.search(&params()).await.unwrap_err();
        assert!(matches!(err, BidScoutError::Configuration(ConfigError::MissingRequired { .. })));
    }

    #[tokio::test]
    async fn test_non_2xx_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": "OVER_RATE_LIMIT"})))
            .mount(&server)
            .await;

        let err = client(&server, Some("k")).search(&params()).await.unwrap_err();
        match err {
            BidScoutError::Upstream(e) => {
                assert_eq!(e.kind, UpstreamErrorKind::Http);
                assert_eq!(e.status, Some(429));
                assert_eq!(e.details, Some(json!({"error": "OVER_RATE_LIMIT"})));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let body = client(&server, Some("k")).search(&params()).await.unwrap();
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let upstream = UpstreamClient::new(
            &server.uri(),
            Some(SecretString::from("k".to_string())),
            Duration::from_millis(200),
        )
        .unwrap();
        let err = upstream.search(&params()).await.unwrap_err();
        assert!(matches!(err, BidScoutError::Upstream(UpstreamError { kind: UpstreamErrorKind::Timeout, .. })));
    }
}
