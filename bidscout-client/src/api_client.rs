//! HTTP client for the BidScout proxy.

use std::time::Duration;

use async_trait::async_trait;
use bidscout_core::{Opportunity, SearchParams};
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// One page as served by the proxy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyPage {
    #[serde(default)]
    pub data: Vec<Opportunity>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub from_cache: bool,
}

/// The proxy as seen by the orchestrator.
#[async_trait]
pub trait OpportunityProxy: Send + Sync {
    async fn search(&self, params: &SearchParams) -> ClientResult<ProxyPage>;
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: String,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct HttpProxyClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProxyClient {
    pub fn new(base_url: &str, timeout: Duration) -> ClientResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        Self::new(&config.proxy_base_url, config.request_timeout())
    }

    async fn get_json<T, Q>(&self, path: &str, query: &Q) -> ClientResult<T>
    where
        T: serde::de::DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(url).query(query).send().await?;
        self.parse_response(response).await
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> ClientResult<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }
        let text = response.text().await?;
        match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(envelope) => Err(ClientError::Proxy {
                status: status.as_u16(),
                code: envelope.error.code,
                message: envelope.error.message,
                details: envelope.error.details,
            }),
            Err(_) => Err(ClientError::Proxy {
                status: status.as_u16(),
                code: None,
                message: if text.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    text
                },
                details: None,
            }),
        }
    }
}

#[async_trait]
impl OpportunityProxy for HttpProxyClient {
    async fn search(&self, params: &SearchParams) -> ClientResult<ProxyPage> {
        let query: Vec<(&str, String)> = params.canonical_pairs().into_iter().collect();
        self.get_json("/api/v1/opportunities", &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidscout_test_utils::fixtures;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params() -> SearchParams {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        SearchParams::for_range(Default::default(), today).with_keyword("cyber")
    }

    #[tokio::test]
    async fn test_search_sends_canonical_query() {
        let server = MockServer::start().await;
        let body = json!({
            "success": true,
            "data": fixtures::page("n", 2).opportunities,
            "total": 2,
            "fromCache": true
        });
        Mock::given(method("GET"))
            .and(path("/api/v1/opportunities"))
            .and(query_param("q", "cyber"))
            .and(query_param("postedFrom", "05/01/2024"))
            .and(query_param("postedTo", "06/01/2024"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpProxyClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let page = client.search(&params()).await.unwrap();
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.total, 2);
        assert!(page.from_cache);
    }

    #[tokio::test]
    async fn test_structured_error_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "success": false,
                "error": {"code": "RATE_LIMITED", "message": "slow down", "details": {"retryAfter": 60}}
            })))
            .mount(&server)
            .await;

        let client = HttpProxyClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        match client.search(&params()).await {
            Err(ClientError::Proxy { status, code, details, .. }) => {
                assert_eq!(status, 429);
                assert_eq!(code.as_deref(), Some("RATE_LIMITED"));
                assert_eq!(details, Some(json!({"retryAfter": 60})));
            }
            other => panic!("expected proxy error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unstructured_error_keeps_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let client = HttpProxyClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = client.search(&params()).await.unwrap_err();
        assert_eq!(err.code(), "HTTP_502");
    }
}
