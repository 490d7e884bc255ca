//! Error types for BidScout operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors. Fatal for the operation that needed the value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// How an upstream call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    Http,
    Network,
    Timeout,
    Decode,
}

/// Failure talking to the upstream opportunity-search API.
///
/// Carries the upstream HTTP status when one was received and whatever body
/// the upstream sent back as `details`. Never cached.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub message: String,
    pub status: Option<u16>,
    pub details: Option<serde_json::Value>,
}

impl UpstreamError {
    /// Upstream answered with a non-2xx status.
    pub fn http(status: u16, details: Option<serde_json::Value>) -> Self {
        Self {
            kind: UpstreamErrorKind::Http,
            message: format!("Upstream request failed with status {}", status),
            status: Some(status),
            details,
        }
    }

    /// Connection-level failure, no status available.
    pub fn network(reason: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Network,
            message: format!("Upstream network failure: {}", reason.into()),
            status: None,
            details: None,
        }
    }

    pub fn timeout(after_secs: u64) -> Self {
        Self {
            kind: UpstreamErrorKind::Timeout,
            message: format!("Upstream request timed out after {}s", after_secs),
            status: None,
            details: None,
        }
    }

    /// The body arrived but could not be read as JSON at all.
    pub fn decode(reason: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Decode,
            message: format!("Upstream response could not be decoded: {}", reason.into()),
            status: None,
            details: None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == Some(429)
    }
}

/// Persistence medium errors. Absorbed by the cache layer (fail-open).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Storage medium failure: {reason}")]
    Medium { reason: String },

    #[error("Cache serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Storage quota exceeded: needed {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },
}

/// Malformed input parameters, rejected before any cache or upstream work.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Value for {field} out of range: expected {min}..={max}")]
    OutOfRange { field: String, min: i64, max: i64 },
}

/// Master error type for all BidScout errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BidScoutError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Result type alias for BidScout operations.
pub type BidScoutResult<T> = Result<T, BidScoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_http_error_keeps_status_and_details() {
        let err = UpstreamError::http(429, Some(serde_json::json!({"message": "slow down"})));
        assert_eq!(err.status, Some(429));
        assert!(err.is_rate_limited());
        assert!(err.to_string().contains("429"));
        assert_eq!(err.details.as_ref().and_then(|d| d.get("message")).and_then(|m| m.as_str()), Some("slow down"));
    }

    #[test]
    fn test_network_error_has_no_status() {
        let err = UpstreamError::network("connection refused");
        assert_eq!(err.status, None);
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_umbrella_conversion() {
        let err: BidScoutError = ConfigError::MissingRequired {
            field: "BIDSCOUT_UPSTREAM_API_KEY".into(),
        }
        .into();
        assert!(matches!(err, BidScoutError::Configuration(_)));
        assert!(err.to_string().contains("BIDSCOUT_UPSTREAM_API_KEY"));
    }
}
