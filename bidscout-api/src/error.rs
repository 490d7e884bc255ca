//! Error Types for the BidScout API
//!
//! This module defines error handling for the HTTP layer:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! Errors are serialized as `{"success": false, "error": {...}}`. When the
//! failure came from the upstream API with an HTTP status, that status is
//! passed through to the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bidscout_core::{
    BidScoutError, CacheError, ConfigError, UpstreamError, UpstreamErrorKind, ValidationError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Required field is missing from request
    MissingField,

    /// Field value is out of valid range
    InvalidRange,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested opportunity does not exist upstream
    OpportunityNotFound,

    // ========================================================================
    // Upstream Errors
    // ========================================================================
    /// Upstream answered with a non-2xx status
    UpstreamError,

    /// Upstream could not be reached
    UpstreamUnavailable,

    /// Upstream did not answer in time
    Timeout,

    // ========================================================================
    // Server Errors (500)
    // ========================================================================
    /// Server is missing required configuration
    ConfigurationError,

    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed | ErrorCode::MissingField | ErrorCode::InvalidRange => {
                StatusCode::BAD_REQUEST
            }

            ErrorCode::OpportunityNotFound => StatusCode::NOT_FOUND,

            ErrorCode::UpstreamError | ErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,

            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,

            ErrorCode::ConfigurationError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::InvalidRange => "Value is out of valid range",
            ErrorCode::OpportunityNotFound => "Opportunity not found",
            ErrorCode::UpstreamError => "Upstream request failed",
            ErrorCode::UpstreamUnavailable => "Upstream service unavailable",
            ErrorCode::Timeout => "Upstream request timed out",
            ErrorCode::ConfigurationError => "Server configuration error",
            ErrorCode::InternalError => "Internal server error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details (upstream body, field errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// HTTP status received from upstream, passed through when present
    #[serde(skip)]
    pub upstream_status: Option<u16>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            upstream_status: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    ///
    /// A valid upstream status wins over the code's default.
    pub fn status_code(&self) -> StatusCode {
        self.upstream_status
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or_else(|| self.code.status_code())
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    /// Create a ValidationFailed error.
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    /// Create a MissingField error.
    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
    }

    /// Create an InvalidRange error.
    pub fn invalid_range(field: &str, min: impl fmt::Display, max: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidRange,
            format!("Field '{}' must be between {} and {}", field, min, max),
        )
    }

    /// Create an OpportunityNotFound error.
    pub fn opportunity_not_found(notice_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::OpportunityNotFound,
            format!("Opportunity {} not found", notice_id),
        )
    }

    /// Create a ConfigurationError.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message)
    }

    /// Create an InternalError.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Envelope every failed response is wrapped in.
#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    success: bool,
    error: &'a ApiError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorEnvelope {
            success: false,
            error: &self,
        })
        .into_response();
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match &err {
            ValidationError::RequiredFieldMissing { field } => ApiError::missing_field(field),
            ValidationError::OutOfRange { field, min, max } => ApiError::invalid_range(field, min, max),
            ValidationError::InvalidValue { .. } => ApiError::validation_failed(err.to_string()),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::configuration(err.to_string())
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        let code = match err.kind {
            UpstreamErrorKind::Http => ErrorCode::UpstreamError,
            UpstreamErrorKind::Timeout => ErrorCode::Timeout,
            UpstreamErrorKind::Network | UpstreamErrorKind::Decode => ErrorCode::UpstreamUnavailable,
        };
        Self {
            code,
            message: err.message,
            details: err.details,
            upstream_status: err.status,
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::internal_error(err.to_string())
    }
}

impl From<BidScoutError> for ApiError {
    fn from(err: BidScoutError) -> Self {
        match err {
            BidScoutError::Configuration(e) => e.into(),
            BidScoutError::Upstream(e) => e.into(),
            BidScoutError::Cache(e) => e.into(),
            BidScoutError::Validation(e) => e.into(),
        }
    }
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::ValidationFailed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::OpportunityNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::UpstreamUnavailable.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(ErrorCode::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ErrorCode::ConfigurationError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upstream_status_passes_through() {
        let err: ApiError = UpstreamError::http(429, Some(serde_json::json!({"code": "900804"}))).into();
        assert_eq!(err.code, ErrorCode::UpstreamError);
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let err: ApiError = UpstreamError::timeout(10).into();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_validation_conversion() {
        let err: ApiError = ValidationError::OutOfRange {
            field: "limit".into(),
            min: 1,
            max: 100,
        }
        .into();
        assert_eq!(err.code, ErrorCode::InvalidRange);
        assert!(err.message.contains("limit"));
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::ConfigurationError).unwrap();
        assert_eq!(json, "\"CONFIGURATION_ERROR\"");
    }

    #[tokio::test]
    async fn test_response_envelope() {
        let err: ApiError = UpstreamError::http(429, Some(serde_json::json!({"retry": true}))).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "UPSTREAM_ERROR");
        assert_eq!(json["error"]["details"]["retry"], true);
        assert!(json["error"]["message"].as_str().unwrap().contains("429"));
    }
}
