//! Error types for the client.

use bidscout_core::{BidScoutError, ConfigError, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The proxy answered with a structured failure.
    #[error("Proxy error {status}: {message}")]
    Proxy {
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Settings(#[from] crate::config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Encryption error: {0}")]
    Encryption(String),
}

impl ClientError {
    /// Short machine-readable code for the error log.
    pub fn code(&self) -> String {
        match self {
            ClientError::Http(e) if e.is_timeout() => "TIMEOUT".to_string(),
            ClientError::Http(_) => "NETWORK_ERROR".to_string(),
            ClientError::Proxy { code: Some(code), .. } => code.clone(),
            ClientError::Proxy { status, .. } => format!("HTTP_{}", status),
            ClientError::Validation(_) => "VALIDATION_FAILED".to_string(),
            ClientError::Configuration(_) | ClientError::Settings(_) => {
                "CONFIGURATION_ERROR".to_string()
            }
            ClientError::Serialization(_) => "SERIALIZATION_ERROR".to_string(),
            ClientError::Persistence(_) => "PERSISTENCE_ERROR".to_string(),
            ClientError::Encryption(_) => "ENCRYPTION_ERROR".to_string(),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Persistence(err.to_string())
    }
}

impl From<BidScoutError> for ClientError {
    fn from(err: BidScoutError) -> Self {
        match err {
            BidScoutError::Validation(e) => ClientError::Validation(e),
            BidScoutError::Configuration(e) => ClientError::Configuration(e),
            BidScoutError::Upstream(e) => ClientError::Proxy {
                status: e.status.unwrap_or(502),
                code: None,
                message: e.message,
                details: e.details,
            },
            BidScoutError::Cache(e) => ClientError::Persistence(e.to_string()),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_error_code_prefers_server_code() {
        let err = ClientError::Proxy {
            status: 429,
            code: Some("UPSTREAM_ERROR".to_string()),
            message: "rate limited".to_string(),
            details: None,
        };
        assert_eq!(err.code(), "UPSTREAM_ERROR");

        let err = ClientError::Proxy {
            status: 503,
            code: None,
            message: "unavailable".to_string(),
            details: None,
        };
        assert_eq!(err.code(), "HTTP_503");
    }

    #[test]
    fn test_validation_code() {
        let err: ClientError = ValidationError::RequiredFieldMissing {
            field: "q".to_string(),
        }
        .into();
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }
}
