//! Snapshot client errors.

use thiserror::Error;

/// Errors returned by [`SnapshotClient`](super::SnapshotClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure.
    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    /// Body did not match the expected shape.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Non-success status with a server-provided message.
    #[error("API error [{status}]: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Rate limited (429) after retries.
    #[error("rate limited")]
    RateLimited {
        /// Seconds the server asked us to wait.
        retry_after: Option<u64>,
    },

    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Request timed out after retries.
    #[error("request timeout")]
    Timeout,
}

impl ClientError {
    /// Returns true for failures worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Request(e) => e.is_connect(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Request(err)
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_display() {
        let err = ClientError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "API error [500]: boom");
        assert_eq!(
            ClientError::NotFound("/market/prices".to_string()).to_string(),
            "not found: /market/prices"
        );
    }

    #[test]
    fn test_client_error_retryable() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::RateLimited { retry_after: None }.is_retryable());
        assert!(ClientError::Api {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!ClientError::Api {
            status: 400,
            message: String::new()
        }
        .is_retryable());
        assert!(!ClientError::NotFound("x".to_string()).is_retryable());
    }

    #[test]
    fn test_client_error_from_json() {
        let err = serde_json::from_str::<u32>("nope").map_err(ClientError::from);
        assert!(matches!(err, Err(ClientError::Deserialization(_))));
    }
}
