//! Streaming server errors.
//!
//! Per-connection failures are reported as [`StreamError`] and never escape
//! the connection that caused them. [`StreamError::code`] is the code sent
//! in `error` frames.

use panelstream_sdk::SdkError;

/// Errors raised by the streaming layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Handshake carried no usable identity.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Frame could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Send to one connection failed.
    #[error("dispatch to connection {connection_id} failed: {reason}")]
    Dispatch {
        /// Connection that failed.
        connection_id: u64,
        /// What went wrong.
        reason: String,
    },

    /// Connection missed a heartbeat.
    #[error("connection {connection_id} missed its heartbeat")]
    LivenessTimeout {
        /// Connection that timed out.
        connection_id: u64,
    },

    /// Connection is no longer registered.
    #[error("unknown connection: {0}")]
    UnknownConnection(u64),

    /// Topic string is malformed or reserved.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// Producer payload failed validation.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl StreamError {
    /// Returns the code sent in `error` frames.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AUTHENTICATION",
            Self::Serialization(_) => "INVALID_MESSAGE",
            Self::Dispatch { .. } => "DISPATCH_FAILED",
            Self::LivenessTimeout { .. } => "LIVENESS_TIMEOUT",
            Self::UnknownConnection(_) => "UNKNOWN_CONNECTION",
            Self::InvalidTopic(_) => "INVALID_TOPIC",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<SdkError> for StreamError {
    fn from(err: SdkError) -> Self {
        match err {
            SdkError::InvalidTopic(topic) => Self::InvalidTopic(topic),
            SdkError::Serialization(msg) | SdkError::Deserialization(msg) => {
                Self::Serialization(msg)
            }
            other => Self::InvalidPayload(other.to_string()),
        }
    }
}
