//! Connection manager errors.

use tokio_tungstenite::tungstenite;

/// Errors raised by the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    /// The socket could not be opened.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The transport failed after the socket was open.
    #[error("protocol error: {0}")]
    Protocol(#[from] tungstenite::Error),

    /// A control message could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No socket is open right now.
    #[error("not connected")]
    NotConnected,

    /// The server closed the session in a way a retry cannot fix.
    #[error("server refused session ({code}): {reason}")]
    Refused {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// Retries stopped at the configured limit.
    #[error("reconnect gave up after {0} attempts")]
    ReconnectExhausted(u32),

    /// The manager was disposed.
    #[error("connection manager disposed")]
    Disposed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The outbound queue rejected the message.
    #[error("send failed: {0}")]
    SendFailed(String),
}

impl WsError {
    /// Returns true if a later attempt could succeed without caller action.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Protocol(_) | Self::NotConnected | Self::SendFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = WsError::Connection("timeout".to_string());
        assert_eq!(err.to_string(), "connection failed: timeout");
        assert_eq!(
            WsError::ReconnectExhausted(5).to_string(),
            "reconnect gave up after 5 attempts"
        );
    }

    #[test]
    fn test_transient() {
        assert!(WsError::NotConnected.is_transient());
        assert!(WsError::SendFailed("outbound queue full".into()).is_transient());
        assert!(!WsError::Disposed.is_transient());
        assert!(!WsError::ReconnectExhausted(3).is_transient());
        let refused = WsError::Refused {
            code: 1008,
            reason: "missing userId".into(),
        };
        assert!(!refused.is_transient());
        assert_eq!(refused.to_string(), "server refused session (1008): missing userId");
    }

    #[test]
    fn test_from_serde() {
        let err = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json");
        assert!(matches!(WsError::from(err), WsError::Serialization(_)));
    }
}
