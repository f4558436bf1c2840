//! WebSocket configuration.
//!
//! Provides configuration options for the connection manager.

use std::time::Duration;

use super::error::WsError;

/// Default WebSocket URL.
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8080/ws";

/// Default query parameter carrying the caller identity.
pub const DEFAULT_IDENTITY_PARAM: &str = "userId";

/// Default reconnect delay in seconds.
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 1;

/// Maximum reconnect delay in seconds.
pub const MAX_RECONNECT_DELAY_SECS: u64 = 30;

/// Default capacity of the outbound control queue.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// WebSocket configuration.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// WebSocket URL.
    pub url: String,

    /// Caller identity sent with the handshake.
    pub identity: Option<String>,

    /// Query parameter name for the identity.
    pub identity_param: String,

    /// Initial reconnect delay.
    pub reconnect_delay: Duration,

    /// Maximum reconnect delay.
    pub max_reconnect_delay: Duration,

    /// Maximum reconnection attempts (None = unlimited).
    pub max_reconnect_attempts: Option<u32>,

    /// Capacity of the outbound control queue.
    pub outbound_buffer: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            identity: None,
            identity_param: DEFAULT_IDENTITY_PARAM.to_string(),
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            max_reconnect_delay: Duration::from_secs(MAX_RECONNECT_DELAY_SECS),
            max_reconnect_attempts: None,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl WsConfig {
    /// Creates a new configuration with the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets the caller identity.
    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Sets the initial reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the maximum reconnect delay.
    #[must_use]
    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    /// Sets the maximum reconnection attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Returns the connection URL with the identity parameter if set.
    #[must_use]
    pub fn connection_url(&self) -> String {
        match &self.identity {
            Some(identity) => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}{}={}", self.url, sep, self.identity_param, identity)
            }
            None => self.url.clone(),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), WsError> {
        if self.url.is_empty() {
            return Err(WsError::InvalidConfig("url cannot be empty".to_string()));
        }

        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err(WsError::InvalidConfig(
                "url must start with ws:// or wss://".to_string(),
            ));
        }

        if let Some(identity) = &self.identity {
            let url_safe = identity
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-_.".contains(c));
            if identity.is_empty() || !url_safe {
                return Err(WsError::InvalidConfig(format!(
                    "identity {:?} is not url-safe",
                    identity
                )));
            }
        }

        if self.reconnect_delay.is_zero() || self.reconnect_delay > self.max_reconnect_delay {
            return Err(WsError::InvalidConfig(
                "reconnect_delay must be > 0 and <= max_reconnect_delay".to_string(),
            ));
        }

        if self.outbound_buffer == 0 {
            return Err(WsError::InvalidConfig(
                "outbound_buffer must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = WsConfig::default();
        assert_eq!(config.url, DEFAULT_WS_URL);
        assert_eq!(
            config.reconnect_delay,
            Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS)
        );
        assert!(config.identity.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = WsConfig::new("wss://example.com/ws")
            .with_identity("alice")
            .with_reconnect_delay(Duration::from_millis(200))
            .with_max_reconnect_delay(Duration::from_secs(5))
            .with_max_reconnect_attempts(3);

        assert_eq!(config.identity, Some("alice".to_string()));
        assert_eq!(config.reconnect_delay, Duration::from_millis(200));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.max_reconnect_attempts, Some(3));
    }

    #[test]
    fn test_config_connection_url_no_identity() {
        let config = WsConfig::new("wss://example.com/ws");
        assert_eq!(config.connection_url(), "wss://example.com/ws");
    }

    #[test]
    fn test_config_connection_url_with_identity() {
        let config = WsConfig::new("wss://example.com/ws").with_identity("alice");
        assert_eq!(config.connection_url(), "wss://example.com/ws?userId=alice");
    }

    #[test]
    fn test_config_connection_url_with_existing_params() {
        let config = WsConfig::new("wss://example.com/ws?v=2").with_identity("alice");
        assert_eq!(
            config.connection_url(),
            "wss://example.com/ws?v=2&userId=alice"
        );
    }

    #[test]
    fn test_config_validate() {
        assert!(WsConfig::new("wss://example.com/ws").validate().is_ok());
        assert!(WsConfig::new("").validate().is_err());
        assert!(WsConfig::new("https://example.com/ws").validate().is_err());
        assert!(WsConfig::new("ws://x/ws")
            .with_identity("a b")
            .validate()
            .is_err());
        assert!(WsConfig::new("ws://x/ws")
            .with_reconnect_delay(Duration::from_secs(60))
            .validate()
            .is_err());
    }
}
