//! Snapshot client configuration.

use std::time::Duration;

use super::error::ClientError;

/// Default base URL of the REST snapshot API.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/api";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default maximum retries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;

/// Default number of notifications fetched for reconciliation.
pub const DEFAULT_NOTIFICATION_LIMIT: usize = 50;

/// Snapshot client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL, without a trailing slash.
    pub base_url: String,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Retries after the first attempt for timeouts, 429 and 5xx.
    pub max_retries: u32,

    /// Delay before the first retry; doubled on each further retry.
    pub retry_delay: Duration,

    /// Optional API key sent as `X-API-Key`.
    pub api_key: Option<String>,

    /// Caller identity sent as the `userId` query parameter.
    pub identity: Option<String>,

    /// Notifications requested per reconciliation.
    pub notification_limit: usize,

    /// User agent string.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            api_key: None,
            identity: None,
            notification_limit: DEFAULT_NOTIFICATION_LIMIT,
            user_agent: format!("panelstream-sdk/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the initial retry delay.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the caller identity.
    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Sets how many notifications are fetched per reconciliation.
    #[must_use]
    pub fn with_notification_limit(mut self, limit: usize) -> Self {
        self.notification_limit = limit;
        self
    }

    /// Returns the absolute URL for an API path.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ClientError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ClientError::InvalidConfig(
                "base_url must start with http:// or https://".to_string(),
            ));
        }

        if self.timeout.is_zero() {
            return Err(ClientError::InvalidConfig(
                "timeout must be > 0".to_string(),
            ));
        }

        if self.notification_limit == 0 {
            return Err(ClientError::InvalidConfig(
                "notification_limit must be > 0".to_string(),
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
        let config = ClientConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.notification_limit, DEFAULT_NOTIFICATION_LIMIT);
        assert!(config.identity.is_none());
    }

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = ClientConfig::new("https://api.example.com/");
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(
            config.endpoint("/market/prices"),
            "https://api.example.com/market/prices"
        );
        assert_eq!(
            config.endpoint("notifications"),
            "https://api.example.com/notifications"
        );
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new("https://api.example.com")
            .with_timeout(Duration::from_secs(2))
            .with_max_retries(1)
            .with_retry_delay(Duration::from_millis(10))
            .with_api_key("key")
            .with_identity("alice")
            .with_notification_limit(20);

        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_delay, Duration::from_millis(10));
        assert_eq!(config.api_key.as_deref(), Some("key"));
        assert_eq!(config.identity.as_deref(), Some("alice"));
        assert_eq!(config.notification_limit, 20);
    }

    #[test]
    fn test_config_validate() {
        assert!(ClientConfig::new("https://api.example.com").validate().is_ok());
        assert!(ClientConfig::new("").validate().is_err());
        assert!(ClientConfig::new("ftp://api.example.com").validate().is_err());
        assert!(ClientConfig::new("http://x")
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ClientConfig::new("http://x")
            .with_notification_limit(0)
            .validate()
            .is_err());
    }
}
