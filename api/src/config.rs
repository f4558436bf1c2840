//! Server configuration.
//!
//! Provides configuration options for the streaming server.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default listen host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Default time allowed for queueing a heartbeat ping.
pub const DEFAULT_PING_TIMEOUT_SECS: u64 = 5;

/// Default per-connection outbound queue capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default handshake query parameter carrying the caller identity.
pub const DEFAULT_IDENTITY_PARAM: &str = "userId";

/// Configuration for the streaming server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host.
    pub host: String,

    /// Listen port.
    pub port: u16,

    /// Period between heartbeat sweeps.
    pub heartbeat_interval: Duration,

    /// Time a heartbeat ping may wait on a full outbound queue.
    pub ping_timeout: Duration,

    /// Outbound queue capacity per connection.
    pub outbound_capacity: usize,

    /// Query parameter holding the caller identity.
    pub identity_param: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            ping_timeout: Duration::from_secs(DEFAULT_PING_TIMEOUT_SECS),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            identity_param: DEFAULT_IDENTITY_PARAM.to_string(),
        }
    }
}

impl ServerConfig {
    /// Creates a configuration listening on `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Reads `API_HOST`, `API_PORT`, `HEARTBEAT_SECS` and
    /// `OUTBOUND_CAPACITY`, falling back to defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or if the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(host) = env::var("API_HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var::<u16>("API_PORT")? {
            config.port = port;
        }
        if let Some(secs) = parse_var::<u64>("HEARTBEAT_SECS")? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(capacity) = parse_var::<usize>("OUTBOUND_CAPACITY")? {
            config.outbound_capacity = capacity;
        }
        config.validate()?;
        Ok(config)
    }

    /// Sets the heartbeat period.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the ping timeout.
    #[must_use]
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Sets the outbound queue capacity.
    #[must_use]
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Sets the identity query parameter.
    #[must_use]
    pub fn with_identity_param(mut self, param: impl Into<String>) -> Self {
        self.identity_param = param.into();
        self
    }

    /// Returns the listen address as `host:port`.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parses the listen address.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr()
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.bind_addr()))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidHeartbeat);
        }

        if self.ping_timeout.is_zero() {
            return Err(ConfigError::InvalidPingTimeout);
        }

        if self.outbound_capacity == 0 {
            return Err(ConfigError::InvalidOutboundCapacity);
        }

        let param = self.identity_param.as_str();
        if param.is_empty() || !param.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::InvalidIdentityParam(self.identity_param.clone()));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVariable { name, value: raw }),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Heartbeat period is zero.
    #[error("heartbeat_interval must be greater than zero")]
    InvalidHeartbeat,

    /// Ping timeout is zero.
    #[error("ping_timeout must be greater than zero")]
    InvalidPingTimeout,

    /// Outbound queue capacity is zero.
    #[error("outbound_capacity must be greater than zero")]
    InvalidOutboundCapacity,

    /// Identity parameter is empty or not a plain query key.
    #[error("invalid identity parameter: {0:?}")]
    InvalidIdentityParam(String),

    /// Listen address does not parse.
    #[error("invalid listen address: {0}")]
    InvalidAddress(String),

    /// Environment variable could not be parsed.
    #[error("invalid value for {name}: {value:?}")]
    InvalidVariable {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.ping_timeout, Duration::from_secs(5));
        assert_eq!(config.outbound_capacity, 256);
        assert_eq!(config.identity_param, "userId");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builders() {
        let config = ServerConfig::new("127.0.0.1", 0)
            .with_heartbeat_interval(Duration::from_millis(50))
            .with_ping_timeout(Duration::from_millis(10))
            .with_outbound_capacity(8)
            .with_identity_param("user_id");
        assert_eq!(config.bind_addr(), "127.0.0.1:0");
        assert!(config.socket_addr().is_ok());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_zero_heartbeat() {
        let config = ServerConfig::default().with_heartbeat_interval(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::InvalidHeartbeat));
    }

    #[test]
    fn test_config_validate_zero_capacity() {
        let config = ServerConfig::default().with_outbound_capacity(0);
        assert_eq!(config.validate(), Err(ConfigError::InvalidOutboundCapacity));
    }

    #[test]
    fn test_config_validate_zero_ping_timeout() {
        let config = ServerConfig::default().with_ping_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::InvalidPingTimeout));
    }

    #[test]
    fn test_config_validate_identity_param() {
        let config = ServerConfig::default().with_identity_param("user id");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidIdentityParam(_))
        ));
        let config = ServerConfig::default().with_identity_param("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_invalid_address() {
        let config = ServerConfig::new("not a host", 80);
        assert!(matches!(
            config.socket_addr(),
            Err(ConfigError::InvalidAddress(_))
        ));
    }
}
