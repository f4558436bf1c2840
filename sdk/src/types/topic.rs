//! Subscription topics.
//!
//! A topic is the routing key that connects producers with subscribed
//! connections.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SdkError;

/// Name of the topic every connection is implicitly subscribed to.
pub const BROADCAST: &str = "broadcast";

/// Subscription key.
///
/// Wire format: `asset:<id>`, `portfolio:<id>`, `broadcast`, or a bare
/// channel name such as `victims`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// Updates for a single asset.
    Asset(String),
    /// Updates for a single portfolio.
    Portfolio(String),
    /// A named feed shared by interested clients.
    Channel(String),
    /// Every connected client.
    Broadcast,
}

impl Topic {
    /// Creates an asset topic.
    #[must_use]
    pub fn asset(id: impl Into<String>) -> Self {
        Self::Asset(id.into())
    }

    /// Creates a portfolio topic.
    #[must_use]
    pub fn portfolio(id: impl Into<String>) -> Self {
        Self::Portfolio(id.into())
    }

    /// Creates a named channel topic.
    #[must_use]
    pub fn channel(name: impl Into<String>) -> Self {
        Self::Channel(name.into())
    }

    /// Parses a topic string.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::InvalidTopic` for empty ids, unknown prefixes and
    /// channel names containing `:`.
    pub fn parse(topic: &str) -> Result<Self, SdkError> {
        let invalid = || SdkError::InvalidTopic(topic.to_string());

        if topic == BROADCAST {
            return Ok(Self::Broadcast);
        }

        match topic.split_once(':') {
            Some(("asset", id)) if valid_id(id) => Ok(Self::Asset(id.to_string())),
            Some(("portfolio", id)) if valid_id(id) => Ok(Self::Portfolio(id.to_string())),
            Some(_) => Err(invalid()),
            None if valid_id(topic) => Ok(Self::Channel(topic.to_string())),
            None => Err(invalid()),
        }
    }

    /// Returns the topic kind as a string.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Asset(_) => "asset",
            Self::Portfolio(_) => "portfolio",
            Self::Channel(_) => "channel",
            Self::Broadcast => BROADCAST,
        }
    }

    /// Returns the asset id if this is an asset topic.
    #[must_use]
    pub fn asset_id(&self) -> Option<&str> {
        match self {
            Self::Asset(id) => Some(id),
            _ => None,
        }
    }

    /// Returns true for the implicit broadcast topic.
    #[must_use]
    pub const fn is_broadcast(&self) -> bool {
        matches!(self, Self::Broadcast)
    }
}

fn valid_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(':') && !id.chars().any(char::is_whitespace)
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asset(id) => write!(f, "asset:{}", id),
            Self::Portfolio(id) => write!(f, "portfolio:{}", id),
            Self::Channel(name) => write!(f, "{}", name),
            Self::Broadcast => write!(f, "{}", BROADCAST),
        }
    }
}

impl FromStr for Topic {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
