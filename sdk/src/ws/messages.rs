//! WebSocket message types.
//!
//! Every server frame is an [`Envelope`]; every client frame is a
//! [`ControlMessage`]. Both sides of the wire share these definitions.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SdkError;
use crate::types::Topic;

/// Close code for an orderly close, including a superseded session.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code for a handshake the server refused.
pub const POLICY_VIOLATION: u16 = 1008;

/// Close reason sent to a session replaced by a newer handshake for the
/// same identity.
pub const SUPERSEDED_REASON: &str = "superseded";

/// Kind of a server-to-client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Market summary for an asset.
    #[serde(rename = "marketData")]
    MarketData,
    /// Streaming price tick.
    #[serde(rename = "priceUpdate")]
    PriceUpdate,
    /// Full order book snapshot.
    #[serde(rename = "orderBookUpdate")]
    OrderBookUpdate,
    /// Market-wide pulse.
    #[serde(rename = "marketPulse")]
    MarketPulse,
    /// Portfolio change.
    #[serde(rename = "portfolioUpdate")]
    PortfolioUpdate,
    /// Discrete market event.
    #[serde(rename = "marketEvent")]
    MarketEvent,
    /// Handshake accepted.
    #[serde(rename = "connection_confirmed")]
    ConnectionConfirmed,
    /// Subscription acknowledged.
    #[serde(rename = "subscribed")]
    Subscribed,
    /// Unsubscription acknowledged.
    #[serde(rename = "unsubscribed")]
    Unsubscribed,
    /// User notification.
    #[serde(rename = "notification")]
    Notification,
    /// One notification marked read.
    #[serde(rename = "notification_read")]
    NotificationRead,
    /// All notifications marked read.
    #[serde(rename = "all_notifications_read")]
    AllNotificationsRead,
    /// Reply to `ping`.
    #[serde(rename = "pong")]
    Pong,
    /// Error reply.
    #[serde(rename = "error")]
    Error,
}

impl MessageKind {
    /// Returns true for frames that acknowledge control traffic rather than
    /// carry market data.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(
            self,
            Self::ConnectionConfirmed
                | Self::Subscribed
                | Self::Unsubscribed
                | Self::Pong
                | Self::Error
                | Self::NotificationRead
                | Self::AllNotificationsRead
        )
    }
}

/// Server-to-client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Frame kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,

    /// Asset the frame refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,

    /// Portfolio the frame refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_id: Option<String>,

    /// Kind-specific payload.
    #[serde(default)]
    pub data: Value,

    /// Server time.
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Creates an envelope stamped with the current time.
    #[must_use]
    pub fn new(kind: MessageKind, data: Value) -> Self {
        Self {
            kind,
            asset_id: None,
            portfolio_id: None,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Wraps a typed payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn with_payload<T: Serialize>(kind: MessageKind, payload: &T) -> Result<Self, SdkError> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    /// Sets the asset id.
    #[must_use]
    pub fn for_asset(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = Some(asset_id.into());
        self
    }

    /// Sets the portfolio id.
    #[must_use]
    pub fn for_portfolio(mut self, portfolio_id: impl Into<String>) -> Self {
        self.portfolio_id = Some(portfolio_id.into());
        self
    }

    /// Decodes the payload into a typed value.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, SdkError> {
        T::deserialize(&self.data).map_err(|e| SdkError::Deserialization(e.to_string()))
    }

    /// Handshake confirmation.
    #[must_use]
    pub fn connection_confirmed(user_id: &str, connection_id: u64) -> Self {
        Self::new(
            MessageKind::ConnectionConfirmed,
            serde_json::json!({ "userId": user_id, "connectionId": connection_id }),
        )
    }

    /// Subscription acknowledgement.
    #[must_use]
    pub fn subscribed(topics: &[Topic]) -> Self {
        Self::new(
            MessageKind::Subscribed,
            serde_json::json!({ "topics": topics }),
        )
    }

    /// Unsubscription acknowledgement.
    #[must_use]
    pub fn unsubscribed(topics: &[Topic]) -> Self {
        Self::new(
            MessageKind::Unsubscribed,
            serde_json::json!({ "topics": topics }),
        )
    }

    /// Reply to a ping.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(MessageKind::Pong, Value::Null)
    }

    /// Error reply.
    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            MessageKind::Error,
            serde_json::json!({ "code": code.into(), "message": message.into() }),
        )
    }
}

/// Client-to-server control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Subscribe to any mix of topics in one call.
    Subscribe {
        /// Topics, in wire form.
        topics: Vec<Topic>,
    },
    /// Unsubscribe from any mix of topics in one call.
    Unsubscribe {
        /// Topics, in wire form.
        topics: Vec<Topic>,
    },
    /// Subscribe to many assets in one call.
    SubscribeAssets {
        /// Asset ids.
        #[serde(rename = "assetIds")]
        asset_ids: Vec<String>,
    },
    /// Unsubscribe from one asset.
    UnsubscribeAsset {
        /// Asset id.
        #[serde(rename = "assetId")]
        asset_id: String,
    },
    /// Subscribe to a portfolio.
    SubscribePortfolio {
        /// Portfolio id.
        #[serde(rename = "portfolioId")]
        portfolio_id: String,
    },
    /// Unsubscribe from a portfolio.
    UnsubscribePortfolio {
        /// Portfolio id.
        #[serde(rename = "portfolioId")]
        portfolio_id: String,
    },
    /// Subscribe to a named channel.
    SubscribeChannel {
        /// Channel name.
        channel: String,
    },
    /// Unsubscribe from a named channel.
    UnsubscribeChannel {
        /// Channel name.
        channel: String,
    },
    /// Application-level keepalive.
    Ping,
    /// Mark one notification read.
    MarkNotificationRead {
        /// Notification id.
        #[serde(rename = "notificationId")]
        notification_id: String,
    },
    /// Mark all notifications read.
    MarkAllRead,
}

impl ControlMessage {
    /// Topics this message subscribes to, if any.
    #[must_use]
    pub fn subscribe_topics(&self) -> Vec<Topic> {
        match self {
            Self::Subscribe { topics } => topics.clone(),
            Self::SubscribeAssets { asset_ids } => {
                asset_ids.iter().map(|id| Topic::asset(id.as_str())).collect()
            }
            Self::SubscribePortfolio { portfolio_id } => {
                vec![Topic::portfolio(portfolio_id.as_str())]
            }
            Self::SubscribeChannel { channel } => vec![Topic::channel(channel.as_str())],
            _ => Vec::new(),
        }
    }

    /// Topics this message unsubscribes from, if any.
    #[must_use]
    pub fn unsubscribe_topics(&self) -> Vec<Topic> {
        match self {
            Self::Unsubscribe { topics } => topics.clone(),
            Self::UnsubscribeAsset { asset_id } => vec![Topic::asset(asset_id.as_str())],
            Self::UnsubscribePortfolio { portfolio_id } => {
                vec![Topic::portfolio(portfolio_id.as_str())]
            }
            Self::UnsubscribeChannel { channel } => vec![Topic::channel(channel.as_str())],
            _ => Vec::new(),
        }
    }
}
