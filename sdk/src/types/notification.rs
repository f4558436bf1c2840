//! User notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Notification category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Order fill or cancel.
    Order,
    /// Price alert threshold crossed.
    PriceAlert,
    /// General market news.
    MarketUpdate,
    /// Portfolio change.
    Portfolio,
}

/// Notification priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Informational.
    Low,
    /// Default.
    #[default]
    Medium,
    /// Needs attention.
    High,
    /// Needs attention now.
    Critical,
}

/// A notification addressed to one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Unique id.
    pub id: String,
    /// Recipient identity.
    pub user_id: String,
    /// Category.
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Priority.
    #[serde(default)]
    pub priority: Priority,
    /// In-app link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    /// Whether the user has read it.
    #[serde(default)]
    pub read: bool,
    /// Extra structured data.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Creates an unread notification timestamped now.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            kind,
            title: title.into(),
            message: message.into(),
            priority: Priority::default(),
            action_url: None,
            read: false,
            metadata: Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the creation time.
    #[must_use]
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_wire_shape() {
        let n = Notification::new("n1", "u1", NotificationKind::PriceAlert, "Alert", "moved")
            .with_priority(Priority::High);
        let json = serde_json::to_value(&n).expect("serialize");
        assert_eq!(json["type"], "price_alert");
        assert_eq!(json["priority"], "high");
        assert_eq!(json["userId"], "u1");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Low < Priority::Medium);
    }
}
