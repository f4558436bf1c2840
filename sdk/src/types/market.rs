//! Market payload types.
//!
//! These are the typed events produced by the pricing, portfolio and event
//! engines. The distribution layer never computes them, it only routes them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse direction of an asset relative to its day open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    /// Above the open.
    Up,
    /// Below the open.
    Down,
    /// At the open.
    Stable,
}

/// Streaming price tick for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    /// Asset id.
    pub asset_id: String,
    /// Display symbol.
    pub symbol: String,
    /// Last price.
    pub price: Decimal,
    /// Best bid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<Decimal>,
    /// Best ask.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<Decimal>,
    /// Absolute change since open.
    #[serde(default)]
    pub change: Decimal,
    /// Percentage change since open.
    #[serde(default)]
    pub change_percent: Decimal,
    /// 24h volume.
    #[serde(default)]
    pub volume: u64,
    /// Direction relative to the open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
    /// Producer timestamp.
    pub timestamp: DateTime<Utc>,
}

impl PriceUpdate {
    /// Creates a minimal price update.
    #[must_use]
    pub fn new(asset_id: impl Into<String>, symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            asset_id: asset_id.into(),
            symbol: symbol.into(),
            price,
            bid: None,
            ask: None,
            change: Decimal::ZERO,
            change_percent: Decimal::ZERO,
            volume: 0,
            trend: None,
            timestamp: Utc::now(),
        }
    }
}

/// Slower-moving market summary for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    /// Asset id.
    pub asset_id: String,
    /// Current price.
    pub current_price: Decimal,
    /// Absolute change.
    pub change: Decimal,
    /// Percentage change.
    pub change_percent: Decimal,
    /// 24h volume.
    #[serde(default)]
    pub volume: u64,
}

/// Overall market sentiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    /// More assets trending up.
    Bullish,
    /// More assets trending down.
    Bearish,
    /// Balanced.
    Neutral,
}

/// Market-wide pulse, sent to every client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPulse {
    /// Number of streamed assets.
    pub total_assets: u64,
    /// Active traders.
    pub active_traders: u64,
    /// Volume intensity in `[0, 1]`.
    pub volume_pulse: f64,
    /// Market-wide volatility index.
    pub volatility_index: f64,
    /// Sentiment.
    pub sentiment: Sentiment,
    /// Producer timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Change to a portfolio's holdings or valuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioUpdate {
    /// Portfolio id.
    pub portfolio_id: String,
    /// Total market value.
    pub total_value: Decimal,
    /// Day change.
    #[serde(default)]
    pub day_change: Decimal,
    /// Engine-specific details.
    #[serde(default)]
    pub details: Value,
    /// Producer timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Discrete market event (news, incident, victim report).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketEvent {
    /// Unique event id.
    pub id: String,
    /// Event category.
    pub category: String,
    /// Headline.
    pub title: String,
    /// Affected assets.
    #[serde(default)]
    pub asset_ids: Vec<String>,
    /// Producer timestamp.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_update_wire_shape() {
        let update = PriceUpdate::new("a1", "A1", dec!(12.5));
        let json = serde_json::to_value(&update).expect("serialize");
        assert!(json.get("assetId").is_some());
        assert!(json.get("bid").is_none());
    }

    #[test]
    fn test_price_update_accepts_numeric_price() {
        let json = r#"{"assetId":"a1","symbol":"A1","price":12.5,"timestamp":"2024-01-01T00:00:00Z"}"#;
        let update: PriceUpdate = serde_json::from_str(json).expect("deserialize");
        assert_eq!(update.price, dec!(12.5));
        assert_eq!(update.volume, 0);
    }

    #[test]
    fn test_pulse_sentiment_lowercase() {
        let json = serde_json::to_string(&Sentiment::Bullish).expect("serialize");
        assert_eq!(json, r#""bullish""#);
    }
}
