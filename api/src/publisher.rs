//! Producer-facing publisher.
//!
//! Wraps typed payloads in envelopes and routes them to the right topic:
//!
//! | Payload | Topic |
//! |---|---|
//! | price update, market data, order book | `asset:<id>` |
//! | portfolio update | `portfolio:<id>` |
//! | market event | each listed asset, or `broadcast` if none |
//! | market pulse | `broadcast` |

use std::sync::Arc;

use panelstream_sdk::{
    Envelope, MarketData, MarketEvent, MarketPulse, MessageKind, OrderBookSnapshot,
    PortfolioUpdate, PriceUpdate, Topic,
};
use serde::Serialize;

use crate::error::StreamError;
use crate::ws::{DispatchReport, Dispatcher};

/// Typed entry point for price, portfolio and event engines.
#[derive(Debug, Clone)]
pub struct MarketPublisher {
    dispatcher: Arc<Dispatcher>,
}

impl MarketPublisher {
    /// Creates a publisher over `dispatcher`.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Publishes a price tick to the asset's subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub async fn publish_price(&self, update: &PriceUpdate) -> Result<DispatchReport, StreamError> {
        self.to_asset(&update.asset_id, MessageKind::PriceUpdate, update)
            .await
    }

    /// Publishes a market summary to the asset's subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub async fn publish_market_data(
        &self,
        data: &MarketData,
    ) -> Result<DispatchReport, StreamError> {
        self.to_asset(&data.asset_id, MessageKind::MarketData, data)
            .await
    }

    /// Publishes a full order book snapshot to the asset's subscribers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPayload` if the levels are out of order; nothing is
    /// dispatched in that case.
    pub async fn publish_order_book(
        &self,
        book: &OrderBookSnapshot,
    ) -> Result<DispatchReport, StreamError> {
        book.validate()?;
        self.to_asset(&book.asset_id, MessageKind::OrderBookUpdate, book)
            .await
    }

    /// Publishes a portfolio change to the portfolio's subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub async fn publish_portfolio(
        &self,
        update: &PortfolioUpdate,
    ) -> Result<DispatchReport, StreamError> {
        let envelope = Envelope::with_payload(MessageKind::PortfolioUpdate, update)?
            .for_portfolio(update.portfolio_id.as_str());
        self.dispatcher
            .dispatch(&Topic::portfolio(update.portfolio_id.as_str()), &envelope)
            .await
    }

    /// Publishes a market event to each affected asset, or to everyone if
    /// the event names no asset.
    ///
    /// A client subscribed to several affected assets receives one copy per
    /// asset.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub async fn publish_market_event(
        &self,
        event: &MarketEvent,
    ) -> Result<DispatchReport, StreamError> {
        let envelope = Envelope::with_payload(MessageKind::MarketEvent, event)?;
        if event.asset_ids.is_empty() {
            return self.dispatcher.broadcast(&envelope).await;
        }

        let mut total = DispatchReport::default();
        for asset_id in &event.asset_ids {
            let report = self
                .dispatcher
                .dispatch(&Topic::asset(asset_id.as_str()), &envelope)
                .await?;
            total.subscribers += report.subscribers;
            total.delivered += report.delivered;
            total.failed += report.failed;
        }
        Ok(total)
    }

    /// Publishes a market pulse to every connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub async fn publish_pulse(&self, pulse: &MarketPulse) -> Result<DispatchReport, StreamError> {
        let envelope = Envelope::with_payload(MessageKind::MarketPulse, pulse)?;
        self.dispatcher.broadcast(&envelope).await
    }

    async fn to_asset<T: Serialize>(
        &self,
        asset_id: &str,
        kind: MessageKind,
        payload: &T,
    ) -> Result<DispatchReport, StreamError> {
        let envelope = Envelope::with_payload(kind, payload)?.for_asset(asset_id);
        self.dispatcher
            .dispatch(&Topic::asset(asset_id), &envelope)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::{Connection, ConnectionRegistry, SubscriptionIndex, WsMetrics};
    use axum::extract::ws::Message;
    use chrono::Utc;
    use panelstream_sdk::{BookLevel, Sentiment};
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        publisher: MarketPublisher,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(SubscriptionIndex::new())));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::new(WsMetrics::new()),
        ));
        Fixture {
            registry,
            publisher: MarketPublisher::new(dispatcher),
        }
    }

    async fn join(fx: &Fixture, identity: &str, topics: &[Topic]) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(16);
        let conn = Arc::new(Connection::new(identity, tx));
        fx.registry.register(Arc::clone(&conn)).await;
        for topic in topics {
            fx.registry
                .subscribe(&conn, topic.clone())
                .await
                .expect("subscribe");
        }
        rx
    }

    fn next(rx: &mut mpsc::Receiver<Message>) -> Envelope {
        match rx.try_recv() {
            Ok(Message::Text(text)) => serde_json::from_str(text.as_str()).expect("envelope"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_price_tags_asset() {
        let fx = fixture();
        let mut rx = join(&fx, "alice", &[Topic::asset("spider-1")]).await;

        let report = fx
            .publisher
            .publish_price(&PriceUpdate::new("spider-1", "ASM300", dec!(10)))
            .await
            .expect("publish");
        assert_eq!(report.delivered, 1);

        let frame = next(&mut rx);
        assert_eq!(frame.kind, MessageKind::PriceUpdate);
        assert_eq!(frame.asset_id.as_deref(), Some("spider-1"));
    }

    #[tokio::test]
    async fn test_publish_invalid_order_book_is_rejected() {
        let fx = fixture();
        let mut rx = join(&fx, "alice", &[Topic::asset("spider-1")]).await;
        let book = OrderBookSnapshot::from_levels(
            "spider-1",
            "ASM300",
            vec![BookLevel::new(dec!(99), 1), BookLevel::new(dec!(100), 1)],
            vec![],
            Utc::now(),
        );

        let result = fx.publisher.publish_order_book(&book).await;
        assert!(matches!(result, Err(StreamError::InvalidPayload(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_portfolio() {
        let fx = fixture();
        let mut rx = join(&fx, "alice", &[Topic::portfolio("p1")]).await;
        let update = PortfolioUpdate {
            portfolio_id: "p1".into(),
            total_value: dec!(1000),
            day_change: dec!(12.5),
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
        };

        fx.publisher.publish_portfolio(&update).await.expect("publish");
        let frame = next(&mut rx);
        assert_eq!(frame.kind, MessageKind::PortfolioUpdate);
        assert_eq!(frame.portfolio_id.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_publish_pulse_reaches_everyone() {
        let fx = fixture();
        let mut rx_a = join(&fx, "alice", &[]).await;
        let mut rx_b = join(&fx, "bob", &[Topic::asset("spider-1")]).await;
        let pulse = MarketPulse {
            total_assets: 10,
            active_traders: 3,
            volume_pulse: 0.5,
            volatility_index: 0.2,
            sentiment: Sentiment::Bullish,
            timestamp: Utc::now(),
        };

        let report = fx.publisher.publish_pulse(&pulse).await.expect("publish");
        assert_eq!(report.delivered, 2);
        assert_eq!(next(&mut rx_a).kind, MessageKind::MarketPulse);
        assert_eq!(next(&mut rx_b).kind, MessageKind::MarketPulse);
    }

    #[tokio::test]
    async fn test_publish_market_event_routes_by_asset() {
        let fx = fixture();
        let mut rx_a = join(&fx, "alice", &[Topic::asset("spider-1")]).await;
        let mut rx_b = join(&fx, "bob", &[Topic::asset("bat-1")]).await;
        let event = MarketEvent {
            id: "e1".into(),
            category: "earnings".into(),
            title: "Spider variant announced".into(),
            asset_ids: vec!["spider-1".into()],
            timestamp: Utc::now(),
        };

        let report = fx
            .publisher
            .publish_market_event(&event)
            .await
            .expect("publish");
        assert_eq!(report.delivered, 1);
        assert_eq!(next(&mut rx_a).kind, MessageKind::MarketEvent);
        assert!(rx_b.try_recv().is_err());
    }
}
