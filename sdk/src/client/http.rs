//! REST snapshot client.
//!
//! Streaming carries no replay, so after a reconnect the client pulls the
//! current state over HTTP and lets live updates continue from there.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::config::ClientConfig;
use super::error::ClientError;
use crate::types::{Notification, PriceUpdate};

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct PricesResponse {
    prices: Vec<PriceUpdate>,
}

/// One page of notifications.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    /// Most recent notifications.
    pub notifications: Vec<Notification>,
    /// Unread count across all notifications.
    #[serde(default)]
    pub unread_count: u64,
    /// True if older notifications exist.
    #[serde(default)]
    pub has_more: bool,
}

/// HTTP client for reconciliation snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl SnapshotClient {
    /// Creates a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(ref api_key) = config.api_key {
            let value = HeaderValue::from_str(api_key)
                .map_err(|_| ClientError::InvalidConfig("api_key is not a valid header".into()))?;
            headers.insert("X-API-Key", value);
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .user_agent(&config.user_agent)
            .build()
            .map_err(ClientError::Request)?;

        Ok(Self { config, http })
    }

    /// Creates a client for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::new(ClientConfig::new(base_url))
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetches current prices for the given assets.
    ///
    /// An empty slice returns an empty list without a request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after retries.
    pub async fn get_prices(&self, asset_ids: &[String]) -> Result<Vec<PriceUpdate>, ClientError> {
        if asset_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut url = self.url("market/prices")?;
        url.query_pairs_mut()
            .append_pair("assetIds", &asset_ids.join(","));
        let response: PricesResponse = self.get(url).await?;
        Ok(response.prices)
    }

    /// Fetches the most recent notifications for the configured identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails after retries.
    pub async fn get_notifications(&self) -> Result<NotificationPage, ClientError> {
        let mut url = self.url("notifications")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &self.config.notification_limit.to_string());
            if let Some(ref identity) = self.config.identity {
                query.append_pair("userId", identity);
            }
        }
        self.get(url).await
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        Url::parse(&self.config.endpoint(path))
            .map_err(|e| ClientError::InvalidConfig(format!("bad url for {}: {}", path, e)))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        let mut delay = self.config.retry_delay;
        let mut attempt = 0;

        loop {
            match self.fetch(url.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let wait = match e {
                        ClientError::RateLimited {
                            retry_after: Some(secs),
                        } => Duration::from_secs(secs),
                        _ => delay,
                    };
                    warn!(error = %e, attempt, path = url.path(), "snapshot request failed, retrying");
                    tokio::time::sleep(wait).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        debug!(url = %url, "GET");
        let resp = self.http.get(url.clone()).send().await?;
        let status = resp.status();

        if status.is_success() {
            let body = resp.text().await?;
            return Ok(serde_json::from_str(&body)?);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(ClientError::RateLimited { retry_after });
        }

        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(url.path().to_string()));
        }

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|r| r.error)
            .unwrap_or(body);
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}
