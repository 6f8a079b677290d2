//! Exchange REST Ticker Client
//!
//! Polls `GET /api/v3/ticker/24hr` for the statistics of every listed
//! instrument. Implements the `TickerSource` port; filtering to tracked
//! symbols happens in the refresher.

use std::time::Duration;

use async_trait::async_trait;

use super::messages::RestTickerMessage;
use crate::application::ports::{TickerSource, TickerSourceError};
use crate::domain::streaming::MarketSnapshot;

/// Default exchange REST endpoint.
pub const DEFAULT_REST_URL: &str = "https://api.binance.com";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const TICKER_PATH: &str = "/api/v3/ticker/24hr";

/// REST client for the 24h ticker endpoint.
#[derive(Debug, Clone)]
pub struct RestTickerClient {
    client: reqwest::Client,
    base_url: String,
}

impl RestTickerClient {
    /// Create a client for `base_url` (scheme and host, no trailing path).
    ///
    /// # Errors
    ///
    /// Returns `TickerSourceError::Network` if the HTTP client cannot be
    /// built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TickerSourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TickerSourceError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Full ticker URL.
    #[must_use]
    pub fn ticker_url(&self) -> String {
        format!("{}{TICKER_PATH}", self.base_url)
    }
}

#[async_trait]
impl TickerSource for RestTickerClient {
    async fn fetch_tickers(&self) -> Result<Vec<MarketSnapshot>, TickerSourceError> {
        let response = self
            .client
            .get(self.ticker_url())
            .send()
            .await
            .map_err(|e| TickerSourceError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TickerSourceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let tickers: Vec<RestTickerMessage> = response
            .json()
            .await
            .map_err(|e| TickerSourceError::Decode(e.to_string()))?;

        Ok(tickers
            .into_iter()
            .map(RestTickerMessage::into_snapshot)
            .collect())
    }
}
