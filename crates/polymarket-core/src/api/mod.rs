//! Read-only Polymarket HTTP client.
//!
//! Market metadata comes from the Gamma API and order books from the CLOB API.
//! Every request passes through a shared [`RateLimiter`].

pub mod clob;
pub mod gamma;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::providers::{HealthStatus, MarketDataProvider};
use crate::rate_limit::RateLimiter;
use crate::types::{Market, OrderBook};
use crate::{Error, Result};

/// Polymarket market data client.
pub struct PolymarketClient {
    http: reqwest::Client,
    gamma_url: String,
    clob_url: String,
    limiter: Arc<RateLimiter>,
    max_retries: u32,
}

impl PolymarketClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(config.request_timeout_secs))
            .connect_timeout(StdDuration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            gamma_url: config.gamma_url.trim_end_matches('/').to_string(),
            clob_url: config.clob_url.trim_end_matches('/').to_string(),
            limiter: Arc::new(RateLimiter::per_second(config.rate_limit_per_second)),
            max_retries: config.max_retries.max(1),
        })
    }

    /// Execute an HTTP GET with retry and exponential backoff.
    ///
    /// Retries on 5xx server errors and 429 rate-limit responses (with a longer
    /// backoff for 429). A 404 yields `Ok(None)`; other 4xx errors fail
    /// immediately.
    async fn get_with_retry(&self, url: &str) -> Result<Option<reqwest::Response>> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            self.limiter.acquire().await;

            match self.http.get(url).send().await {
                Ok(response) if response.status().is_success() => return Ok(Some(response)),
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    debug!(url = url, "Resource not found");
                    return Ok(None);
                }
                Ok(response)
                    if response.status().as_u16() == 429 || response.status().is_server_error() =>
                {
                    let status = response.status();
                    let is_rate_limited = status.as_u16() == 429;
                    warn!(
                        attempt = attempt + 1,
                        status = %status,
                        url = url,
                        rate_limited = is_rate_limited,
                        "Retryable API error, backing off"
                    );
                    last_error = Some(Error::Api {
                        message: format!(
                            "{}: {}",
                            if is_rate_limited {
                                "Rate limited"
                            } else {
                                "Server error"
                            },
                            status
                        ),
                        status: Some(status.as_u16()),
                    });

                    if attempt + 1 < self.max_retries {
                        let backoff = if is_rate_limited {
                            StdDuration::from_millis(2000 * 2u64.pow(attempt))
                        } else {
                            StdDuration::from_millis(500 * 2u64.pow(attempt))
                        };
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
                Ok(response) => {
                    return Err(Error::Api {
                        message: format!("API error: {}", response.status()),
                        status: Some(response.status().as_u16()),
                    });
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        error = %e,
                        url = url,
                        "HTTP request failed, backing off"
                    );
                    last_error = Some(Error::Http(e));
                }
            }

            if attempt + 1 < self.max_retries {
                let backoff = StdDuration::from_millis(500 * 2u64.pow(attempt));
                tokio::time::sleep(backoff).await;
            }
        }

        Err(last_error.unwrap_or(Error::Api {
            message: "Max retries exceeded".to_string(),
            status: None,
        }))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        match self.get_with_retry(url).await? {
            Some(response) => Ok(Some(response.json().await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl MarketDataProvider for PolymarketClient {
    async fn list_markets(&self, active: bool, limit: usize, offset: usize) -> Result<Vec<Market>> {
        let url = format!(
            "{}/markets?active={}&closed={}&limit={}&offset={}",
            self.gamma_url, active, !active, limit, offset
        );
        let raw: Vec<serde_json::Value> = self.get_json(&url).await?.unwrap_or_default();
        let fetched = raw.len();

        // One malformed listing should not hide the rest of the page.
        let markets: Vec<Market> = raw
            .into_iter()
            .filter_map(|value| match gamma::parse_market(value) {
                Ok(market) => Some(market),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed market");
                    None
                }
            })
            .collect();

        info!(
            fetched,
            parsed = markets.len(),
            offset,
            "Fetched markets from Gamma"
        );
        Ok(markets)
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<Market>> {
        let url = format!("{}/markets/{}", self.gamma_url, market_id);
        match self.get_json::<serde_json::Value>(&url).await? {
            Some(value) => gamma::parse_market(value).map(Some),
            None => Ok(None),
        }
    }

    async fn get_order_book(&self, token_id: &str) -> Result<Option<OrderBook>> {
        let url = format!("{}/book?token_id={}", self.clob_url, token_id);
        match self.get_json::<clob::ClobOrderBook>(&url).await? {
            Some(book) => OrderBook::try_from(book).map(Some),
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let url = format!("{}/markets?limit=1", self.gamma_url);
        match self.get_with_retry(&url).await {
            Ok(Some(_)) => Ok(HealthStatus::connected()),
            Ok(None) => Ok(HealthStatus::disconnected("market listing not found")),
            Err(e) => Ok(HealthStatus::disconnected(e.to_string())),
        }
    }
}
