//! Exchange-rate provider client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::MarketError;

/// Exchange rates for one point in time, as quoted by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Rates {
    pub usd: f64,
    pub eur: f64,
    pub btc: f64,
}

/// A timestamped rate point from a historical batch.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RatePoint {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub rates: Rates,
}

/// Source of historical exchange rates. Errors are retryable; the sync job
/// re-requests the same point until it succeeds.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// The rate at (or nearest to) `timestamp`.
    async fn historical_rate(&self, timestamp: DateTime<Utc>) -> Result<Rates, MarketError>;

    /// A year's worth of rate points starting at `timestamp`.
    async fn year_rates(&self, timestamp: DateTime<Utc>) -> Result<Vec<RatePoint>, MarketError>;
}

/// HTTP client for the exchange-rate provider.
pub struct RateClient {
    client: reqwest::Client,
    base_url: String,
}

impl RateClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, MarketError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(RateClient { client, base_url: base_url.into() })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<T, MarketError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(&[("timestamp", timestamp.timestamp())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MarketError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RateSource for RateClient {
    async fn historical_rate(&self, timestamp: DateTime<Utc>) -> Result<Rates, MarketError> {
        self.get_json("/rates/historical", timestamp).await
    }

    async fn year_rates(&self, timestamp: DateTime<Utc>) -> Result<Vec<RatePoint>, MarketError> {
        self.get_json("/rates/year", timestamp).await
    }
}
