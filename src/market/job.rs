//! Market data synchronization task.
//!
//! Backfills historical exchange rates, re-indexes the recent past to pick
//! up provider corrections, then keeps the current hour fresh on a ticker.

use std::sync::Arc;

use bigdecimal::{BigDecimal, FromPrimitive};
use chrono::{DateTime, Datelike, Duration, Months, Utc};
use tokio::sync::broadcast;
use tokio::time::interval;

use super::client::{RateSource, Rates};
use crate::chain::genesis_timestamp;
use crate::error::MarketError;
use crate::stats::truncate_hour;
use crate::storage::Store;

/// Market sync configuration.
#[derive(Debug, Clone)]
pub struct MarketSyncConfig {
    /// Refresh interval for the current hour once caught up.
    pub refresh_interval_secs: u64,
    /// How far back the hourly catch-up re-indexes already-stored rates.
    pub resync_days: i64,
    /// Delay before retrying a failed hourly fetch.
    pub retry_delay_secs: u64,
}

impl Default for MarketSyncConfig {
    fn default() -> Self {
        MarketSyncConfig {
            refresh_interval_secs: 5 * 60,
            resync_days: 3,
            retry_delay_secs: 1,
        }
    }
}

/// Long-running market data feed. Writes only to the market data table; the
/// indexer sees its output through the nearest-rate lookup.
pub struct MarketSync {
    store: Arc<Store>,
    source: Arc<dyn RateSource>,
    config: MarketSyncConfig,
}

impl MarketSync {
    pub fn new(store: Arc<Store>, source: Arc<dyn RateSource>, config: MarketSyncConfig) -> Self {
        MarketSync { store, source, config }
    }

    /// Run until the shutdown signal fires. Returns without further I/O once
    /// the signal is observed.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let newest = match self.store.latest_exchange_rate() {
            Ok(rate) => rate,
            Err(err) => {
                tracing::error!(error = %err, "failed to get exchange rate");
                return;
            }
        };
        let mut newest_timestamp =
            newest.map(|r| r.timestamp).unwrap_or_else(genesis_timestamp);
        if newest_timestamp < genesis_timestamp() {
            newest_timestamp = genesis_timestamp();
        }

        if Utc::now() - newest_timestamp > Duration::hours(24) {
            tracing::info!(timestamp = %newest_timestamp, "syncing missing market years");
            if self.backfill_years(newest_timestamp, &mut shutdown).await.is_err() {
                return; // shutdown
            }
        }

        // back up a few days to smooth out provider corrections
        let newest = match self.store.latest_exchange_rate() {
            Ok(Some(rate)) => rate.timestamp,
            Ok(None) => genesis_timestamp(),
            Err(err) => {
                tracing::error!(error = %err, "failed to get exchange rate");
                return;
            }
        };
        let start = truncate_hour(newest - Duration::days(self.config.resync_days));
        if self.catch_up(start, &mut shutdown).await.is_err() {
            return; // shutdown
        }

        let mut ticker = interval(std::time::Duration::from_secs(self.config.refresh_interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let timestamp = truncate_hour(Utc::now());
                    match self.update_market_data(timestamp).await {
                        Ok(rates) => {
                            tracing::debug!(timestamp = %timestamp, usd = rates.usd, eur = rates.eur, btc = rates.btc, "added market data");
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "failed to update market data");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("market sync shutting down");
                    return;
                }
            }
        }
    }

    /// Fetch the rate at `timestamp` and upsert it into the store.
    async fn update_market_data(&self, timestamp: DateTime<Utc>) -> Result<Rates, MarketError> {
        let rates = self.source.historical_rate(timestamp).await?;
        if let Err(err) = self.store.add_market_data(
            decimal(rates.usd),
            decimal(rates.eur),
            decimal(rates.btc),
            timestamp,
        ) {
            tracing::error!(error = %err, timestamp = %timestamp, "failed to add market data");
        }
        Ok(rates)
    }

    /// Yearly batch backfill from `from` up to the current year. Individual
    /// failures are logged and skipped; the feed keeps going. Returns `Err`
    /// only on shutdown.
    async fn backfill_years(
        &self,
        from: DateTime<Utc>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), Shutdown> {
        let mut current = from;
        for _ in current.year()..=Utc::now().year() {
            check_shutdown(shutdown)?;

            match self.source.year_rates(current).await {
                Ok(points) => {
                    for point in points {
                        check_shutdown(shutdown)?;
                        let result = self.store.add_market_data(
                            decimal(point.rates.usd),
                            decimal(point.rates.eur),
                            decimal(point.rates.btc),
                            point.timestamp,
                        );
                        match result {
                            Ok(()) => {
                                tracing::info!(timestamp = %point.timestamp, "added market data")
                            }
                            Err(err) => tracing::warn!(
                                error = %err,
                                timestamp = %point.timestamp,
                                "failed to add market data"
                            ),
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, timestamp = %current, "failed to fetch exchange rates");
                }
            }

            current = current
                .checked_add_months(Months::new(12))
                .unwrap_or_else(Utc::now);
        }
        Ok(())
    }

    /// Walk hour by hour from `start` to the current hour, advancing only on
    /// success and retrying the same hour after a short sleep on failure.
    /// Returns `Err` only on shutdown.
    async fn catch_up(
        &self,
        start: DateTime<Utc>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), Shutdown> {
        let end = truncate_hour(Utc::now());
        let mut current = start;
        tracing::info!(
            timestamp = %current,
            points = (end - current).num_hours(),
            "syncing missing market data"
        );
        while current < end {
            check_shutdown(shutdown)?;

            match self.update_market_data(current).await {
                Ok(rates) => {
                    tracing::info!(timestamp = %current, usd = rates.usd, eur = rates.eur, btc = rates.btc, "added market data");
                    current += Duration::hours(1);
                }
                Err(err) => {
                    tracing::error!(error = %err, timestamp = %current, "failed to update market data");
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(self.config.retry_delay_secs)) => {}
                        _ = shutdown.recv() => return Err(Shutdown),
                    }
                }
            }
        }
        Ok(())
    }
}

/// Marker error: the shutdown signal fired.
struct Shutdown;

fn check_shutdown(shutdown: &mut broadcast::Receiver<()>) -> Result<(), Shutdown> {
    match shutdown.try_recv() {
        Err(broadcast::error::TryRecvError::Empty) => Ok(()),
        _ => Err(Shutdown),
    }
}

fn decimal(value: f64) -> BigDecimal {
    BigDecimal::from_f64(value).unwrap_or_default()
}
