//! Exchange-rate storage.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::store::Store;
use super::types::{SqlDecimal, SqlTime};
use crate::error::StorageError;

/// A stored exchange-rate point.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRate {
    pub usd: BigDecimal,
    pub eur: BigDecimal,
    pub btc: BigDecimal,
    pub timestamp: DateTime<Utc>,
}

impl Store {
    /// Upsert a market data point keyed by its timestamp.
    pub fn add_market_data(
        &self,
        usd: BigDecimal,
        eur: BigDecimal,
        btc: BigDecimal,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.transaction(|tx| {
            tx.execute(
                "INSERT INTO market_data (usd_rate, eur_rate, btc_rate, date_created)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT (date_created) DO UPDATE SET usd_rate=EXCLUDED.usd_rate,
eur_rate=EXCLUDED.eur_rate, btc_rate=EXCLUDED.btc_rate",
                params![
                    SqlDecimal(usd.clone()),
                    SqlDecimal(eur.clone()),
                    SqlDecimal(btc.clone()),
                    SqlTime(timestamp)
                ],
            )?;
            Ok(())
        })
    }

    /// The most recent exchange rate, if any data has been stored.
    pub fn latest_exchange_rate(&self) -> Result<Option<ExchangeRate>, StorageError> {
        self.transaction(|tx| {
            let row = tx
                .query_row(
                    "SELECT usd_rate, eur_rate, btc_rate, date_created FROM market_data
ORDER BY date_created DESC LIMIT 1",
                    [],
                    |row| {
                        Ok(ExchangeRate {
                            usd: row.get::<_, SqlDecimal>(0)?.0,
                            eur: row.get::<_, SqlDecimal>(1)?.0,
                            btc: row.get::<_, SqlDecimal>(2)?.0,
                            timestamp: row.get::<_, SqlTime>(3)?.0,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }
}

/// The rate point closest in time to `timestamp`. Errors when no market
/// data exists at all; stats cannot be denominated without a rate.
pub(crate) fn nearest_rate(
    tx: &rusqlite::Transaction<'_>,
    timestamp: DateTime<Utc>,
) -> Result<(BigDecimal, BigDecimal, BigDecimal), StorageError> {
    tx.query_row(
        "SELECT usd_rate, eur_rate, btc_rate FROM market_data
ORDER BY ABS(date_created - ?1) LIMIT 1",
        [SqlTime(timestamp)],
        |row| {
            Ok((
                row.get::<_, SqlDecimal>(0)?.0,
                row.get::<_, SqlDecimal>(1)?.0,
                row.get::<_, SqlDecimal>(2)?.0,
            ))
        },
    )
    .optional()?
    .ok_or(StorageError::NoExchangeRate)
}
