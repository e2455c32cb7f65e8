//! Contract statistics: the hourly bucket payload, period normalization,
//! and the provider the API reads through.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Currency;

/// An amount denominated in the native coin and in the three tracked
/// exchange rates at the time it matured. The fiat legs are decimals, not
/// floats; they are summed across many blocks and must not drift.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Values {
    pub sc: Currency,
    pub usd: BigDecimal,
    pub eur: BigDecimal,
    pub btc: BigDecimal,
}

impl Values {
    pub fn add(&self, other: &Values) -> Values {
        Values {
            sc: self.sc + other.sc,
            usd: &self.usd + &other.usd,
            eur: &self.eur + &other.eur,
            btc: &self.btc + &other.btc,
        }
    }
}

/// The running totals carried by one hourly bucket. Counters and totals are
/// cumulative, not per-period deltas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractState {
    pub active: i64,
    pub valid: i64,
    pub missed: i64,
    pub revenue: Values,
    pub payout: Values,
    pub timestamp: DateTime<Utc>,
}

/// Aggregation period for the periods query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Hourly => "hourly",
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Period::Hourly),
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            _ => Err(format!("invalid period {:?}", s)),
        }
    }
}

/// Truncate a timestamp to the start of its hour.
pub fn truncate_hour(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .expect("zeroed time components are valid")
}

fn midnight(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is valid")
        .and_utc()
}

/// Floor a timestamp to its period boundary. Weeks start on Sunday; months
/// on the first.
pub fn normalize_period(timestamp: DateTime<Utc>, period: Period) -> DateTime<Utc> {
    match period {
        Period::Hourly => truncate_hour(timestamp),
        Period::Daily => midnight(timestamp),
        Period::Weekly => {
            midnight(timestamp)
                - Duration::days(timestamp.weekday().num_days_from_sunday() as i64)
        }
        Period::Monthly => NaiveDate::from_ymd_opt(timestamp.year(), timestamp.month(), 1)
            .expect("first of month is valid")
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid")
            .and_utc(),
    }
}

/// The boundary following `timestamp` by one period step.
pub fn next_period(timestamp: DateTime<Utc>, period: Period) -> DateTime<Utc> {
    match period {
        Period::Hourly => timestamp + Duration::hours(1),
        Period::Daily => timestamp + Duration::days(1),
        Period::Weekly => timestamp + Duration::days(7),
        Period::Monthly => timestamp
            .checked_add_months(Months::new(1))
            .expect("month addition in range"),
    }
}

/// Read side of the statistics store.
pub trait StatStore: Send + Sync {
    /// The latest hourly bucket at or before `timestamp`.
    fn metrics(&self, timestamp: DateTime<Utc>) -> Result<ContractState>;

    /// One state per period step in `[start, end)`, forward-filled.
    fn periods(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Period,
    ) -> Result<Vec<ContractState>>;
}

/// Serves point-in-time metrics and period aggregations to the API.
#[derive(Clone)]
pub struct Provider {
    store: Arc<dyn StatStore>,
}

impl Provider {
    pub fn new(store: Arc<dyn StatStore>) -> Self {
        Provider { store }
    }

    pub fn metrics(&self, timestamp: DateTime<Utc>) -> Result<ContractState> {
        self.store.metrics(timestamp)
    }

    pub fn periods(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Period,
    ) -> Result<Vec<ContractState>> {
        self.store.periods(start, end, period)
    }
}
