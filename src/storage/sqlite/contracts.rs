//! Point-in-time metrics and period aggregation queries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::consensus::{get_metrics, scan_contract_state};
use super::store::Store;
use super::types::SqlTime;
use crate::error::{Result, StorageError};
use crate::stats::{ContractState, Period, StatStore, next_period, normalize_period};

impl Store {
    /// The latest hourly bucket at or before `timestamp`, stamped with the
    /// requested timestamp. Zero state if no bucket exists yet.
    pub fn metrics(&self, timestamp: DateTime<Utc>) -> std::result::Result<ContractState, StorageError> {
        self.transaction(|tx| get_metrics(tx, timestamp))
    }

    /// One state per period step in `[start, end)`. Buckets carry running
    /// totals, so each period takes the last hourly row that falls inside
    /// it; missing periods forward-fill from the preceding emitted row, and
    /// a leading gap fills from zero. Bounds are expected to be normalized
    /// to period boundaries by the caller.
    pub fn periods(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Period,
    ) -> std::result::Result<Vec<ContractState>, StorageError> {
        if start >= end {
            return Ok(Vec::new());
        }

        let values = self.transaction(|tx| {
            let mut stmt = tx.prepare(
                "SELECT active_contracts, valid_contracts, missed_contracts,
total_payouts_sc, total_payouts_usd, total_payouts_eur, total_payouts_btc,
estimated_revenue_sc, estimated_revenue_usd, estimated_revenue_eur, estimated_revenue_btc,
date_created
FROM hourly_contract_stats
WHERE date_created BETWEEN ?1 AND ?2
ORDER BY date_created ASC",
            )?;

            let mut values: HashMap<i64, ContractState> = HashMap::new();
            let rows = stmt.query_map(params![SqlTime(start), SqlTime(end)], |row| {
                let timestamp = row.get::<_, SqlTime>(11)?.0;
                scan_contract_state(row, timestamp)
            })?;
            for row in rows {
                let mut stat = row?;
                stat.timestamp = normalize_period(stat.timestamp, period);
                // ascending order: the last row per bucket wins
                values.insert(stat.timestamp.timestamp(), stat);
            }
            Ok(values)
        })?;

        let mut states = Vec::new();
        let mut prev = ContractState { timestamp: start, ..Default::default() };
        let mut current = start;
        while current < end {
            let mut state = values.get(&current.timestamp()).cloned().unwrap_or(prev);
            state.timestamp = current;
            states.push(state.clone());
            prev = state;
            current = next_period(current, period);
        }
        Ok(states)
    }
}

impl StatStore for Store {
    fn metrics(&self, timestamp: DateTime<Utc>) -> Result<ContractState> {
        Ok(Store::metrics(self, timestamp)?)
    }

    fn periods(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Period,
    ) -> Result<Vec<ContractState>> {
        Ok(Store::periods(self, start, end, period)?)
    }
}
