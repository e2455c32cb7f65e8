//! Response bodies for the web3-index integration.
//!
//! The rest of the API serializes [`crate::stats::ContractState`] directly;
//! only this feed flattens to floats, as its consumers expect.

use serde::Serialize;

/// One day's revenue: the delta between adjacent daily cumulative values.
#[derive(Debug, Clone, Serialize)]
pub struct Web3IndexDay {
    pub date: i64,
    pub revenue: f64,
}

/// Cumulative USD revenue at fixed offsets from the present.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Web3IndexRevenue {
    pub now: f64,
    pub one_day_ago: f64,
    pub two_days_ago: f64,
    pub one_week_ago: f64,
    pub two_weeks_ago: f64,
    pub thirty_days_ago: f64,
    pub sixty_days_ago: f64,
    pub ninety_days_ago: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Web3IndexResponse {
    pub revenue: Web3IndexRevenue,
    pub days: Vec<Web3IndexDay>,
}
