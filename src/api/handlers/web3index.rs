//! Web3 index revenue feed.

use std::sync::Arc;

use axum::{Json, extract::State};
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Datelike, Duration, Utc};

use crate::api::dto::{Web3IndexDay, Web3IndexResponse, Web3IndexRevenue};
use crate::api::state::AppState;
use crate::error::Error;
use crate::stats::Period;

fn usd_float(value: &BigDecimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

/// GET /integrations/web3index/revenue - cumulative USD revenue at fixed
/// offsets from now, plus a per-day revenue series starting on the first of
/// the month two years ago.
pub async fn get_web3_index(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Web3IndexResponse>, Error> {
    let now = Utc::now();

    let cumulative_usd = |timestamp: DateTime<Utc>| -> Result<f64, Error> {
        let metrics = state.provider.metrics(timestamp)?;
        Ok(usd_float(&metrics.revenue.usd))
    };

    let revenue = Web3IndexRevenue {
        now: cumulative_usd(now)?,
        one_day_ago: cumulative_usd(now - Duration::days(1))?,
        two_days_ago: cumulative_usd(now - Duration::days(2))?,
        one_week_ago: cumulative_usd(now - Duration::days(7))?,
        two_weeks_ago: cumulative_usd(now - Duration::days(14))?,
        thirty_days_ago: cumulative_usd(now - Duration::days(30))?,
        sixty_days_ago: cumulative_usd(now - Duration::days(60))?,
        ninety_days_ago: cumulative_usd(now - Duration::days(90))?,
    };

    // the day series spans from the first of the month two years ago; each
    // entry is the difference between adjacent daily cumulative values
    let start = chrono::NaiveDate::from_ymd_opt(now.year() - 2, now.month(), 1)
        .unwrap_or_else(|| now.date_naive())
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now);
    let daily = state.provider.periods(start, now, Period::Daily)?;

    let mut days = Vec::with_capacity(daily.len().saturating_sub(1));
    for pair in daily.windows(2) {
        let delta = &pair[1].revenue.usd - &pair[0].revenue.usd;
        days.push(Web3IndexDay {
            date: pair[1].timestamp.timestamp(),
            revenue: usd_float(&delta),
        });
    }

    Ok(Json(Web3IndexResponse { revenue, days }))
}
