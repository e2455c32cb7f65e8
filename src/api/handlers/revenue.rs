//! Revenue metrics handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::api::state::AppState;
use crate::error::Error;
use crate::stats::{ContractState, Period, next_period, normalize_period};

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    timestamp: Option<DateTime<Utc>>,
}

/// GET /metrics/revenue - the latest hourly state at or before `timestamp`
/// (default: now).
pub async fn get_revenue(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<ContractState>, Error> {
    let timestamp = query.timestamp.unwrap_or_else(Utc::now);
    let metrics = state.provider.metrics(timestamp)?;
    Ok(Json(metrics))
}

#[derive(Debug, Deserialize)]
pub struct PeriodsQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

/// GET /metrics/revenue/:period - one state per period step between `start`
/// and `end`, forward-filled. Bounds are widened to period boundaries.
pub async fn get_revenue_periods(
    State(state): State<Arc<AppState>>,
    Path(period): Path<String>,
    Query(query): Query<PeriodsQuery>,
) -> Result<Json<Vec<ContractState>>, Error> {
    let (start, end) = match (query.start, query.end) {
        (Some(start), Some(end)) => (start, end),
        _ => return Err(Error::InvalidArgument("start and end are required".into())),
    };
    if end < start {
        return Err(Error::InvalidArgument("end must be after start".into()));
    }
    let period: Period = period.parse().map_err(Error::InvalidArgument)?;

    // widen both bounds outward so partial periods are included
    let start = normalize_period(start, period);
    let end = next_period(normalize_period(end, period), period);

    let states = state.provider.periods(start, end, period)?;
    Ok(Json(states))
}
