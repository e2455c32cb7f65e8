//! Router setup.

use std::sync::Arc;

use axum::{Router, routing::get};

use crate::api::handlers;
use crate::api::state::AppState;

/// Create the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics/revenue", get(handlers::get_revenue))
        .route("/metrics/revenue/:period", get(handlers::get_revenue_periods))
        .route("/integrations/web3index/revenue", get(handlers::get_web3_index))
        .with_state(state)
}
