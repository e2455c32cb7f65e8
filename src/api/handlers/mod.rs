//! HTTP handlers.

mod revenue;
mod web3index;

pub use revenue::{get_revenue, get_revenue_periods};
pub use web3index::get_web3_index;
