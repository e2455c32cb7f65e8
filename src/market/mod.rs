//! Exchange-rate ingestion: provider client and the long-running sync task.

mod client;
mod job;

pub use client::{RateClient, RatePoint, RateSource, Rates};
pub use job::{MarketSync, MarketSyncConfig};
