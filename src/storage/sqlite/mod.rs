//! SQLite-backed store: blocks, active contracts, hourly stats, market
//! data, and the consensus resume cursor.

mod consensus;
mod contracts;
mod market;
mod schema;
mod store;
mod types;

pub use market::ExchangeRate;
pub use store::Store;
