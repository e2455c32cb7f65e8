//! HTTP API: a thin translation of stats provider results to JSON.

pub mod dto;
mod error;
mod handlers;
mod router;
mod state;

pub use error::ErrorResponse;
pub use router::create_router;
pub use state::AppState;
