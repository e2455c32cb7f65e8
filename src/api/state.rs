//! Application state shared across HTTP handlers.

use crate::stats::Provider;

/// Shared handler state. The API is a stateless translation layer over the
/// stats provider.
#[derive(Clone)]
pub struct AppState {
    pub provider: Provider,
}
