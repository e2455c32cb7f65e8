//! Runtime configuration.

use std::path::PathBuf;

use crate::market::MarketSyncConfig;

/// Process configuration, assembled from CLI flags and environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory. Holds `revenue.sqlite3`; the chain node owns its own
    /// subdirectories alongside it.
    pub dir: PathBuf,
    /// Address the HTTP API listens on.
    pub http_addr: String,
    /// Base URL of the chain node's consensus feed.
    pub node_url: String,
    /// Base URL of the exchange-rate provider.
    pub market_url: String,
    /// Log filter directive.
    pub log_level: String,
    /// Market sync tuning.
    pub market: MarketSyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dir: PathBuf::from("."),
            http_addr: "127.0.0.1:9980".to_string(),
            node_url: "http://127.0.0.1:9970".to_string(),
            market_url: "https://api.siacentral.com".to_string(),
            log_level: "info".to_string(),
            market: MarketSyncConfig::default(),
        }
    }
}

impl Config {
    /// Path of the revenue database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.dir.join("revenue.sqlite3")
    }
}
