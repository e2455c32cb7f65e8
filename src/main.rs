//! revenued - revenue indexer and API for a storage network's host payouts

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use revenued::api::{self, AppState};
use revenued::chain::node::NodeClient;
use revenued::config::Config;
use revenued::market::{MarketSync, RateClient};
use revenued::stats::{Provider, StatStore};
use revenued::storage::Store;

#[derive(Parser, Debug)]
#[command(name = "revenued")]
#[command(about = "Revenue indexer and API for a storage network's host payouts")]
struct Args {
    /// Directory to store data
    #[arg(long, env = "REVENUED_DIR", default_value = ".")]
    dir: PathBuf,

    /// Address for the HTTP API to listen on
    #[arg(long = "http", env = "REVENUED_HTTP_ADDRESS", default_value = "127.0.0.1:9980")]
    http_addr: String,

    /// Base URL of the chain node's consensus feed
    #[arg(long, env = "REVENUED_NODE_URL", default_value = "http://127.0.0.1:9970")]
    node_url: String,

    /// Base URL of the exchange-rate provider
    #[arg(long, env = "REVENUED_MARKET_URL", default_value = "https://api.siacentral.com")]
    market_url: String,

    /// Log level
    #[arg(long, env = "REVENUED_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config {
        dir: args.dir,
        http_addr: args.http_addr,
        node_url: args.node_url,
        market_url: args.market_url,
        log_level: args.log_level,
        ..Default::default()
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting revenued v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.dir)?;

    tracing::info!(path = %config.database_path().display(), "opening revenue database");
    let store = Arc::new(Store::open(config.database_path())?);

    // shutdown fan-out for the background tasks
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // market data feed
    let market_client = Arc::new(RateClient::new(config.market_url.clone())?);
    let market_sync = MarketSync::new(store.clone(), market_client, config.market.clone());
    let market_task = tokio::spawn({
        let shutdown = shutdown_tx.subscribe();
        async move { market_sync.run(shutdown).await }
    });

    // consensus subscription, resuming from the persisted cursor
    let node = NodeClient::new(config.node_url.clone())?;
    let resume_from = store.last_change()?;
    let chain_task = tokio::spawn({
        let store = store.clone();
        let shutdown = shutdown_tx.subscribe();
        async move { node.subscribe(store, resume_from, shutdown).await }
    });

    // HTTP API
    let provider = Provider::new(store as Arc<dyn StatStore>);
    let app = api::create_router(Arc::new(AppState { provider }));

    tracing::info!(addr = %config.http_addr, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await?;

    tracing::info!("waiting for background tasks to shut down");
    market_task.await?;
    chain_task.await?;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT, then fan the shutdown out to background
/// tasks. A watchdog grants a 10-second drain before forcing exit.
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, starting graceful shutdown");
    let _ = shutdown_tx.send(());

    tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        tracing::error!("shutdown timed out, forcing exit");
        std::process::exit(1);
    });
}
