//! Consensus subscription transport test: a stand-in chain node serves a
//! canned change stream over HTTP and the client folds it into a store.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{Json, Router, extract::Query, extract::State, routing::get};
use common::{TestChain, far_future, seed_market_data};
use revenued::chain::node::NodeClient;
use revenued::chain::{ChangeCursor, ConsensusChange, ConsensusSubscriber, MATURITY_DELAY};
use revenued::error::StorageError;
use revenued::storage::Store;
use revenued::types::Currency;
use tokio::sync::broadcast;

/// Captures the change stream a [`TestChain`] produces.
#[derive(Default)]
struct Recorder {
    changes: Mutex<Vec<ConsensusChange>>,
}

impl ConsensusSubscriber for Recorder {
    fn process_consensus_change(&self, change: &ConsensusChange) {
        self.changes.lock().unwrap().push(change.clone());
    }

    fn last_change(&self) -> Result<ChangeCursor, StorageError> {
        Ok(ChangeCursor::Beginning)
    }
}

async fn serve_changes(changes: Vec<ConsensusChange>) -> String {
    let changes = Arc::new(changes);
    let app = Router::new()
        .route(
            "/consensus/changes",
            get(
                |State(changes): State<Arc<Vec<ConsensusChange>>>,
                 Query(params): Query<HashMap<String, String>>| async move {
                    let since = params.get("since").map(String::as_str).unwrap_or("beginning");
                    let start = if since == "beginning" {
                        0
                    } else {
                        changes
                            .iter()
                            .position(|c| c.id.to_string() == since)
                            .map(|i| i + 1)
                            .unwrap_or(changes.len())
                    };
                    Json(serde_json::json!({ "changes": &changes[start..] }))
                },
            ),
        )
        .with_state(changes);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test(flavor = "multi_thread")]
async fn subscription_folds_remote_change_stream() {
    // script a chain against a recorder to capture its raw change stream
    let recorder = Recorder::default();
    let mut chain = TestChain::new();
    chain.mine(&recorder, MATURITY_DELAY + 4);
    let tip = chain.tip();
    chain.form_contract(Currency::coins(200), Currency::coins(200), tip + 1000, tip + 1010);
    chain.mine_blocks(&recorder, 2);
    let last_id = chain.last_change_id();
    let changes = recorder.changes.into_inner().unwrap();

    let base_url = serve_changes(changes).await;

    let store = Arc::new(Store::in_memory().unwrap());
    seed_market_data(&store);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let client = NodeClient::new(base_url).unwrap();
    let subscription = tokio::spawn({
        let store = store.clone();
        async move { client.subscribe(store, ChangeCursor::Beginning, shutdown_rx).await }
    });

    // wait for the stream to be consumed
    let mut caught_up = false;
    for _ in 0..200 {
        if store.last_change().unwrap() == ChangeCursor::Change(last_id) {
            caught_up = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(caught_up, "subscription never caught up to the served tip");

    let state = store.metrics(far_future()).unwrap();
    assert_eq!(state.active, 1);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(10), subscription)
        .await
        .expect("subscription should stop on shutdown")
        .unwrap();
}
