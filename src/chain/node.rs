//! Chain node subscription transport.
//!
//! The chain node runs as a separate process and serves its consensus
//! changes over HTTP. [`NodeClient`] polls for batches and delivers them to
//! the subscriber one at a time; the node sees processing as synchronous and
//! queues further changes behind it.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::broadcast;

use super::{ChangeCursor, ConsensusChange, ConsensusSubscriber};
use crate::error::Error;

/// Delay between polls when the node has no new changes, and after a
/// transport error.
const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Maximum changes requested per poll.
const BATCH_LIMIT: usize = 64;

#[derive(Debug, Deserialize)]
struct ChangeBatch {
    #[serde(default)]
    changes: Vec<ConsensusChange>,
}

/// Client for a chain node's consensus-change feed.
pub struct NodeClient {
    client: reqwest::Client,
    base_url: String,
}

impl NodeClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Config(format!("failed to build node client: {e}")))?;
        Ok(NodeClient { client, base_url: base_url.into() })
    }

    /// Stream consensus changes to `subscriber`, resuming from `resume_from`.
    /// Changes are processed serially via `spawn_blocking`; a subscriber
    /// panic propagates and takes the process down, so the next start
    /// retries the same change from the persisted cursor. Transport errors
    /// are logged and retried. Returns when the shutdown signal fires.
    pub async fn subscribe<S: ConsensusSubscriber + 'static>(
        &self,
        subscriber: Arc<S>,
        resume_from: ChangeCursor,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut cursor = resume_from;
        loop {
            let batch = tokio::select! {
                result = self.fetch_changes(cursor) => result,
                _ = shutdown.recv() => return,
            };

            let changes = match batch {
                Ok(changes) => changes,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to fetch consensus changes");
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_INTERVAL) => continue,
                        _ = shutdown.recv() => return,
                    }
                }
            };

            if changes.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(POLL_INTERVAL) => continue,
                    _ = shutdown.recv() => return,
                }
            }

            for change in changes {
                let sub = subscriber.clone();
                let id = change.id;
                let result =
                    tokio::task::spawn_blocking(move || sub.process_consensus_change(&change))
                        .await;
                if let Err(join_err) = result {
                    if join_err.is_panic() {
                        // restart-driven recovery: resume from the cursor
                        std::panic::resume_unwind(join_err.into_panic());
                    }
                    return; // runtime shutting down
                }
                cursor = ChangeCursor::Change(id);
            }
        }
    }

    async fn fetch_changes(
        &self,
        cursor: ChangeCursor,
    ) -> Result<Vec<ConsensusChange>, reqwest::Error> {
        let since = match cursor {
            ChangeCursor::Beginning => "beginning".to_string(),
            ChangeCursor::Change(id) => id.to_string(),
        };
        let url = format!("{}/consensus/changes", self.base_url);
        let limit = BATCH_LIMIT.to_string();
        let batch: ChangeBatch = self
            .client
            .get(&url)
            .query(&[("since", since.as_str()), ("limit", limit.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(batch.changes)
    }
}
