//! Bridges run event streams to client connections.
//!
//! Each attached connection gets its own delivery task reading from the
//! run's bus subscription. A connection that fails or cannot keep up is
//! dropped; the run and every other subscriber are unaffected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::runs::{RunNotFound, RunRegistry};

/// A subscriber connection failed or went away
#[derive(Debug, Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Outbound half of a client connection.
///
/// Implemented by the transport layer (e.g. a WebSocket wrapper); the
/// engine only ever pushes serialized events through it.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Deliver one serialized event to the client
    async fn send_text(&self, message: String) -> Result<(), DeliveryError>;
}

/// Identifier of one live subscription
pub type SubscriptionId = u64;

/// Tracks live subscriber connections, one delivery task each
pub struct SubscriptionManager {
    runs: Arc<RunRegistry>,
    delivery_timeout: Duration,
    next_id: AtomicU64,
    active: Arc<Mutex<HashMap<SubscriptionId, JoinHandle<()>>>>,
}

impl SubscriptionManager {
    /// Create a manager serving subscriptions from the given run directory
    pub fn new(runs: Arc<RunRegistry>, config: &EngineConfig) -> Self {
        Self {
            runs,
            delivery_timeout: config.delivery_timeout(),
            next_id: AtomicU64::new(0),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attach a connection to a run's event stream.
    ///
    /// Buffered history is replayed first, then live events, each sent as
    /// one JSON message. The delivery task ends when the stream completes,
    /// the connection fails, or a send exceeds the delivery timeout.
    pub async fn attach(
        &self,
        connection: Arc<dyn Connection>,
        run_id: Uuid,
    ) -> Result<SubscriptionId, RunNotFound> {
        let mut subscription = self.runs.subscribe(run_id).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let delivery_timeout = self.delivery_timeout;
        let active = Arc::clone(&self.active);

        // Insert under the same lock the task uses for its own cleanup, so
        // a fast-finishing task cannot remove its entry before it exists.
        let mut tasks = self.active.lock().await;
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                let payload = match serde_json::to_string(event.as_ref()) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(%run_id, error = %e, "Failed to serialize event");
                        break;
                    }
                };

                match timeout(delivery_timeout, connection.send_text(payload)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(%run_id, error = %e, "Subscriber send failed, dropping connection");
                        break;
                    }
                    Err(_) => {
                        warn!(%run_id, "Subscriber unresponsive, dropping connection");
                        break;
                    }
                }
            }

            active.lock().await.remove(&id);
        });
        tasks.insert(id, task);
        drop(tasks);

        info!(%run_id, subscription = id, "Subscriber attached");
        Ok(id)
    }

    /// Tear down a subscription. Idempotent; safe to call from connection
    /// teardown at any time.
    pub async fn detach(&self, id: SubscriptionId) {
        if let Some(task) = self.active.lock().await.remove(&id) {
            task.abort();
            info!(subscription = id, "Subscriber detached");
        }
    }

    /// Number of currently live subscriptions
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}
