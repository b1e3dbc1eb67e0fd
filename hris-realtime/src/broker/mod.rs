//! Fan-out broker adapter
//!
//! Makes `Hub::send_to_user` reach sessions held by any process: envelopes are
//! published on one shared channel and every process runs a listener that
//! feeds what it receives into its local hub.
//!
//! Delivery is at-most-once. A broker outage drops pushes (logged); the
//! notification rows are persisted independently, so clients recover by
//! re-fetching.

pub mod memory;
pub mod redis_broker;

pub use memory::MemoryBroker;
pub use redis_broker::RedisBroker;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::hub::{Envelope, Hub};

/// Broker errors
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Subscription failed: {0}")]
    Subscribe(String),
}

/// Shared publish/subscribe channel
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish raw bytes on the shared channel
    async fn publish(&self, message: Vec<u8>) -> Result<(), BrokerError>;

    /// Subscribe to the shared channel; the stream ends if the subscription drops
    async fn subscribe(&self) -> Result<BoxStream<'static, Vec<u8>>, BrokerError>;
}

/// Start the subscription listener that feeds broker messages into `hub`
///
/// The first subscription is attempted before returning, so messages
/// published after this call resolves are not missed (unless the broker is
/// down, in which case the listener keeps retrying every `reconnect_delay`).
pub async fn spawn_listener(
    broker: Arc<dyn Broker>,
    hub: Hub,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let initial = match broker.subscribe().await {
        Ok(stream) => {
            info!("Subscribed to broker channel");
            Some(stream)
        }
        Err(e) => {
            warn!(error = %e, "Initial broker subscription failed, will retry");
            None
        }
    };

    tokio::spawn(run_listener(broker, hub, initial, reconnect_delay, cancel))
}

async fn run_listener(
    broker: Arc<dyn Broker>,
    hub: Hub,
    mut pending: Option<BoxStream<'static, Vec<u8>>>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let mut messages = match pending.take() {
            Some(stream) => stream,
            None => {
                let result = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = broker.subscribe() => result,
                };
                match result {
                    Ok(stream) => {
                        info!("Re-subscribed to broker channel");
                        stream
                    }
                    Err(e) => {
                        warn!(error = %e, "Broker subscription failed");
                        if wait_or_cancel(reconnect_delay, &cancel).await {
                            break;
                        }
                        continue;
                    }
                }
            }
        };

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Broker listener cancelled");
                    return;
                }
                message = messages.next() => match message {
                    Some(bytes) => forward(&hub, &bytes).await,
                    None => {
                        warn!("Broker subscription ended");
                        break;
                    }
                },
            }
        }

        if wait_or_cancel(reconnect_delay, &cancel).await {
            break;
        }
    }

    debug!("Broker listener stopped");
}

async fn forward(hub: &Hub, bytes: &[u8]) {
    match Envelope::decode(bytes) {
        Ok(envelope) => hub.deliver(envelope).await,
        Err(e) => warn!(error = %e, "Failed to decode broker message"),
    }
}

/// Sleep for `delay`; returns true if cancelled first
async fn wait_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
