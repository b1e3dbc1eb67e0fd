//! In-process broker
//!
//! Every hub sharing one `MemoryBroker` behaves like a process sharing one
//! Redis channel. Used for single-node deployments and tests.

use async_trait::async_trait;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use super::{Broker, BrokerError};

#[derive(Clone)]
pub struct MemoryBroker {
    tx: broadcast::Sender<Vec<u8>>,
}

impl MemoryBroker {
    /// # Arguments
    /// * `capacity` - Messages buffered per subscriber before it lags
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, message: Vec<u8>) -> Result<(), BrokerError> {
        // No subscribers is not an error, same as publishing to an idle Redis channel
        let receivers = self.tx.send(message).unwrap_or(0);
        debug!(receivers, "Published to in-process broker");
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, Vec<u8>>, BrokerError> {
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(|result| {
            future::ready(match result {
                Ok(message) => Some(message),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Broker subscriber lagged, messages dropped");
                    None
                }
            })
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives_published_message() {
        let broker = MemoryBroker::new(16);
        let mut first = broker.subscribe().await.unwrap();
        let mut second = broker.subscribe().await.unwrap();
        assert_eq!(broker.subscriber_count(), 2);

        broker.publish(b"ping".to_vec()).await.unwrap();

        assert_eq!(first.next().await.unwrap(), b"ping".to_vec());
        assert_eq!(second.next().await.unwrap(), b"ping".to_vec());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let broker = MemoryBroker::new(4);
        assert!(broker.publish(b"nobody".to_vec()).await.is_ok());
    }
}
