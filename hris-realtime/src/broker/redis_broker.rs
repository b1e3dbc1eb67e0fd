//! Redis pub/sub broker
//!
//! Publishing goes through a `ConnectionManager`, which reconnects on its own
//! after the broker restarts. Each subscription opens a dedicated pub/sub
//! connection; when it drops, the listener re-subscribes.

use async_trait::async_trait;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use super::{Broker, BrokerError};

pub struct RedisBroker {
    client: redis::Client,
    publisher: ConnectionManager,
    channel: String,
}

impl RedisBroker {
    /// Connect to Redis and prepare publishing on `channel`
    pub async fn connect(url: &str, channel: impl Into<String>) -> Result<Self, BrokerError> {
        let client =
            redis::Client::open(url).map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let channel = channel.into();
        info!(channel = %channel, "Connected to Redis broker");

        Ok(Self {
            client,
            publisher,
            channel,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, message: Vec<u8>) -> Result<(), BrokerError> {
        let mut connection = self.publisher.clone();
        let receivers: i64 = connection
            .publish(&self.channel, message)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        debug!(channel = %self.channel, receivers, "Published to Redis");
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, Vec<u8>>, BrokerError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let stream = pubsub.into_on_message().filter_map(|message| {
            future::ready(match message.get_payload::<Vec<u8>>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(error = %e, "Unreadable Redis message payload");
                    None
                }
            })
        });

        Ok(stream.boxed())
    }
}
