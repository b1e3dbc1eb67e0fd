//! Connection hub
//!
//! A single coordinator task owns every mutation of the [`Registry`]. Callers
//! talk to it through [`Hub`], a cheap cloneable handle that only sends
//! requests:
//!
//! - register / unregister travel on an unbounded control channel and are
//!   handled before pending deliveries
//! - deliveries travel on a bounded channel, so a flooding broker listener is
//!   slowed down instead of growing memory
//!
//! Only the coordinator's unregister handler closes a connection's buffer.
//! A full buffer found during delivery schedules an unregister request.

pub mod connection;
pub mod envelope;
pub mod registry;

pub use connection::{Connection, ConnectionId, ConnectionKey};
pub use envelope::Envelope;
pub use registry::{ConnectionState, DeliveryReport, Registry, UserConnections};

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::Broker;

/// User identity as issued by the upstream authentication layer
pub type UserId = u64;

enum ControlCommand {
    Register(Connection),
    Unregister(ConnectionKey),
}

#[derive(Debug, Default)]
struct HubCounters {
    delivered: AtomicU64,
    overflowed: AtomicU64,
    closed: AtomicU64,
}

/// Diagnostics snapshot
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HubStats {
    pub users: usize,
    pub connections: usize,
    /// Payloads placed into connection buffers
    pub delivered: u64,
    /// Connections scheduled for removal because their buffer was full
    pub dropped_overflow: u64,
    /// Buffers closed by the unregister handler (or at shutdown)
    pub closed: u64,
}

/// Handle to a running hub
#[derive(Clone)]
pub struct Hub {
    control_tx: mpsc::UnboundedSender<ControlCommand>,
    delivery_tx: mpsc::Sender<Envelope>,
    registry: Arc<RwLock<Registry>>,
    counters: Arc<HubCounters>,
    broker: Arc<dyn Broker>,
}

impl Hub {
    /// Start the coordinator task
    ///
    /// # Arguments
    /// * `broker` - Channel `send_to_user` publishes on
    /// * `delivery_buffer` - Capacity of the delivery queue
    /// * `cancel` - Stops the coordinator; all buffers are closed on exit
    pub fn spawn(
        broker: Arc<dyn Broker>,
        delivery_buffer: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (delivery_tx, delivery_rx) = mpsc::channel(delivery_buffer.max(1));
        let registry = Arc::new(RwLock::new(Registry::new()));
        let counters = Arc::new(HubCounters::default());

        let coordinator = Coordinator {
            registry: Arc::clone(&registry),
            counters: Arc::clone(&counters),
            control_tx: control_tx.clone(),
        };
        let handle = tokio::spawn(coordinator.run(control_rx, delivery_rx, cancel));

        let hub = Self {
            control_tx,
            delivery_tx,
            registry,
            counters,
            broker,
        };
        (hub, handle)
    }

    /// Add a connection to its user's collection
    pub fn register(&self, connection: Connection) {
        let key = connection.key();
        if self
            .control_tx
            .send(ControlCommand::Register(connection))
            .is_err()
        {
            // Coordinator is gone; the connection (and its buffer) is dropped here
            warn!(user_id = key.user_id, connection = %key.id, "Hub stopped, register ignored");
        }
    }

    /// Request removal of a connection. Safe to call any number of times.
    pub fn unregister(&self, key: ConnectionKey) {
        if self
            .control_tx
            .send(ControlCommand::Unregister(key))
            .is_err()
        {
            debug!(user_id = key.user_id, connection = %key.id, "Hub stopped, unregister ignored");
        }
    }

    /// Publish a payload for every session of `user_id`, on any process
    ///
    /// Best effort: broker failures are logged and the push is dropped.
    pub async fn send_to_user(&self, user_id: UserId, payload: impl Into<Vec<u8>>) {
        let envelope = Envelope::new(user_id, payload);

        let message = match envelope.encode() {
            Ok(message) => message,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to encode envelope, push dropped");
                return;
            }
        };

        if let Err(e) = self.broker.publish(message).await {
            warn!(user_id, error = %e, "Broker publish failed, push dropped");
        }
    }

    /// Deliver to this process's connections only
    ///
    /// Used by the broker listener. Waits for room in the delivery queue.
    pub async fn deliver(&self, envelope: Envelope) {
        let user_id = envelope.target_user_id;
        if self.delivery_tx.send(envelope).await.is_err() {
            debug!(user_id, "Hub stopped, delivery dropped");
        }
    }

    pub async fn contains(&self, key: ConnectionKey) -> bool {
        self.registry.read().await.contains(key)
    }

    pub async fn connection_count(&self, user_id: UserId) -> usize {
        self.registry.read().await.connection_count(user_id)
    }

    pub async fn has_user(&self, user_id: UserId) -> bool {
        self.registry.read().await.has_user(user_id)
    }

    pub async fn snapshot(&self) -> Vec<UserConnections> {
        self.registry.read().await.users()
    }

    pub async fn stats(&self) -> HubStats {
        let registry = self.registry.read().await;
        HubStats {
            users: registry.user_count(),
            connections: registry.total_connections(),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped_overflow: self.counters.overflowed.load(Ordering::Relaxed),
            closed: self.counters.closed.load(Ordering::Relaxed),
        }
    }
}

struct Coordinator {
    registry: Arc<RwLock<Registry>>,
    counters: Arc<HubCounters>,
    /// Used to queue unregister requests for overflowed connections
    control_tx: mpsc::UnboundedSender<ControlCommand>,
}

impl Coordinator {
    async fn run(
        self,
        mut control_rx: mpsc::UnboundedReceiver<ControlCommand>,
        mut delivery_rx: mpsc::Receiver<Envelope>,
        cancel: CancellationToken,
    ) {
        info!("Hub coordinator started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Hub coordinator cancelled");
                    break;
                }
                Some(command) = control_rx.recv() => match command {
                    ControlCommand::Register(connection) => self.handle_register(connection).await,
                    ControlCommand::Unregister(key) => self.handle_unregister(key).await,
                },
                envelope = delivery_rx.recv() => match envelope {
                    Some(envelope) => self.handle_delivery(envelope).await,
                    None => {
                        debug!("All hub handles dropped");
                        break;
                    }
                },
            }
        }

        let closed = self.registry.write().await.clear();
        self.counters
            .closed
            .fetch_add(closed as u64, Ordering::Relaxed);
        info!(closed, "Hub coordinator stopped");
    }

    async fn handle_register(&self, connection: Connection) {
        let key = connection.key();
        let count = {
            let mut registry = self.registry.write().await;
            registry.insert(connection);
            registry.connection_count(key.user_id)
        };
        info!(user_id = key.user_id, connection = %key.id, connections = count, "Registered client");
    }

    async fn handle_unregister(&self, key: ConnectionKey) {
        let removed = self.registry.write().await.remove(key);

        if removed {
            self.counters.closed.fetch_add(1, Ordering::Relaxed);
            info!(user_id = key.user_id, connection = %key.id, "Unregistered client");
        } else {
            debug!(user_id = key.user_id, connection = %key.id, "Unregister for unknown connection ignored");
        }
    }

    async fn handle_delivery(&self, envelope: Envelope) {
        let report = self.registry.write().await.deliver(&envelope);

        self.counters
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);

        for key in report.overflowed {
            self.counters.overflowed.fetch_add(1, Ordering::Relaxed);
            warn!(
                user_id = key.user_id,
                connection = %key.id,
                "Outbound buffer full, scheduling removal"
            );
            // Never fails: the coordinator holds the receiver
            let _ = self.control_tx.send(ControlCommand::Unregister(key));
        }
    }
}
