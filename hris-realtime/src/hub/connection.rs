//! Connection handles held by the registry

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::UserId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a registered connection for unregistration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub user_id: UserId,
    pub id: ConnectionId,
}

/// Registry side of one client session
///
/// Holds the only sender of the session's outbound buffer. Dropping it (which
/// only the hub's unregister handler does once registered) closes the buffer
/// and lets the write loop finish.
#[derive(Debug)]
pub struct Connection {
    key: ConnectionKey,
    sender: mpsc::Sender<Vec<u8>>,
}

impl Connection {
    /// Create a connection and the receiving end of its outbound buffer
    pub fn new(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let key = ConnectionKey {
            user_id,
            id: ConnectionId::next(),
        };
        (Self { key, sender }, receiver)
    }

    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    pub fn user_id(&self) -> UserId {
        self.key.user_id
    }

    pub(crate) fn into_sender(self) -> mpsc::Sender<Vec<u8>> {
        self.sender
    }
}
