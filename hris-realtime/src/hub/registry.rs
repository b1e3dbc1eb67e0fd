//! User → connections table
//!
//! Mutated only by the hub coordinator. Every method is synchronous; the
//! coordinator wraps the table in a reader/writer lock so diagnostics can
//! take snapshots while it runs.

use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::connection::{Connection, ConnectionId, ConnectionKey};
use super::envelope::Envelope;
use super::UserId;

/// Lifecycle of a registered connection. `Closed` is represented by absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Registered,
    /// Buffer overflowed or session went away; unregister is queued
    PendingRemoval,
}

#[derive(Debug)]
struct ConnectionEntry {
    id: ConnectionId,
    sender: mpsc::Sender<Vec<u8>>,
    state: ConnectionState,
}

/// Outcome of one delivery pass
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Connections that just moved to `PendingRemoval`
    pub overflowed: Vec<ConnectionKey>,
}

/// Per-user view for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct UserConnections {
    pub user_id: UserId,
    pub connections: Vec<ConnectionState>,
}

/// Invariant: a user key is present iff it has at least one connection
#[derive(Debug, Default)]
pub struct Registry {
    users: HashMap<UserId, Vec<ConnectionEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a connection under its user key
    pub fn insert(&mut self, connection: Connection) {
        let key = connection.key();
        self.users.entry(key.user_id).or_default().push(ConnectionEntry {
            id: key.id,
            sender: connection.into_sender(),
            state: ConnectionState::Registered,
        });
    }

    /// Remove a connection, closing its buffer. Returns false if it was not present.
    pub fn remove(&mut self, key: ConnectionKey) -> bool {
        let Some(entries) = self.users.get_mut(&key.user_id) else {
            return false;
        };

        let Some(position) = entries.iter().position(|entry| entry.id == key.id) else {
            return false;
        };

        // Dropping the entry drops the last sender, which closes the buffer
        entries.remove(position);

        if entries.is_empty() {
            self.users.remove(&key.user_id);
        }

        true
    }

    /// Non-blocking enqueue into every registered connection of the target user
    ///
    /// A full (or abandoned) buffer is never closed here: the connection is
    /// marked `PendingRemoval` and reported so the caller can queue an unregister.
    pub fn deliver(&mut self, envelope: &Envelope) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let Some(entries) = self.users.get_mut(&envelope.target_user_id) else {
            return report;
        };

        for entry in entries
            .iter_mut()
            .filter(|entry| entry.state == ConnectionState::Registered)
        {
            match entry.sender.try_send(envelope.payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                    entry.state = ConnectionState::PendingRemoval;
                    report.overflowed.push(ConnectionKey {
                        user_id: envelope.target_user_id,
                        id: entry.id,
                    });
                }
            }
        }

        report
    }

    pub fn contains(&self, key: ConnectionKey) -> bool {
        self.users
            .get(&key.user_id)
            .is_some_and(|entries| entries.iter().any(|entry| entry.id == key.id))
    }

    pub fn state_of(&self, key: ConnectionKey) -> Option<ConnectionState> {
        self.users
            .get(&key.user_id)?
            .iter()
            .find(|entry| entry.id == key.id)
            .map(|entry| entry.state)
    }

    pub fn has_user(&self, user_id: UserId) -> bool {
        self.users.contains_key(&user_id)
    }

    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.users.get(&user_id).map_or(0, Vec::len)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn total_connections(&self) -> usize {
        self.users.values().map(Vec::len).sum()
    }

    pub fn users(&self) -> Vec<UserConnections> {
        let mut users: Vec<UserConnections> = self
            .users
            .iter()
            .map(|(user_id, entries)| UserConnections {
                user_id: *user_id,
                connections: entries.iter().map(|entry| entry.state).collect(),
            })
            .collect();
        users.sort_by_key(|user| user.user_id);
        users
    }

    /// Drop every connection, closing all buffers. Returns how many were closed.
    pub fn clear(&mut self) -> usize {
        let closed = self.total_connections();
        self.users.clear();
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_remove_maintains_user_key_invariant() {
        let mut registry = Registry::new();
        let (web, _web_rx) = Connection::new(7, 4);
        let (mobile, _mobile_rx) = Connection::new(7, 4);
        let (web_key, mobile_key) = (web.key(), mobile.key());

        registry.insert(web);
        registry.insert(mobile);
        assert_eq!(registry.connection_count(7), 2);

        assert!(registry.remove(web_key));
        assert!(registry.has_user(7));

        assert!(registry.remove(mobile_key));
        assert!(!registry.has_user(7));
        assert_eq!(registry.user_count(), 0);
    }

    #[test]
    fn test_remove_twice_is_noop() {
        let mut registry = Registry::new();
        let (connection, _rx) = Connection::new(3, 1);
        let key = connection.key();
        registry.insert(connection);

        assert!(registry.remove(key));
        assert!(!registry.remove(key));
    }

    #[test]
    fn test_remove_closes_buffer() {
        let mut registry = Registry::new();
        let (connection, mut rx) = Connection::new(3, 1);
        let key = connection.key();
        registry.insert(connection);

        registry.remove(key);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_deliver_marks_full_buffer_pending_without_closing() {
        let mut registry = Registry::new();
        let (connection, mut rx) = Connection::new(9, 1);
        let key = connection.key();
        registry.insert(connection);

        let first = registry.deliver(&Envelope::new(9, "one"));
        assert_eq!(first.delivered, 1);
        assert!(first.overflowed.is_empty());

        let second = registry.deliver(&Envelope::new(9, "two"));
        assert_eq!(second.delivered, 0);
        assert_eq!(second.overflowed, vec![key]);
        assert_eq!(registry.state_of(key), Some(ConnectionState::PendingRemoval));

        // Pending connections are skipped, not reported twice
        let third = registry.deliver(&Envelope::new(9, "three"));
        assert_eq!(third, DeliveryReport::default());

        // Buffer is still open: the queued payload is readable
        assert_eq!(rx.try_recv().unwrap(), b"one".to_vec());
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Empty)));
    }

    #[test]
    fn test_deliver_to_unknown_user() {
        let mut registry = Registry::new();
        assert_eq!(
            registry.deliver(&Envelope::new(404, "nobody")),
            DeliveryReport::default()
        );
    }
}
