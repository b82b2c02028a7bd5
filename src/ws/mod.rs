pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;

use axum::extract::ws::{CloseFrame, Message};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::db::models::{is_valid_user_id, UserId};

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Unique per transport session for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One live client link: can push a frame to its client and can be closed.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(sender: ConnectionSender) -> Self {
        Self {
            id: ConnectionId::next(),
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a raw WebSocket message. Returns false if the connection is gone.
    pub fn send_message(&self, msg: Message) -> bool {
        self.sender.send(msg).is_ok()
    }

    /// Serialize `frame` as JSON text and queue it. Best-effort.
    pub fn send_json<T: Serialize>(&self, frame: &T) -> bool {
        match serde_json::to_string(frame) {
            Ok(text) => self.send_message(Message::Text(text.into())),
            Err(e) => {
                tracing::warn!(connection_id = %self.id, error = %e, "Failed to encode frame");
                false
            }
        }
    }

    /// Ask the writer to close the socket with `code` and `reason`.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.sender.send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })));
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid user identity: {0}")]
    InvalidIdentity(UserId),
}

/// Connection registry: tracks all active WebSocket connections per user.
/// A user can have multiple concurrent connections (multiple devices/tabs).
///
/// Admit and remove for the same user go through the DashMap entry API, so
/// they run under that user's shard lock and cannot interleave. A key is
/// present only while its connection set is non-empty.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    users: Arc<DashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// File `connection` under `user`. Returns true if it is the user's
    /// first live connection.
    pub fn admit(
        &self,
        user: UserId,
        connection: ConnectionHandle,
    ) -> Result<bool, RegistryError> {
        if !is_valid_user_id(user) {
            return Err(RegistryError::InvalidIdentity(user));
        }

        let mut entry = self.users.entry(user).or_default();
        let first = entry.is_empty();
        let connection_id = connection.id();
        entry.insert(connection_id, connection);
        let count = entry.len();
        drop(entry);

        tracing::debug!(
            user_id = user,
            connection_id = %connection_id,
            connections = count,
            "Connection registered"
        );
        Ok(first)
    }

    /// Remove a connection. Returns true if it was the user's last one.
    /// Removing an unknown connection is a no-op.
    pub fn remove(&self, user: UserId, connection_id: ConnectionId) -> bool {
        let last = match self.users.entry(user) {
            Entry::Occupied(mut entry) => {
                if entry.get_mut().remove(&connection_id).is_none() {
                    return false;
                }
                if entry.get().is_empty() {
                    entry.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => return false,
        };

        tracing::debug!(
            user_id = user,
            connection_id = %connection_id,
            last,
            "Connection unregistered"
        );
        last
    }

    /// Snapshot of a user's live connections. May be stale by the time it is used.
    pub fn connections_for(&self, user: UserId) -> Vec<ConnectionHandle> {
        self.users
            .get(&user)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every live connection.
    pub fn all_connections(&self) -> Vec<ConnectionHandle> {
        self.users
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Users with at least one live connection.
    pub fn online_users(&self) -> BTreeSet<UserId> {
        self.users.iter().map(|entry| *entry.key()).collect()
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.users.contains_key(&user)
    }

    pub fn connection_count(&self) -> usize {
        self.users.iter().map(|entry| entry.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    #[test]
    fn test_first_and_second_admission() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx1) = handle();
        let (c2, _rx2) = handle();

        assert_eq!(registry.admit(5, c1), Ok(true));
        assert_eq!(registry.admit(5, c2), Ok(false));
        assert_eq!(registry.connections_for(5).len(), 2);
        assert_eq!(registry.connection_count(), 2);
    }

    #[test]
    fn test_rejects_non_positive_identity() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx1) = handle();
        let (c2, _rx2) = handle();

        assert_eq!(registry.admit(0, c1), Err(RegistryError::InvalidIdentity(0)));
        assert_eq!(registry.admit(-3, c2), Err(RegistryError::InvalidIdentity(-3)));
        assert!(registry.online_users().is_empty());
    }

    #[test]
    fn test_remove_reports_last_connection() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx1) = handle();
        let (c2, _rx2) = handle();
        let (id1, id2) = (c1.id(), c2.id());
        registry.admit(5, c1).unwrap();
        registry.admit(5, c2).unwrap();

        assert!(!registry.remove(5, id1));
        assert!(registry.is_online(5));
        assert!(registry.remove(5, id2));
        assert!(!registry.is_online(5));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx1) = handle();
        let id = c1.id();
        registry.admit(5, c1).unwrap();

        assert!(registry.remove(5, id));
        assert!(!registry.remove(5, id));
        assert!(!registry.remove(8, id));
    }

    #[test]
    fn test_no_empty_sets_after_mixed_sequence() {
        let registry = ConnectionRegistry::new();
        let mut live: Vec<(UserId, ConnectionId)> = Vec::new();
        let mut receivers = Vec::new();

        // Deterministic interleaving of admits and removes across three users.
        for step in 0..60u64 {
            let user = (step % 3 + 1) as UserId;
            if step % 4 == 3 && !live.is_empty() {
                let idx = (step as usize * 7) % live.len();
                let (u, id) = live.remove(idx);
                registry.remove(u, id);
            } else {
                let (c, rx) = handle();
                live.push((user, c.id()));
                receivers.push(rx);
                registry.admit(user, c).unwrap();
            }

            for u in 1..=3 {
                let expected = live.iter().filter(|(lu, _)| *lu == u).count();
                assert_eq!(registry.connections_for(u).len(), expected);
                assert_eq!(registry.is_online(u), expected > 0);
            }
        }

        for (u, id) in live.drain(..) {
            registry.remove(u, id);
        }
        assert!(registry.online_users().is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_online_users_snapshot() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx1) = handle();
        let (c2, _rx2) = handle();
        registry.admit(9, c1).unwrap();
        registry.admit(2, c2).unwrap();

        let users: Vec<_> = registry.online_users().into_iter().collect();
        assert_eq!(users, vec![2, 9]);
        assert!(registry.connections_for(3).is_empty());
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_is_dropped() {
        let registry = ConnectionRegistry::new();
        let (c1, rx1) = handle();
        registry.admit(5, c1).unwrap();

        let snapshot = registry.connections_for(5);
        drop(rx1);
        assert!(!snapshot[0].send_json(&serde_json::json!({"type": "ping"})));
        assert!(snapshot[0].is_closed());
    }

    #[tokio::test]
    async fn test_send_json_and_close() {
        let (c1, mut rx1) = handle();
        assert!(c1.send_json(&serde_json::json!({"type": "hello"})));
        c1.close(4002, "Invalid identity");

        match rx1.recv().await.unwrap() {
            Message::Text(text) => assert_eq!(text.as_str(), r#"{"type":"hello"}"#),
            other => panic!("expected text frame, got {other:?}"),
        }
        match rx1.recv().await.unwrap() {
            Message::Close(Some(frame)) => assert_eq!(frame.code, 4002),
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}
