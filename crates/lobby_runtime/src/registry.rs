//! Connection registry
//!
//! Tracks every live transport connection, the identity assigned to it, its
//! optional display name and its lobby membership. The registry is the only
//! structure shared by all lobbies, so every operation is safe under
//! concurrent access from arbitrary connection tasks.
//!
//! Outbound delivery never blocks: each connection owns a bounded queue that
//! its transport task drains. A full or closed queue surfaces as
//! [`LobbyError::Delivery`], which callers treat as non-fatal.

use dashmap::DashMap;
use lobby_types::{ConnectionId, LobbyCode, LobbyError, Role, ServerMessage};
use serde_json::Value;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Sending half of a connection's outbound queue.
pub type Outbound = mpsc::Sender<ServerMessage>;

/// Which lobby a connection belongs to, and as what.
///
/// `session` identifies the lobby instance behind `code`, which can be reused
/// once a lobby ends. `ticket` identifies this particular claim: leaving and
/// rejoining the same lobby yields a new ticket, so a late release aimed at
/// the old claim cannot clear the new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub code: LobbyCode,
    pub role: Role,
    pub session: Uuid,
    pub ticket: Uuid,
}

impl Membership {
    pub(crate) fn new(code: LobbyCode, role: Role, session: Uuid) -> Self {
        Self {
            code,
            role,
            session,
            ticket: Uuid::new_v4(),
        }
    }
}

/// Snapshot of a registered connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub display_name: Option<String>,
    pub membership: Option<Membership>,
    pub connected_at: SystemTime,
}

struct ConnectionEntry {
    display_name: Option<String>,
    membership: Option<Membership>,
    outbound: Outbound,
    connected_at: SystemTime,
}

/// Registry of live connections keyed by identity.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Registers a new connection and returns its identity.
    pub fn register(&self, outbound: Outbound) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections.insert(
            id,
            ConnectionEntry {
                display_name: None,
                membership: None,
                outbound,
                connected_at: SystemTime::now(),
            },
        );
        debug!(connection = %id, "Connection registered");
        id
    }

    /// Registers an in-memory connection and hands back its receiving end.
    ///
    /// Used by tests and by embedders that bridge their own transport.
    pub fn register_channel(&self, buffer: usize) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        (self.register(tx), rx)
    }

    /// Removes a connection. Once this returns, nothing can be delivered to it.
    pub fn unregister(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id).map(|(id, entry)| {
            debug!(connection = %id, "Connection unregistered");
            Connection {
                id,
                display_name: entry.display_name,
                membership: entry.membership,
                connected_at: entry.connected_at,
            }
        })
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.get(&id).map(|entry| Connection {
            id,
            display_name: entry.display_name.clone(),
            membership: entry.membership.clone(),
            connected_at: entry.connected_at,
        })
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queues `event` for delivery to `id`.
    pub fn send(&self, id: ConnectionId, event: &str, payload: Value) -> Result<(), LobbyError> {
        self.send_message(id, ServerMessage::new(event, payload))
    }

    pub fn send_message(&self, id: ConnectionId, message: ServerMessage) -> Result<(), LobbyError> {
        // Clone the sender so the shard lock is not held while queueing.
        let outbound = self
            .connections
            .get(&id)
            .map(|entry| entry.outbound.clone())
            .ok_or(LobbyError::Delivery(id))?;

        outbound.try_send(message).map_err(|e| {
            match e {
                mpsc::error::TrySendError::Full(message) => {
                    warn!(connection = %id, event = %message.event_name, "Outbound queue full, dropping message");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    debug!(connection = %id, "Outbound queue closed");
                }
            }
            LobbyError::Delivery(id)
        })
    }

    pub fn set_display_name(&self, id: ConnectionId, name: impl Into<String>) -> Result<(), LobbyError> {
        let mut entry = self
            .connections
            .get_mut(&id)
            .ok_or(LobbyError::UnknownConnection(id))?;
        entry.display_name = Some(name.into());
        Ok(())
    }

    /// Atomically records a membership for a connection that has none.
    pub(crate) fn claim_membership(&self, id: ConnectionId, membership: Membership) -> Result<(), LobbyError> {
        let mut entry = self
            .connections
            .get_mut(&id)
            .ok_or(LobbyError::UnknownConnection(id))?;
        if let Some(existing) = &entry.membership {
            return Err(LobbyError::AlreadyInLobby(existing.code.clone()));
        }
        entry.membership = Some(membership);
        Ok(())
    }

    /// Clears the membership of `id`, but only if it is still the claim
    /// identified by `ticket`.
    pub(crate) fn release_membership(&self, id: ConnectionId, ticket: Uuid) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut entry) if entry.membership.as_ref().is_some_and(|m| m.ticket == ticket) => {
                entry.membership = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_send_unregister() {
        let registry = ConnectionRegistry::new();
        let (id, mut rx) = registry.register_channel(8);

        registry.send(id, "hello", json!({"n": 1})).expect("send to live connection");
        let message = rx.recv().await.expect("message queued");
        assert_eq!(message.event_name, "hello");
        assert_eq!(message.payload, json!({"n": 1}));

        let removed = registry.unregister(id).expect("connection was registered");
        assert_eq!(removed.id, id);
        assert!(registry.lookup(id).is_none());
        assert_eq!(registry.send(id, "late", json!(null)), Err(LobbyError::Delivery(id)));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let registry = ConnectionRegistry::new();
        let (id, mut rx) = registry.register_channel(1);

        assert!(registry.send(id, "first", json!(1)).is_ok());
        assert_eq!(registry.send(id, "second", json!(2)), Err(LobbyError::Delivery(id)));
        assert_eq!(rx.recv().await.map(|m| m.event_name), Some("first".to_string()));
    }

    #[tokio::test]
    async fn test_closed_receiver_is_delivery_error() {
        let registry = ConnectionRegistry::new();
        let (id, rx) = registry.register_channel(4);
        drop(rx);
        assert_eq!(registry.send(id, "gone", json!(null)), Err(LobbyError::Delivery(id)));
    }

    #[test]
    fn test_membership_is_exclusive() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.register(tx);
        let code = LobbyCode::new("ABCD");
        let session = Uuid::new_v4();

        let first = Membership::new(code.clone(), Role::Player, session);
        registry.claim_membership(id, first.clone()).expect("first claim succeeds");
        let second = registry.claim_membership(id, Membership::new(LobbyCode::new("WXYZ"), Role::Host, Uuid::new_v4()));
        assert_eq!(second, Err(LobbyError::AlreadyInLobby(code.clone())));

        assert!(registry.release_membership(id, first.ticket));
        assert!(registry.lookup(id).unwrap().membership.is_none());
    }

    #[test]
    fn test_stale_release_keeps_newer_claim() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.register(tx);
        let code = LobbyCode::new("ABCD");
        let session = Uuid::new_v4();

        let old = Membership::new(code.clone(), Role::Player, session);
        registry.claim_membership(id, old.clone()).unwrap();
        assert!(registry.release_membership(id, old.ticket));

        // Same lobby, same role, fresh claim.
        let new = Membership::new(code, Role::Player, session);
        registry.claim_membership(id, new.clone()).unwrap();
        assert!(!registry.release_membership(id, old.ticket));
        assert_eq!(registry.lookup(id).unwrap().membership, Some(new));
    }

    #[test]
    fn test_display_name() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.register(tx);
        registry.set_display_name(id, "Ana").unwrap();
        assert_eq!(registry.lookup(id).unwrap().display_name.as_deref(), Some("Ana"));

        let stranger = ConnectionId::new();
        assert_eq!(registry.set_display_name(stranger, "Bo"), Err(LobbyError::UnknownConnection(stranger)));
    }
}
