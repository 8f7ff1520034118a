//! Per-client connection state and the process-wide connection registry
//! (spec §3, §4.2).
//!
//! A `Connection` is created on the first request/frame and destroyed on
//! HTTP response completion (short-lived) or WebSocket close (long-lived).
//! Destruction removes it from the registry and from every presence table it
//! joined.

use crate::session::Session;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// The transport a connection arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// A single HTTP request/response.
    Web,
    /// A long-lived WebSocket connection.
    WebSocket,
    /// A transient connection constructed to dispatch a background job.
    Job,
    /// A command-line invocation (out of scope for dispatch, retained for
    /// the type enumeration's completeness).
    Cli,
    /// A connection created on behalf of an MCP bridge request.
    Mcp,
}

/// Per-client state carried alongside every dispatch.
///
/// `session` is a value, not a pointer back into a shared table: loading a
/// session copies its current record onto the connection, and persisting a
/// change writes it back out through the session store. This avoids a
/// reference cycle between `Connection` and `Session` (Design Notes §9).
#[derive(Debug, Clone)]
pub struct Connection {
    /// Transport this connection arrived over.
    pub transport: ConnectionType,
    /// Peer identifier, e.g. the remote IP.
    pub peer_identifier: String,
    /// Stable id: derived from the session cookie, or a fresh UUID.
    pub id: Uuid,
    /// Channel names this connection is currently subscribed to.
    pub subscriptions: HashSet<String>,
    /// The loaded session, if any.
    pub session: Option<Session>,
}

impl Connection {
    /// Construct a new connection with no session and no subscriptions.
    #[must_use]
    pub fn new(transport: ConnectionType, peer_identifier: impl Into<String>, id: Uuid) -> Self {
        Self {
            transport,
            peer_identifier: peer_identifier.into(),
            id,
            subscriptions: HashSet::new(),
            session: None,
        }
    }

    /// `true` iff this connection is already subscribed to `channel`.
    #[must_use]
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.contains(channel)
    }
}

/// Lookup key for the registry: (transport type, peer identifier, id).
type RegistryKey = (ConnectionType, String, Uuid);

/// Process-wide collection of live connections, keyed by
/// (type, identifier, id) per spec §4.2.
///
/// Every `Connection` appears exactly once until explicitly removed; nothing
/// ever iterates stale entries because removal is part of the destruction
/// path, not a background sweep.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<RegistryKey, Connection>>>,
}

impl ConnectionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(conn: &Connection) -> RegistryKey {
        (conn.transport, conn.peer_identifier.clone(), conn.id)
    }

    /// Register `connection`, replacing any prior entry with the same key.
    pub fn insert(&self, connection: Connection) {
        let key = Self::key(&connection);
        self.inner.write().insert(key, connection);
    }

    /// Fetch a clone of the connection at `key`.
    #[must_use]
    pub fn get(&self, transport: ConnectionType, peer_identifier: &str, id: Uuid) -> Option<Connection> {
        self.inner
            .read()
            .get(&(transport, peer_identifier.to_string(), id))
            .cloned()
    }

    /// Apply `mutate` to the connection at `key`, if present.
    pub fn update(
        &self,
        transport: ConnectionType,
        peer_identifier: &str,
        id: Uuid,
        mutate: impl FnOnce(&mut Connection),
    ) {
        if let Some(conn) = self
            .inner
            .write()
            .get_mut(&(transport, peer_identifier.to_string(), id))
        {
            mutate(conn);
        }
    }

    /// Remove the connection at `key`. Returns the removed connection, if
    /// any, so callers can clean up presence entries and subscriptions.
    pub fn remove(
        &self,
        transport: ConnectionType,
        peer_identifier: &str,
        id: Uuid,
    ) -> Option<Connection> {
        self.inner
            .write()
            .remove(&(transport, peer_identifier.to_string(), id))
    }

    /// Every connection currently subscribed to `channel`.
    #[must_use]
    pub fn subscribers_of(&self, channel: &str) -> Vec<Connection> {
        self.inner
            .read()
            .values()
            .filter(|conn| conn.is_subscribed(channel))
            .cloned()
            .collect()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// `true` iff the registry holds no connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: Uuid) -> Connection {
        Connection::new(ConnectionType::WebSocket, "127.0.0.1", id)
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let registry = ConnectionRegistry::new();
        let id = Uuid::new_v4();
        registry.insert(conn(id));
        let found = registry
            .get(ConnectionType::WebSocket, "127.0.0.1", id)
            .expect("present");
        assert_eq!(found.id, id);
    }

    #[test]
    fn remove_drops_entry() {
        let registry = ConnectionRegistry::new();
        let id = Uuid::new_v4();
        registry.insert(conn(id));
        assert!(registry.remove(ConnectionType::WebSocket, "127.0.0.1", id).is_some());
        assert!(registry.get(ConnectionType::WebSocket, "127.0.0.1", id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn subscribers_of_filters_by_channel() {
        let registry = ConnectionRegistry::new();
        let mut a = conn(Uuid::new_v4());
        a.subscriptions.insert("messages".to_string());
        let b = conn(Uuid::new_v4());
        registry.insert(a);
        registry.insert(b);
        assert_eq!(registry.subscribers_of("messages").len(), 1);
    }
}
