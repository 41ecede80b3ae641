//! Connection Registry
//!
//! Process-wide bidirectional index between users and their live
//! connections. A forward map (user → connections) and a reverse map
//! (connection → user) are kept together under one lock so that bind and
//! unbind of a connection are atomic with respect to concurrent lookups.
//!
//! Every operation is synchronous. The lock is never held across an await.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::gateway::ServerEvent;

/// Identity of one physical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sending half of one live connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver the transport drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event for this connection.
    ///
    /// Returns `false` when the connection is already gone. That is a benign
    /// outcome for fan-out and is never retried.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Result of [`ConnectionRegistry::bind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// First binding of this connection
    Bound,
    /// Connection was already bound to the same user
    AlreadyBound,
    /// Connection moved from another user
    Rebound { previous: Uuid },
}

#[derive(Default)]
struct Index {
    by_user: HashMap<Uuid, HashMap<ConnectionId, ConnectionHandle>>,
    by_connection: HashMap<ConnectionId, Uuid>,
}

impl Index {
    fn detach(&mut self, connection_id: ConnectionId) -> Option<Uuid> {
        let user_id = self.by_connection.remove(&connection_id)?;
        if let Some(connections) = self.by_user.get_mut(&user_id) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                self.by_user.remove(&user_id);
            }
        }
        Some(user_id)
    }
}

/// Thread-safe, multi-valued user → connection index
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    index: Arc<RwLock<Index>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` as reachable for `user_id`.
    ///
    /// Binding the same connection to the same user again is a no-op. A
    /// connection bound to another user is moved, so one connection never
    /// maps to more than one user.
    pub fn bind(&self, user_id: Uuid, handle: &ConnectionHandle) -> BindOutcome {
        let mut index = self.index.write();

        let outcome = match index.by_connection.get(&handle.id).copied() {
            Some(current) if current == user_id => return BindOutcome::AlreadyBound,
            Some(previous) => {
                index.detach(handle.id);
                BindOutcome::Rebound { previous }
            }
            None => BindOutcome::Bound,
        };

        index.by_connection.insert(handle.id, user_id);
        index
            .by_user
            .entry(user_id)
            .or_default()
            .insert(handle.id, handle.clone());

        debug!(user_id = %user_id, connection_id = %handle.id, "Bound connection");
        outcome
    }

    /// Remove every association of `connection_id`.
    ///
    /// Returns the user it was bound to. Unknown connections are ignored.
    pub fn unbind(&self, connection_id: ConnectionId) -> Option<Uuid> {
        let user_id = self.index.write().detach(connection_id)?;
        debug!(user_id = %user_id, connection_id = %connection_id, "Unbound connection");
        Some(user_id)
    }

    /// Snapshot of the live connections of `user_id`
    pub fn connections_for(&self, user_id: Uuid) -> Vec<ConnectionHandle> {
        self.index
            .read()
            .by_user
            .get(&user_id)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every bound connection
    pub fn all_connections(&self) -> Vec<ConnectionHandle> {
        self.index
            .read()
            .by_user
            .values()
            .flat_map(|connections| connections.values().cloned())
            .collect()
    }

    /// Reverse lookup of the user bound to a connection
    pub fn resolve(&self, connection_id: ConnectionId) -> Option<Uuid> {
        self.index.read().by_connection.get(&connection_id).copied()
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.index.read().by_user.contains_key(&user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.index.read().by_connection.len()
    }

    pub fn online_user_count(&self) -> usize {
        self.index.read().by_user.len()
    }
}
