//! Connection pool keyed by connection handle.
//!
//! Every connection registered with the reactor lives here; the reactor
//! removes the entry in the same step it unregisters the reader.

use std::collections::HashMap;
use std::fmt;

use crate::connection::Connection;
use crate::error::{NsqError, Result};

/// Handle identifying one open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Open connections by handle. Iteration follows insertion order.
#[derive(Default)]
pub struct ConnectionPool {
    connections: HashMap<ConnectionId, Connection>,
    order: Vec<ConnectionId>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Fails if its handle is already pooled.
    pub fn add(&mut self, connection: Connection) -> Result<()> {
        let id = connection.id();
        if self.connections.contains_key(&id) {
            return Err(NsqError::DuplicateConnection(id));
        }
        self.connections.insert(id, connection);
        self.order.push(id);
        Ok(())
    }

    /// Look up a connection mutably by handle.
    pub fn find_mut(&mut self, id: ConnectionId) -> Result<&mut Connection> {
        self.connections.get_mut(&id).ok_or(NsqError::NotFound(id))
    }

    /// Remove and return a connection, if present.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        self.order.retain(|existing| *existing != id);
        Some(connection)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Iterate connections in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.order.iter().filter_map(|id| self.connections.get(id))
    }

    /// Remove every connection, in insertion order.
    pub fn drain(&mut self) -> Vec<Connection> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|id| self.connections.remove(&id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
