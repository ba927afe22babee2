//! Registry of every connection currently open on this process.

use std::sync::Arc;

use dashmap::DashMap;

use super::connection::{Connection, ConnectionId};

/// Shared registry of open connections.
///
/// Source of truth for "is this target still alive": a connection missing
/// from the registry is treated as dead even if its handle still reports open.
/// Uses `DashMap` for shard-level concurrency.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<dyn Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection after the transport accepted it.
    pub fn register(&self, conn: Arc<dyn Connection>) {
        self.connections.insert(conn.id().clone(), conn);
    }

    /// Drop a connection when its transport closes. Returns the handle if it
    /// was registered.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<dyn Connection>> {
        self.connections.remove(id).map(|(_, conn)| conn)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<dyn Connection>> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Look up a connection that is both registered and still open.
    pub fn live(&self, id: &ConnectionId) -> Option<Arc<dyn Connection>> {
        self.get(id).filter(|conn| conn.is_open())
    }

    /// Snapshot of every registered connection that still reports open.
    pub fn open_connections(&self) -> Vec<Arc<dyn Connection>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
