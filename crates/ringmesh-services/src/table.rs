//! Connection table: every established link, grouped by main type and
//! kept sorted by ring address.
//!
//! Readers take cheap snapshots (`RingView`) and never hold the lock while
//! routing or deciding. Change notifications go out on a broadcast channel
//! after the write lock has been released, so subscribers may call back
//! into the table.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::broadcast;

use ringmesh_core::RingAddress;

use crate::connection::{Connection, ConnectionType, EdgeId};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum TableEvent {
    Connected(Arc<Connection>),
    Disconnected(Arc<Connection>),
}

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("already connected to {address} as {connection_type}")]
    AlreadyConnected {
        address: RingAddress,
        connection_type: ConnectionType,
    },
    #[error("{edge} already carries a {connection_type} connection")]
    EdgeInUse {
        edge: EdgeId,
        connection_type: ConnectionType,
    },
}

pub struct ConnectionTable {
    by_type: RwLock<HashMap<ConnectionType, Vec<Arc<Connection>>>>,
    events: broadcast::Sender<TableEvent>,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTable {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            by_type: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TableEvent> {
        self.events.subscribe()
    }

    // ── Mutation ─────────────────────────────────────────────────────────────

    /// Insert a connection. One connection per (address, main type), and one
    /// per (edge, main type).
    pub fn add(&self, connection: Connection) -> Result<Arc<Connection>, TableError> {
        let connection = Arc::new(connection);
        {
            let mut by_type = self.by_type.write();
            let list = by_type.entry(connection.main_type).or_default();
            if list.iter().any(|c| c.edge_id() == connection.edge_id()) {
                return Err(TableError::EdgeInUse {
                    edge: connection.edge_id(),
                    connection_type: connection.main_type,
                });
            }
            match list.binary_search_by(|c| c.address.cmp(&connection.address)) {
                Ok(_) => {
                    return Err(TableError::AlreadyConnected {
                        address: connection.address,
                        connection_type: connection.main_type,
                    })
                }
                Err(pos) => list.insert(pos, connection.clone()),
            }
        }

        tracing::debug!(
            peer = %connection.address.short(),
            connection_type = %connection.connection_type,
            edge = %connection.edge_id(),
            "connection added"
        );
        let _ = self.events.send(TableEvent::Connected(connection.clone()));
        Ok(connection)
    }

    /// Remove every connection carried by `edge`.
    pub fn remove_edge(&self, edge: EdgeId) -> Vec<Arc<Connection>> {
        let mut removed = Vec::new();
        {
            let mut by_type = self.by_type.write();
            for list in by_type.values_mut() {
                list.retain(|c| {
                    if c.edge_id() == edge {
                        removed.push(c.clone());
                        false
                    } else {
                        true
                    }
                });
            }
        }

        for c in &removed {
            tracing::debug!(
                peer = %c.address.short(),
                connection_type = %c.connection_type,
                edge = %edge,
                "connection removed"
            );
            let _ = self.events.send(TableEvent::Disconnected(c.clone()));
        }
        removed
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Snapshot of one main type, sorted by address.
    pub fn view(&self, connection_type: ConnectionType) -> RingView {
        let by_type = self.by_type.read();
        RingView {
            connections: by_type.get(&connection_type).cloned().unwrap_or_default(),
        }
    }

    pub fn connections(&self, connection_type: ConnectionType) -> Vec<Arc<Connection>> {
        self.view(connection_type).connections
    }

    pub fn count(&self, connection_type: ConnectionType) -> usize {
        self.by_type
            .read()
            .get(&connection_type)
            .map_or(0, Vec::len)
    }

    pub fn total_count(&self) -> usize {
        self.by_type.read().values().map(Vec::len).sum()
    }

    pub fn contains(&self, connection_type: ConnectionType, address: &RingAddress) -> bool {
        self.get(connection_type, address).is_some()
    }

    pub fn get(&self, connection_type: ConnectionType, address: &RingAddress) -> Option<Arc<Connection>> {
        let by_type = self.by_type.read();
        let list = by_type.get(&connection_type)?;
        list.binary_search_by(|c| c.address.cmp(address))
            .ok()
            .map(|i| list[i].clone())
    }

    /// Every connection carried by `edge`, across types.
    pub fn get_by_edge(&self, edge: EdgeId) -> Vec<Arc<Connection>> {
        self.by_type
            .read()
            .values()
            .flatten()
            .filter(|c| c.edge_id() == edge)
            .cloned()
            .collect()
    }

    /// Up to `n` structured connections nearest to `address`.
    pub fn nearest_to(&self, address: &RingAddress, n: usize) -> Vec<Arc<Connection>> {
        self.view(ConnectionType::Structured).nearest_to(address, n)
    }

    /// Structured neighbor immediately left (larger side) of `address`.
    pub fn left_neighbor_of(&self, address: &RingAddress) -> Option<Arc<Connection>> {
        self.view(ConnectionType::Structured).left_of(address).cloned()
    }

    /// Structured neighbor immediately right (smaller side) of `address`.
    pub fn right_neighbor_of(&self, address: &RingAddress) -> Option<Arc<Connection>> {
        self.view(ConnectionType::Structured).right_of(address).cloned()
    }

    pub fn random(&self, connection_type: ConnectionType) -> Option<Arc<Connection>> {
        self.view(connection_type)
            .random(&mut rand::thread_rng(), None)
            .cloned()
    }
}

// ── RingView ──────────────────────────────────────────────────────────────────

/// Immutable, address-sorted snapshot of one connection type.
#[derive(Debug, Clone, Default)]
pub struct RingView {
    connections: Vec<Arc<Connection>>,
}

impl RingView {
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Connection>> {
        self.connections.iter()
    }

    /// `Ok(i)` if present, else `Err(insertion point)`.
    pub fn index_of(&self, address: &RingAddress) -> Result<usize, usize> {
        self.connections
            .binary_search_by(|c| c.address.cmp(address))
    }

    /// Wraparound indexing; `-1` is the last entry.
    pub fn get(&self, index: isize) -> Option<&Arc<Connection>> {
        if self.connections.is_empty() {
            return None;
        }
        let len = self.connections.len() as isize;
        self.connections.get(index.rem_euclid(len) as usize)
    }

    /// First entry strictly larger than `address`, wrapping around.
    pub fn left_of(&self, address: &RingAddress) -> Option<&Arc<Connection>> {
        let index = match self.index_of(address) {
            Ok(i) => i as isize + 1,
            Err(i) => i as isize,
        };
        self.get(index)
    }

    /// First entry strictly smaller than `address`, wrapping around.
    pub fn right_of(&self, address: &RingAddress) -> Option<&Arc<Connection>> {
        let index = match self.index_of(address) {
            Ok(i) | Err(i) => i as isize - 1,
        };
        self.get(index)
    }

    pub fn nearest_to(&self, address: &RingAddress, n: usize) -> Vec<Arc<Connection>> {
        let mut sorted = self.connections.clone();
        sorted.sort_by_key(|c| address.distance_to(&c.address).unsigned_abs());
        sorted.truncate(n);
        sorted
    }

    pub fn random<R: Rng>(&self, rng: &mut R, exclude: Option<EdgeId>) -> Option<&Arc<Connection>> {
        let candidates: Vec<&Arc<Connection>> = self
            .connections
            .iter()
            .filter(|c| Some(c.edge_id()) != exclude)
            .collect();
        candidates.choose(rng).copied()
    }
}
