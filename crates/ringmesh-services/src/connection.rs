//! Connections and the edges that carry them.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use ringmesh_core::wire::Packet;
use ringmesh_core::{NodeInfo, RingAddress, TransportAddress};

/// Priority order of the policies that own a link. Lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectionType {
    Leaf,
    Structured,
    Unstructured,
    Unknown,
}

impl ConnectionType {
    pub const ALL: [ConnectionType; 4] = [
        ConnectionType::Leaf,
        ConnectionType::Structured,
        ConnectionType::Unstructured,
        ConnectionType::Unknown,
    ];

    /// Main type of a full type string: `structured.near` → `Structured`.
    pub fn from_type_str(s: &str) -> Self {
        let main = s.split('.').next().unwrap_or_default();
        match main {
            "leaf" => ConnectionType::Leaf,
            "structured" => ConnectionType::Structured,
            "unstructured" => ConnectionType::Unstructured,
            _ => ConnectionType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Leaf => "leaf",
            ConnectionType::Structured => "structured",
            ConnectionType::Unstructured => "unstructured",
            ConnectionType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Edges ─────────────────────────────────────────────────────────────────────

/// Identity of a transport link, unique within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u64);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edge#{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    #[error("edge is closed")]
    Closed,
    #[error("transport failure: {0}")]
    Transport(String),
}

/// A physical link to one peer. Implemented by the transport layer.
pub trait Edge: Send + Sync + fmt::Debug {
    fn id(&self) -> EdgeId;

    fn remote_transport(&self) -> TransportAddress;

    /// Queue a packet. Never blocks.
    fn send(&self, packet: &Packet) -> Result<(), EdgeError>;

    fn is_closed(&self) -> bool;
}

pub type EdgeRef = Arc<dyn Edge>;

/// True if both handles refer to the same edge.
pub fn same_edge(a: &EdgeRef, b: &EdgeRef) -> bool {
    a.id() == b.id()
}

// ── Connection ────────────────────────────────────────────────────────────────

/// What the peer told us about itself when the link came up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub neighbors: Vec<NodeInfo>,
}

/// An established link: edge, peer address, type, and status snapshot.
#[derive(Debug, Clone)]
pub struct Connection {
    pub edge: EdgeRef,
    pub address: RingAddress,
    /// Full type string, e.g. `structured.managed`.
    pub connection_type: String,
    pub main_type: ConnectionType,
    pub status: ConnectionStatus,
    pub created_at: Instant,
}

impl Connection {
    pub fn new(edge: EdgeRef, address: RingAddress, connection_type: impl Into<String>) -> Self {
        let connection_type = connection_type.into();
        Self {
            main_type: ConnectionType::from_type_str(&connection_type),
            edge,
            address,
            connection_type,
            status: ConnectionStatus::default(),
            created_at: Instant::now(),
        }
    }

    pub fn with_status(mut self, status: ConnectionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn edge_id(&self) -> EdgeId {
        self.edge.id()
    }
}
