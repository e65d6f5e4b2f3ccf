//! Handshake and discovery messages.
//!
//! These travel as RPC arguments and results, so they are encoded as JSON
//! values rather than fixed wire structs.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::RingAddress;

/// Most transport addresses a node advertises about itself.
pub const MAX_ADVERTISED_TRANSPORTS: usize = 12;

/// RPC method that carries a `ConnectRequest`.
pub const CONNECT_METHOD: &str = "sys:ctm.ConnectTo";

/// RPC method answered by local discovery.
pub const DISCOVERY_METHOD: &str = "LocalCO.GetInformation";

/// A physical endpoint, e.g. `udp://[fe80::1]:7400`. Opaque to the overlay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportAddress(String);

impl TransportAddress {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peer's ring address plus where it can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub address: RingAddress,
    #[serde(default)]
    pub transports: Vec<TransportAddress>,
}

impl NodeInfo {
    pub fn new(address: RingAddress, transports: Vec<TransportAddress>) -> Self {
        Self { address, transports }
    }

    /// Address only, no transports.
    pub fn bare(address: RingAddress) -> Self {
        Self {
            address,
            transports: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ── ConnectRequest ────────────────────────────────────────────────────────────

/// Request and response body of the connect handshake.
///
/// In a request, `target` describes the requester. In a response it
/// describes the responder, and `neighbors` lists the responder's structured
/// peers nearest to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub connection_type: String,
    pub target: NodeInfo,
    #[serde(default)]
    pub neighbors: Vec<NodeInfo>,
    /// Opaque value echoed into the resulting link attempt.
    #[serde(default)]
    pub token: String,
}

impl ConnectRequest {
    pub fn new(connection_type: impl Into<String>, target: NodeInfo) -> Self {
        let token = target.address.to_string();
        Self {
            connection_type: connection_type.into(),
            target,
            neighbors: Vec::new(),
            token,
        }
    }

    pub fn with_neighbors(mut self, neighbors: Vec<NodeInfo>) -> Self {
        self.neighbors = neighbors;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn to_value(&self) -> Value {
        // every field is a plain string or list, serialization cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        Ok(serde_json::from_value(value)?)
    }
}

// ── Discovery ─────────────────────────────────────────────────────────────────

/// Multicast query asking nearby nodes to describe themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryQuery {
    pub method: String,
}

impl Default for DiscoveryQuery {
    fn default() -> Self {
        Self {
            method: DISCOVERY_METHOD.to_string(),
        }
    }
}

/// A nearby node's self-description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReply {
    pub address: RingAddress,
    pub namespace: String,
    #[serde(default)]
    pub tas: Vec<TransportAddress>,
}
