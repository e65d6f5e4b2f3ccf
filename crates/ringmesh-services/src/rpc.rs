//! Request/reply contracts.
//!
//! The overlay never waits on a reply. `RpcTransport::invoke` returns at
//! once with a channel that yields zero or more results followed by exactly
//! one `Closed` event. Retries and timeouts belong to the transport.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

use ringmesh_core::{Address, RingAddress};

use crate::connection::EdgeRef;

/// Where a request is sent.
#[derive(Debug, Clone)]
pub enum RpcTarget {
    /// Straight over one edge.
    Edge(EdgeRef),
    /// Greedily routed to an exact ring address.
    Exact(RingAddress),
    /// Routed towards any address class with a hop budget.
    Routed { destination: Address, ttl: u16 },
    /// Sent over `forwarder`, which routes it on to `destination`.
    Forwarded {
        forwarder: EdgeRef,
        destination: Address,
        ttl: u16,
    },
}

impl RpcTarget {
    /// Ring address this target names exactly, if any.
    pub fn exact_address(&self) -> Option<RingAddress> {
        match self {
            RpcTarget::Exact(a) => Some(*a),
            RpcTarget::Routed {
                destination: Address::Ring(a),
                ..
            } => Some(*a),
            _ => None,
        }
    }
}

/// Why a reply stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Every expected reply arrived, or the caller closed the stream.
    Complete,
    NoHandler,
    HandlerFailure(String),
    Timeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Complete => f.write_str("complete"),
            CloseReason::NoHandler => f.write_str("no handler"),
            CloseReason::HandlerFailure(msg) => write!(f, "handler failure: {msg}"),
            CloseReason::Timeout => f.write_str("timeout"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RpcEvent {
    Result(Value),
    Closed(CloseReason),
}

pub trait RpcTransport: Send + Sync {
    /// Fire a request. Never blocks.
    fn invoke(&self, target: RpcTarget, method: &str, args: Value) -> mpsc::UnboundedReceiver<RpcEvent>;
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// Who sent an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RpcCaller {
    pub source: Option<RingAddress>,
    pub edge: Option<EdgeRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("no handler for {0}")]
    NoHandler(String),
    #[error("bad arguments: {0}")]
    BadArguments(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<RpcError> for CloseReason {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::NoHandler(_) => CloseReason::NoHandler,
            other => CloseReason::HandlerFailure(other.to_string()),
        }
    }
}

pub trait RpcHandler: Send + Sync {
    fn handle(&self, caller: &RpcCaller, args: Value) -> Result<Value, RpcError>;
}

/// Method name → handler. Owned by a node and handed to whatever delivers
/// inbound requests to it.
#[derive(Default)]
pub struct RpcRegistry {
    handlers: DashMap<String, Arc<dyn RpcHandler>>,
}

impl RpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method`, replacing any previous one.
    pub fn register(&self, method: impl Into<String>, handler: Arc<dyn RpcHandler>) {
        let method = method.into();
        if self.handlers.insert(method.clone(), handler).is_some() {
            tracing::warn!(method = %method, "rpc handler replaced");
        }
    }

    pub fn unregister(&self, method: &str) -> bool {
        self.handlers.remove(method).is_some()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn dispatch(&self, caller: &RpcCaller, method: &str, args: Value) -> Result<Value, RpcError> {
        // clone out so the map shard is not held while the handler runs
        let handler = self
            .handlers
            .get(method)
            .map(|h| h.value().clone())
            .ok_or_else(|| RpcError::NoHandler(method.to_string()))?;
        handler.handle(caller, args)
    }
}
