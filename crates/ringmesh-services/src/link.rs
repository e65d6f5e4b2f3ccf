//! Link layer contracts.
//!
//! A `Linker` turns a peer description into an edge plus a connection-table
//! entry. It runs asynchronously and reports once. Closing goes through a
//! `GracefulCloser` so the peer hears about it before the edge drops.

use futures::future::BoxFuture;

use ringmesh_core::{ConnectRequest, RingAddress, TransportAddress};

use crate::connection::{ConnectionType, EdgeRef};

/// One link attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRequest {
    /// Expected peer address. `None` accepts whoever answers (leaf bootstrap).
    pub target: Option<RingAddress>,
    pub transports: Vec<TransportAddress>,
    pub connection_type: String,
    pub token: String,
}

impl LinkRequest {
    /// Link towards the node described in a handshake message.
    pub fn from_message(msg: &ConnectRequest) -> Self {
        Self {
            target: Some(msg.target.address),
            transports: msg.target.transports.clone(),
            connection_type: msg.connection_type.clone(),
            token: msg.token.clone(),
        }
    }

    pub fn main_type(&self) -> ConnectionType {
        ConnectionType::from_type_str(&self.connection_type)
    }
}

/// Protocol-level reasons a link attempt ends without a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("peer address does not match the expected target")]
    TargetMismatch,
    #[error("peer is disconnecting")]
    Disconnecting,
    #[error("another link attempt is in progress")]
    InProgress,
    #[error("refusing to connect to self")]
    ConnectToSelf,
    #[error("edge closed during link")]
    EdgeClosed,
    #[error("no transport address to try")]
    NoTransports,
    #[error("link timed out")]
    Timeout,
}

pub trait Linker: Send + Sync {
    /// Establish the link and insert the connection into the table.
    fn link(&self, request: LinkRequest) -> BoxFuture<'static, Result<(), LinkError>>;
}

pub trait GracefulCloser: Send + Sync {
    /// Tell the peer, then tear down the edge.
    fn close(&self, edge: &EdgeRef, reason: &str);
}
