//! Local-segment discovery.
//!
//! A node with no connections at all asks its link for nearby nodes of the
//! same realm. The query/answer pair is plain JSON; the transport behind it
//! is a `DiscoveryChannel`, with IPv6 link-local multicast in `multicast`.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use ringmesh_core::message::{DiscoveryQuery, DiscoveryReply};
use ringmesh_services::{RpcCaller, RpcError, RpcHandler};

use crate::context::NodeContext;

pub mod multicast;

pub use multicast::MulticastDiscovery;

/// Sends one query to the local segment. The receiver yields every answer
/// that arrives within the channel's reply window, then closes.
pub trait DiscoveryChannel: Send + Sync {
    fn query(&self, query: DiscoveryQuery) -> mpsc::Receiver<DiscoveryReply>;
}

/// Answers `LocalCO.GetInformation` with this node's address, realm and
/// local endpoints.
pub struct LocalInfoHandler {
    ctx: Arc<NodeContext>,
}

impl LocalInfoHandler {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    pub fn describe(&self) -> DiscoveryReply {
        DiscoveryReply {
            address: self.ctx.address,
            namespace: self.ctx.realm.clone(),
            tas: self.ctx.local_tas(),
        }
    }
}

impl RpcHandler for LocalInfoHandler {
    fn handle(&self, _caller: &RpcCaller, _args: Value) -> Result<Value, RpcError> {
        serde_json::to_value(self.describe()).map_err(|e| RpcError::Rejected(e.to_string()))
    }
}
