//! Inbound side of the connect handshake.

use std::sync::Arc;

use serde_json::Value;

use ringmesh_core::{ConnectRequest, NodeInfo};
use ringmesh_services::{LinkError, LinkRequest, RpcCaller, RpcError, RpcHandler};

use crate::context::NodeContext;
use crate::handshake::setup::SetupOutcome;

/// Answers `sys:ctm.ConnectTo`: links back to the requester and replies with
/// this node's description plus the structured peers nearest the requester.
pub struct CtmRequestHandler {
    ctx: Arc<NodeContext>,
}

impl CtmRequestHandler {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

impl RpcHandler for CtmRequestHandler {
    fn handle(&self, caller: &RpcCaller, args: Value) -> Result<Value, RpcError> {
        let request =
            ConnectRequest::from_value(args).map_err(|e| RpcError::BadArguments(e.to_string()))?;
        let requester = request.target.address;
        if requester == self.ctx.address {
            return Err(RpcError::Rejected(LinkError::ConnectToSelf.to_string()));
        }

        let outcome = self.ctx.setup.start_linking(LinkRequest::from_message(&request));
        tracing::debug!(
            peer = %requester.short(),
            via = ?caller.edge.as_ref().map(|e| e.id()),
            connection_type = %request.connection_type,
            ?outcome,
            "connect request"
        );
        if let SetupOutcome::Rejected(e) = outcome {
            return Err(RpcError::Rejected(e.to_string()));
        }

        let wanted = self.ctx.config.handshake.nearest_neighbors;
        let neighbors: Vec<NodeInfo> = self
            .ctx
            .table
            .nearest_to(&requester, wanted + 1)
            .iter()
            .filter(|c| c.address != requester)
            .take(wanted)
            .map(|c| NodeInfo::bare(c.address))
            .collect();

        let response = ConnectRequest::new(request.connection_type, self.ctx.node_info())
            .with_neighbors(neighbors)
            .with_token(request.token);
        Ok(response.to_value())
    }
}
