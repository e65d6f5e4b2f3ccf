//! State shared by every overlay component of one node.

use std::sync::Arc;

use parking_lot::RwLock;

use ringmesh_core::config::OverlayConfig;
use ringmesh_core::{ConnectRequest, NodeInfo, RingAddress, TransportAddress};
use ringmesh_services::{ConnectionTable, GracefulCloser, LinkRequest, Linker, RpcTransport};

use crate::handshake::setup::{ConnectionSetupManager, SetupOutcome};

pub struct NodeContext {
    pub address: RingAddress,
    pub realm: String,
    pub config: OverlayConfig,
    pub table: Arc<ConnectionTable>,
    pub rpc: Arc<dyn RpcTransport>,
    pub linker: Arc<dyn Linker>,
    pub closer: Arc<dyn GracefulCloser>,
    pub setup: Arc<ConnectionSetupManager>,
    local_tas: RwLock<Vec<TransportAddress>>,
    /// Bootstrap endpoints: configured, learned from discovery.
    remote_tas: RwLock<Vec<TransportAddress>>,
}

impl NodeContext {
    pub fn new(
        address: RingAddress,
        config: OverlayConfig,
        table: Arc<ConnectionTable>,
        rpc: Arc<dyn RpcTransport>,
        linker: Arc<dyn Linker>,
        closer: Arc<dyn GracefulCloser>,
    ) -> Arc<Self> {
        let local_tas = config
            .network
            .local_tas
            .iter()
            .map(TransportAddress::new)
            .collect();
        let ctx = Self {
            address,
            realm: config.node.realm.clone(),
            setup: ConnectionSetupManager::new(address, table.clone(), linker.clone()),
            local_tas: RwLock::new(local_tas),
            remote_tas: RwLock::new(Vec::new()),
            config,
            table,
            rpc,
            linker,
            closer,
        };
        let configured: Vec<_> = ctx
            .config
            .network
            .remote_tas
            .iter()
            .map(TransportAddress::new)
            .collect();
        ctx.add_remote_tas(configured);
        Arc::new(ctx)
    }

    /// Own address plus advertised transports, capped.
    pub fn node_info(&self) -> NodeInfo {
        let cap = self.config.handshake.max_transports;
        let tas = self.local_tas.read().iter().take(cap).cloned().collect();
        NodeInfo::new(self.address, tas)
    }

    pub fn local_tas(&self) -> Vec<TransportAddress> {
        self.local_tas.read().clone()
    }

    pub fn set_local_tas(&self, tas: Vec<TransportAddress>) {
        *self.local_tas.write() = tas;
    }

    pub fn remote_tas(&self) -> Vec<TransportAddress> {
        self.remote_tas.read().clone()
    }

    /// Merge endpoints into the bootstrap set. Returns how many were new.
    pub fn add_remote_tas(&self, tas: impl IntoIterator<Item = TransportAddress>) -> usize {
        let mut remote = self.remote_tas.write();
        let before = remote.len();
        for ta in tas {
            if !remote.contains(&ta) {
                remote.push(ta);
            }
        }
        remote.len() - before
    }

    /// Connect request describing this node.
    pub fn connect_request(&self, connection_type: &str) -> ConnectRequest {
        ConnectRequest::new(connection_type, self.node_info())
    }

    /// Link towards the node a handshake message describes, unless already
    /// connected with that type.
    pub fn link_to(&self, msg: &ConnectRequest) -> SetupOutcome {
        self.setup.start_linking(LinkRequest::from_message(msg))
    }
}
