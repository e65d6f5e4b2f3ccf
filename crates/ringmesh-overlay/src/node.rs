//! One overlay node: routers, handshake handlers and overlords wired to a
//! shared context, driven by a heartbeat and connection-table events.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use ringmesh_core::message::{CONNECT_METHOD, DISCOVERY_METHOD};
use ringmesh_core::wire::Packet;
use ringmesh_core::RingAddress;
use ringmesh_services::{EdgeRef, RpcRegistry, TableEvent};

use crate::context::NodeContext;
use crate::discovery::{DiscoveryChannel, LocalInfoHandler, MulticastDiscovery};
use crate::handshake::CtmRequestHandler;
use crate::overlord::{
    ConnectionOverlord, LeafOverlord, LocalDiscoveryOverlord, ManagedOverlord, UnstructuredOverlord,
};
use crate::routing::{RouteOutcome, Router};

pub struct Node {
    ctx: Arc<NodeContext>,
    registry: Arc<RpcRegistry>,
    router: Router,
    leaf: Arc<LeafOverlord>,
    unstructured: Arc<UnstructuredOverlord>,
    managed: Arc<ManagedOverlord>,
    local: Option<Arc<LocalDiscoveryOverlord>>,
}

impl Node {
    /// Build a node and register its handlers in `registry`.
    ///
    /// Without a discovery channel the node relies on configured remote
    /// endpoints alone.
    pub fn new(
        ctx: Arc<NodeContext>,
        registry: Arc<RpcRegistry>,
        discovery: Option<Arc<dyn DiscoveryChannel>>,
    ) -> Arc<Self> {
        registry.register(CONNECT_METHOD, Arc::new(CtmRequestHandler::new(ctx.clone())));
        registry.register(DISCOVERY_METHOD, Arc::new(LocalInfoHandler::new(ctx.clone())));

        let managed = ManagedOverlord::new(ctx.clone());
        for pinned in &ctx.config.managed.pinned {
            match pinned.parse::<RingAddress>() {
                Ok(addr) => managed.set(addr),
                Err(e) => tracing::warn!(address = %pinned, error = %e, "ignoring bad pinned address"),
            }
        }

        let local = discovery
            .filter(|_| ctx.config.discovery.enabled)
            .map(|channel| LocalDiscoveryOverlord::new(ctx.clone(), channel));

        Arc::new(Self {
            router: Router::new(ctx.address, ctx.table.clone()),
            leaf: LeafOverlord::new(ctx.clone()),
            unstructured: UnstructuredOverlord::new(ctx.clone()),
            managed,
            local,
            registry,
            ctx,
        })
    }

    /// Build a node that discovers its link over multicast, and spawn the
    /// responder that answers other nodes' queries until shutdown.
    pub fn with_multicast(
        ctx: Arc<NodeContext>,
        registry: Arc<RpcRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Arc<Self>> {
        let multicast = Arc::new(MulticastDiscovery::from_config(&ctx.config.discovery)?);
        let node = Self::new(ctx, registry.clone(), Some(multicast.clone()));

        if node.ctx.config.discovery.enabled {
            tokio::spawn(async move {
                if let Err(e) = multicast.respond_loop(registry, shutdown).await {
                    tracing::error!(error = %e, "discovery responder failed");
                }
            });
        }
        Ok(node)
    }

    pub fn address(&self) -> RingAddress {
        self.ctx.address
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<RpcRegistry> {
        &self.registry
    }

    pub fn leaf(&self) -> &Arc<LeafOverlord> {
        &self.leaf
    }

    pub fn unstructured(&self) -> &Arc<UnstructuredOverlord> {
        &self.unstructured
    }

    pub fn managed(&self) -> &Arc<ManagedOverlord> {
        &self.managed
    }

    pub fn overlords(&self) -> Vec<Arc<dyn ConnectionOverlord>> {
        let mut all: Vec<Arc<dyn ConnectionOverlord>> = vec![
            self.leaf.clone(),
            self.unstructured.clone(),
            self.managed.clone(),
        ];
        if let Some(local) = &self.local {
            all.push(local.clone());
        }
        all
    }

    pub fn start(&self) {
        tracing::info!(address = %self.ctx.address, realm = %self.ctx.realm, "node starting");
        for o in self.overlords() {
            o.set_active(true);
        }
        for o in self.overlords() {
            o.activate();
        }
    }

    /// Stop replacing lost links. Existing links stay up.
    pub fn stop(&self) {
        tracing::info!(address = %self.ctx.address, "node stopping");
        for o in self.overlords() {
            o.set_active(false);
        }
    }

    pub fn route(&self, from: Option<&EdgeRef>, packet: &Packet) -> RouteOutcome {
        self.router.route(from, packet)
    }

    pub fn heartbeat(&self) {
        for o in self.overlords() {
            o.on_heartbeat();
        }
    }

    pub fn handle_event(&self, event: &TableEvent) {
        match event {
            TableEvent::Connected(c) => {
                for o in self.overlords() {
                    o.on_connection(c);
                }
            }
            TableEvent::Disconnected(c) => {
                for o in self.overlords() {
                    o.on_disconnection(c);
                }
            }
        }
    }

    /// Rebuild every overlord's bookkeeping from the connection table.
    pub fn resync(&self) {
        for o in self.overlords() {
            o.resync();
        }
    }

    /// Start the overlords and drive them until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut events = self.ctx.table.subscribe();
        let mut heartbeat = tokio::time::interval(self.ctx.config.timing.heartbeat());
        self.start();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    self.stop();
                    return Ok(());
                }
                _ = heartbeat.tick() => self.heartbeat(),
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(&event),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "connection events lagged, resyncing from table");
                        events = events.resubscribe();
                        self.resync();
                    }
                    Err(RecvError::Closed) => {
                        self.stop();
                        return Ok(());
                    }
                },
            }
        }
    }
}
