//! ringmesh integration test harness.
//!
//! Every test builds a `SimNet`: several full nodes in one process, joined
//! by simulated edges. Requests sent through a node's `RpcTransport` are
//! handed straight to the destination node's handler registry; random walks
//! hop over the simulated unstructured links. Packets sent on edges queue up
//! on the net and are delivered by `SimNet::pump`.
//!
//!   RUST_LOG=ringmesh_overlay=debug cargo test --test integration

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use ringmesh_core::config::OverlayConfig;
use ringmesh_core::wire::Packet;
use ringmesh_core::{Address, RingAddress, TransportAddress};
use ringmesh_overlay::discovery::DiscoveryChannel;
use ringmesh_overlay::{Node, NodeContext};
use ringmesh_services::{
    CloseReason, Connection, ConnectionTable, ConnectionType, Edge, EdgeError, EdgeId, EdgeRef,
    GracefulCloser, LinkError, LinkRequest, Linker, RpcCaller, RpcEvent, RpcRegistry, RpcTarget,
    RpcTransport,
};

mod discovery;
mod handshake;
mod overlords;
mod routing;

// ── Harness ───────────────────────────────────────────────────────────────────

static NEXT_EDGE: AtomicU64 = AtomicU64::new(1 << 32);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Node config tuned for fast tests.
pub fn test_config(name: &str) -> OverlayConfig {
    let mut config = OverlayConfig::default();
    config.node.address_seed = name.to_string();
    config.network.local_tas = vec![format!("sim://{name}")];
    config.timing.heartbeat_ms = 20;
    config.timing.reply_timeout_ms = 2_000;
    config.leaf.retry_interval_ms = 50;
    config.managed.retry_delay_ms = 20;
    config.discovery.enabled = false;
    config
}

/// One end of a simulated link.
pub struct SimEdge {
    id: EdgeId,
    remote: TransportAddress,
    closed: AtomicBool,
    net: Weak<SimNet>,
}

impl std::fmt::Debug for SimEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEdge")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .finish()
    }
}

impl Edge for SimEdge {
    fn id(&self) -> EdgeId {
        self.id
    }

    fn remote_transport(&self) -> TransportAddress {
        self.remote.clone()
    }

    fn send(&self, packet: &Packet) -> Result<(), EdgeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EdgeError::Closed);
        }
        let net = self.net.upgrade().ok_or(EdgeError::Closed)?;
        net.in_flight.lock().push_back((self.id, packet.clone()));
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Where an edge leads: the receiving node and its edge back.
#[derive(Clone)]
struct EdgeEnd {
    receiver: RingAddress,
    back: EdgeRef,
}

#[derive(Clone)]
pub struct SimPeer {
    pub name: String,
    pub node: Arc<Node>,
    pub ctx: Arc<NodeContext>,
    pub registry: Arc<RpcRegistry>,
}

impl SimPeer {
    pub fn address(&self) -> RingAddress {
        self.ctx.address
    }

    pub fn table(&self) -> &ConnectionTable {
        &self.ctx.table
    }
}

#[derive(Default)]
pub struct SimNet {
    peers: Mutex<HashMap<RingAddress, SimPeer>>,
    by_ta: Mutex<HashMap<String, RingAddress>>,
    edges: Mutex<HashMap<EdgeId, EdgeEnd>>,
    in_flight: Mutex<VecDeque<(EdgeId, Packet)>>,
    delivered: Mutex<Vec<(RingAddress, Packet)>>,
    shutdown: Mutex<Option<broadcast::Sender<()>>>,
}

impl SimNet {
    pub fn new() -> Arc<Self> {
        init_tracing();
        let net = Arc::new(Self::default());
        let (tx, _) = broadcast::channel(1);
        *net.shutdown.lock() = Some(tx);
        net
    }

    /// Add a node built from `config`. It is not started.
    pub fn add_node(self: &Arc<Self>, name: &str, config: OverlayConfig) -> SimPeer {
        self.add_node_with(name, config, None)
    }

    pub fn add_node_with(
        self: &Arc<Self>,
        name: &str,
        config: OverlayConfig,
        discovery: Option<Arc<dyn DiscoveryChannel>>,
    ) -> SimPeer {
        let address = RingAddress::from_seed(name.as_bytes());
        let registry = Arc::new(RpcRegistry::new());
        let ctx = NodeContext::new(
            address,
            config,
            Arc::new(ConnectionTable::new()),
            Arc::new(SimRpc {
                local: address,
                net: Arc::downgrade(self),
            }),
            Arc::new(SimLinker {
                local: address,
                net: Arc::downgrade(self),
            }),
            Arc::new(SimCloser {
                net: Arc::downgrade(self),
            }),
        );
        let node = Node::new(ctx.clone(), registry.clone(), discovery);
        let peer = SimPeer {
            name: name.to_string(),
            node,
            ctx: ctx.clone(),
            registry,
        };
        for ta in ctx.local_tas() {
            self.by_ta.lock().insert(ta.as_str().to_string(), address);
        }
        self.peers.lock().insert(address, peer.clone());
        peer
    }

    /// Spawn the node's run loop.
    pub fn start(&self, peer: &SimPeer) {
        let Some(shutdown) = self.shutdown.lock().as_ref().map(|tx| tx.subscribe()) else {
            return;
        };
        let node = peer.node.clone();
        tokio::spawn(async move {
            if let Err(e) = node.run(shutdown).await {
                tracing::error!(error = %e, "node loop failed");
            }
        });
    }

    pub fn stop_all(&self) {
        if let Some(tx) = self.shutdown.lock().as_ref() {
            let _ = tx.send(());
        }
    }

    pub fn peer(&self, address: &RingAddress) -> Option<SimPeer> {
        self.peers.lock().get(address).cloned()
    }

    pub fn peers(&self) -> Vec<SimPeer> {
        let mut all: Vec<_> = self.peers.lock().values().cloned().collect();
        all.sort_by_key(|p| p.address());
        all
    }

    fn resolve(&self, ta: &TransportAddress) -> Option<RingAddress> {
        self.by_ta.lock().get(ta.as_str()).copied()
    }

    /// Create an edge pair and a connection of `connection_type` on both
    /// sides. Fails if either side already has that link.
    pub fn connect(
        self: &Arc<Self>,
        a: RingAddress,
        b: RingAddress,
        connection_type: &str,
    ) -> Result<(), LinkError> {
        if a == b {
            return Err(LinkError::ConnectToSelf);
        }
        let (Some(pa), Some(pb)) = (self.peer(&a), self.peer(&b)) else {
            return Err(LinkError::NoTransports);
        };
        let main = ConnectionType::from_type_str(connection_type);
        if pa.table().contains(main, &b) || pb.table().contains(main, &a) {
            return Err(LinkError::AlreadyConnected);
        }

        let ab: EdgeRef = Arc::new(self.edge(&pb));
        let ba: EdgeRef = Arc::new(self.edge(&pa));
        {
            let mut edges = self.edges.lock();
            edges.insert(ab.id(), EdgeEnd { receiver: b, back: ba.clone() });
            edges.insert(ba.id(), EdgeEnd { receiver: a, back: ab.clone() });
        }

        if pa.table().add(Connection::new(ab.clone(), b, connection_type)).is_err() {
            return Err(LinkError::AlreadyConnected);
        }
        if pb.table().add(Connection::new(ba, a, connection_type)).is_err() {
            pa.table().remove_edge(ab.id());
            return Err(LinkError::AlreadyConnected);
        }
        Ok(())
    }

    fn edge(self: &Arc<Self>, remote: &SimPeer) -> SimEdge {
        SimEdge {
            id: EdgeId(NEXT_EDGE.fetch_add(1, Ordering::Relaxed)),
            remote: remote
                .ctx
                .local_tas()
                .first()
                .cloned()
                .unwrap_or_else(|| TransportAddress::new("sim://unknown")),
            closed: AtomicBool::new(false),
            net: Arc::downgrade(self),
        }
    }

    /// Tear down both ends of an edge.
    pub fn disconnect(&self, edge: EdgeId) {
        let Some(end) = self.edges.lock().remove(&edge) else {
            return;
        };
        let back = end.back.id();
        let sender = self.edges.lock().remove(&back).map(|e| e.receiver);
        if let Some(p) = self.peer(&end.receiver) {
            p.table().remove_edge(back);
        }
        if let Some(p) = sender.and_then(|a| self.peer(&a)) {
            p.table().remove_edge(edge);
        }
    }

    /// Inject a packet at `at` as if it originated there.
    pub fn send_from(&self, at: &RingAddress, packet: &Packet) {
        if let Some(p) = self.peer(at) {
            let outcome = p.node.route(None, packet);
            if outcome.deliver_locally {
                self.delivered.lock().push((*at, packet.clone()));
            }
        }
    }

    /// Deliver queued packets until the net is quiet. Returns hops taken.
    pub fn pump(&self) -> usize {
        let mut hops = 0;
        loop {
            let Some((edge, packet)) = self.in_flight.lock().pop_front() else {
                return hops;
            };
            hops += 1;
            let Some(end) = self.edges.lock().get(&edge).cloned() else {
                continue;
            };
            let Some(peer) = self.peer(&end.receiver) else {
                continue;
            };
            let outcome = peer.node.route(Some(&end.back), &packet);
            if outcome.deliver_locally {
                self.delivered.lock().push((end.receiver, packet));
            }
        }
    }

    pub fn take_delivered(&self) -> Vec<(RingAddress, Packet)> {
        std::mem::take(&mut *self.delivered.lock())
    }

    /// Walk `ttl` random unstructured hops from `start`, never straight back.
    fn random_walk(&self, start: RingAddress, mut came_over: Option<EdgeId>, ttl: u16) -> RingAddress {
        let mut at = start;
        for _ in 0..ttl {
            let Some(peer) = self.peer(&at) else { break };
            let view = peer.table().view(ConnectionType::Unstructured);
            if view.len() <= 1 {
                break;
            }
            let Some(next) = view.random(&mut rand::thread_rng(), came_over).cloned() else {
                break;
            };
            came_over = self.edges.lock().get(&next.edge_id()).map(|e| e.back.id());
            at = next.address;
        }
        at
    }

    fn receiver_of(&self, edge: EdgeId) -> Option<RingAddress> {
        self.edges.lock().get(&edge).map(|e| e.receiver)
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

// ── Simulated collaborators ───────────────────────────────────────────────────

struct SimRpc {
    local: RingAddress,
    net: Weak<SimNet>,
}

impl SimRpc {
    fn destination(&self, net: &SimNet, target: &RpcTarget) -> Option<(RingAddress, Option<EdgeRef>)> {
        match target {
            RpcTarget::Edge(edge) => {
                let end = net.edges.lock().get(&edge.id()).cloned()?;
                Some((end.receiver, Some(end.back)))
            }
            RpcTarget::Exact(a) => Some((*a, None)),
            RpcTarget::Routed { destination, ttl } => match destination {
                Address::Ring(a) => Some((*a, None)),
                Address::RandomWalk(_) => Some((net.random_walk(self.local, None, *ttl), None)),
                _ => None,
            },
            RpcTarget::Forwarded {
                forwarder,
                destination,
                ttl,
            } => {
                let first = net.receiver_of(forwarder.id())?;
                let back = net.edges.lock().get(&forwarder.id()).map(|e| e.back.id());
                match destination {
                    Address::Ring(a) => Some((*a, None)),
                    Address::RandomWalk(_) => Some((net.random_walk(first, back, *ttl), None)),
                    _ => None,
                }
            }
        }
    }
}

impl RpcTransport for SimRpc {
    fn invoke(&self, target: RpcTarget, method: &str, args: Value) -> mpsc::UnboundedReceiver<RpcEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let Some(net) = self.net.upgrade() else {
            let _ = tx.send(RpcEvent::Closed(CloseReason::Timeout));
            return rx;
        };
        let Some((dest, edge)) = self.destination(&net, &target) else {
            let _ = tx.send(RpcEvent::Closed(CloseReason::Timeout));
            return rx;
        };
        let Some(peer) = net.peer(&dest) else {
            let _ = tx.send(RpcEvent::Closed(CloseReason::Timeout));
            return rx;
        };

        let caller = RpcCaller {
            source: Some(self.local),
            edge,
        };
        match peer.registry.dispatch(&caller, method, args) {
            Ok(value) => {
                let _ = tx.send(RpcEvent::Result(value));
                let _ = tx.send(RpcEvent::Closed(CloseReason::Complete));
            }
            Err(e) => {
                let _ = tx.send(RpcEvent::Closed(e.into()));
            }
        }
        rx
    }
}

struct SimLinker {
    local: RingAddress,
    net: Weak<SimNet>,
}

impl Linker for SimLinker {
    fn link(&self, request: LinkRequest) -> BoxFuture<'static, Result<(), LinkError>> {
        let local = self.local;
        let net = self.net.clone();
        async move {
            tokio::task::yield_now().await;
            let net = net.upgrade().ok_or(LinkError::EdgeClosed)?;
            let remote = request
                .transports
                .iter()
                .filter_map(|ta| net.resolve(ta))
                .find(|a| *a != local)
                .or(request.target)
                .ok_or(LinkError::NoTransports)?;
            if let Some(target) = request.target {
                if target != remote {
                    return Err(LinkError::TargetMismatch);
                }
            }
            net.connect(local, remote, &request.connection_type)
        }
        .boxed()
    }
}

struct SimCloser {
    net: Weak<SimNet>,
}

impl GracefulCloser for SimCloser {
    fn close(&self, edge: &EdgeRef, reason: &str) {
        tracing::debug!(edge = %edge.id(), reason, "closing simulated edge");
        if let Some(net) = self.net.upgrade() {
            net.disconnect(edge.id());
        }
    }
}
