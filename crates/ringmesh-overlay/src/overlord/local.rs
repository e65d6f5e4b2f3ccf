//! Local discovery: find same-realm nodes on the link when isolated.
//!
//! This overlord never links by itself. It only feeds the bootstrap
//! endpoint set that leaf links draw from, and only while the node has no
//! connections at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use ringmesh_core::message::{DiscoveryQuery, DiscoveryReply};
use ringmesh_core::RingAddress;
use ringmesh_services::ConnectionType;

use super::ConnectionOverlord;
use crate::context::NodeContext;
use crate::discovery::DiscoveryChannel;

struct DiscoveryState {
    querying: bool,
    last_query: Option<Instant>,
    /// Same-realm nodes seen so far, sorted by address.
    discovered: Vec<RingAddress>,
}

pub struct LocalDiscoveryOverlord {
    ctx: Arc<NodeContext>,
    channel: Arc<dyn DiscoveryChannel>,
    active: AtomicBool,
    state: Arc<Mutex<DiscoveryState>>,
}

impl LocalDiscoveryOverlord {
    pub fn new(ctx: Arc<NodeContext>, channel: Arc<dyn DiscoveryChannel>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            channel,
            active: AtomicBool::new(false),
            state: Arc::new(Mutex::new(DiscoveryState {
                querying: false,
                last_query: None,
                discovered: Vec::new(),
            })),
        })
    }

    pub fn discovered(&self) -> Vec<RingAddress> {
        self.state.lock().discovered.clone()
    }

    fn isolated(&self) -> bool {
        self.ctx.table.total_count() == 0
    }
}

/// Merge one answer into the bootstrap set. Returns false if it was skipped.
fn handle_reply(ctx: &NodeContext, state: &Mutex<DiscoveryState>, reply: DiscoveryReply) -> bool {
    if reply.namespace != ctx.realm || reply.address == ctx.address {
        tracing::trace!(
            peer = %reply.address.short(),
            namespace = %reply.namespace,
            "ignoring discovery reply"
        );
        return false;
    }
    let added = ctx.add_remote_tas(reply.tas);
    {
        let mut state = state.lock();
        if let Err(idx) = state.discovered.binary_search(&reply.address) {
            state.discovered.insert(idx, reply.address);
        }
    }
    tracing::debug!(peer = %reply.address.short(), added, "local node discovered");
    true
}

impl ConnectionOverlord for LocalDiscoveryOverlord {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Leaf
    }

    fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    fn need_connection(&self) -> bool {
        false
    }

    fn activate(&self) {
        if !self.is_active() || !self.ctx.config.discovery.enabled || !self.isolated() {
            return;
        }
        let now = Instant::now();
        {
            let mut state = self.state.lock();
            let interval = self.ctx.config.discovery.announce_interval();
            let due = state.last_query.map_or(true, |t| now.duration_since(t) >= interval);
            if state.querying || !due {
                return;
            }
            state.querying = true;
            state.last_query = Some(now);
        }

        tracing::debug!(realm = %self.ctx.realm, "no connections, querying local segment");
        let mut replies = self.channel.query(DiscoveryQuery::default());
        let ctx = self.ctx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(reply) = replies.recv().await {
                handle_reply(&ctx, &state, reply);
            }
            state.lock().querying = false;
        });
    }

    fn on_heartbeat(&self) {
        self.activate();
    }
}
