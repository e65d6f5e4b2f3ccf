//! Leaf links: the always-on bootstrap connections.
//!
//! Leaf attempts go straight to the linker against the known remote
//! endpoints, with no expected peer address. Failed rounds back off,
//! doubling from the configured interval up to the configured ceiling, and
//! the backoff resets as soon as any leaf link comes up. A finished attempt
//! starts the next one right away if the backoff allows it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::time::Instant;

use ringmesh_services::{Connection, ConnectionType, LinkRequest};

use super::ConnectionOverlord;
use crate::context::NodeContext;

struct LeafState {
    linking: bool,
    retry_interval: Duration,
    next_attempt: Option<Instant>,
}

pub struct LeafOverlord {
    ctx: Arc<NodeContext>,
    active: AtomicBool,
    state: Arc<Mutex<LeafState>>,
    me: Weak<LeafOverlord>,
}

impl LeafOverlord {
    pub fn new(ctx: Arc<NodeContext>) -> Arc<Self> {
        let retry_interval = ctx.config.leaf.retry_interval();
        Arc::new_cyclic(|me| Self {
            ctx,
            active: AtomicBool::new(false),
            state: Arc::new(Mutex::new(LeafState {
                linking: false,
                retry_interval,
                next_attempt: None,
            })),
            me: me.clone(),
        })
    }

    fn desired(&self) -> usize {
        self.ctx.config.leaf.desired
    }

    fn reset_backoff(&self) {
        let mut state = self.state.lock();
        state.retry_interval = self.ctx.config.leaf.retry_interval();
        state.next_attempt = None;
    }

    /// Close one random leaf other than `newest` once there are too many.
    fn trim(&self, newest: &Arc<Connection>) {
        let leafs = self.ctx.table.connections(ConnectionType::Leaf);
        if leafs.len() <= 2 * self.desired() {
            return;
        }
        let candidates: Vec<_> = leafs
            .iter()
            .filter(|c| c.edge_id() != newest.edge_id())
            .collect();
        if candidates.is_empty() {
            return;
        }
        let victim = candidates[rand::thread_rng().gen_range(0..candidates.len())];
        tracing::debug!(
            peer = %victim.address.short(),
            leafs = leafs.len(),
            "too many leaf connections, closing one"
        );
        self.ctx.closer.close(&victim.edge, "too many leaf connections");
    }
}

impl ConnectionOverlord for LeafOverlord {
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
        self.ctx.table.count(ConnectionType::Leaf) < self.desired()
    }

    fn activate(&self) {
        if !self.is_active() || !self.need_connection() {
            return;
        }

        let now = Instant::now();
        {
            let mut state = self.state.lock();
            if state.linking || state.next_attempt.is_some_and(|t| now < t) {
                return;
            }
            state.linking = true;
            state.next_attempt = Some(now + state.retry_interval);
            let cap = self.ctx.config.leaf.max_retry_interval();
            state.retry_interval = (state.retry_interval * 2).min(cap);
        }

        let mut transports = self.ctx.remote_tas();
        if transports.is_empty() {
            tracing::debug!("no remote endpoints known for leaf link");
            self.state.lock().linking = false;
            return;
        }
        transports.shuffle(&mut rand::thread_rng());

        tracing::debug!(transports = transports.len(), "seeking leaf link");
        let work = self.ctx.linker.link(LinkRequest {
            target: None,
            transports,
            connection_type: ConnectionType::Leaf.as_str().to_string(),
            token: self.ctx.address.to_string(),
        });
        let state = self.state.clone();
        let me = self.me.clone();
        tokio::spawn(async move {
            if let Err(e) = work.await {
                tracing::debug!(error = %e, "leaf link failed");
            }
            state.lock().linking = false;
            if let Some(me) = me.upgrade() {
                me.activate();
            }
        });
    }

    fn on_connection(&self, connection: &Arc<Connection>) {
        if connection.main_type != ConnectionType::Leaf {
            return;
        }
        self.reset_backoff();
        self.trim(connection);
        self.activate();
    }

    fn on_disconnection(&self, connection: &Arc<Connection>) {
        if connection.main_type == ConnectionType::Leaf {
            self.activate();
        }
    }
}
