//! Unstructured links: random peers found by random walks.
//!
//! The desired count only ever grows. Each new link that arrives while the
//! node is exactly at its target raises the target by one, and sometimes by
//! one more. Until the node has a few unstructured links of its own, it
//! sends its walks out through a leaf link.
//!
//! The current count is read from the connection table on every event, so a
//! missed or repeated event cannot skew it. A new attempt follows right
//! after one that gained a link; after one that did not, the next try waits
//! for the heartbeat.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::Rng;

use ringmesh_core::{Address, RandomWalkAddress};
use ringmesh_services::{Connection, ConnectionType, RpcTarget};

use super::ConnectionOverlord;
use crate::context::NodeContext;
use crate::handshake::{Connector, ConnectorReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UnstructuredState {
    desired: usize,
    current: usize,
    connecting: bool,
    /// Count when the running attempt started.
    attempt_base: usize,
}

pub struct UnstructuredOverlord {
    ctx: Arc<NodeContext>,
    active: AtomicBool,
    state: Mutex<UnstructuredState>,
    me: Weak<UnstructuredOverlord>,
}

impl UnstructuredOverlord {
    pub fn new(ctx: Arc<NodeContext>) -> Arc<Self> {
        let desired = ctx.config.unstructured.initial_desired;
        Arc::new_cyclic(|me| Self {
            ctx,
            active: AtomicBool::new(false),
            state: Mutex::new(UnstructuredState {
                desired,
                current: 0,
                connecting: false,
                attempt_base: 0,
            }),
            me: me.clone(),
        })
    }

    pub fn desired(&self) -> usize {
        self.state.lock().desired
    }

    pub fn current(&self) -> usize {
        self.state.lock().current
    }

    fn table_count(&self) -> usize {
        self.ctx.table.count(ConnectionType::Unstructured)
    }

    fn target(&self, current: usize) -> Option<RpcTarget> {
        let cfg = &self.ctx.config.unstructured;
        let destination = Address::RandomWalk(RandomWalkAddress);
        if current < cfg.bootstrap_threshold {
            let Some(leaf) = self.ctx.table.random(ConnectionType::Leaf) else {
                tracing::debug!("no leaf link to bootstrap unstructured walk through");
                return None;
            };
            Some(RpcTarget::Forwarded {
                forwarder: leaf.edge.clone(),
                destination,
                ttl: cfg.connect_ttl,
            })
        } else {
            Some(RpcTarget::Routed {
                destination,
                ttl: cfg.connect_ttl,
            })
        }
    }
}

impl ConnectionOverlord for UnstructuredOverlord {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Unstructured
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
        let state = self.state.lock();
        state.current < state.desired
    }

    fn activate(&self) {
        if !self.is_active() {
            return;
        }
        let current = {
            let mut state = self.state.lock();
            if state.connecting || state.current >= state.desired {
                return;
            }
            state.connecting = true;
            state.attempt_base = state.current;
            state.current
        };

        let (Some(owner), Some(target)) = (self.me.upgrade(), self.target(current)) else {
            self.state.lock().connecting = false;
            return;
        };

        tracing::debug!(current, target = ?target, "seeking unstructured link");
        let request = self.ctx.connect_request(ConnectionType::Unstructured.as_str());
        Connector::new(&self.ctx, owner, target, request).start();
    }

    fn on_connection(&self, connection: &Arc<Connection>) {
        if connection.main_type != ConnectionType::Unstructured {
            return;
        }
        let p = self.ctx.config.unstructured.extra_growth_probability;
        let count = self.table_count();
        let (desired, current) = {
            let mut state = self.state.lock();
            if count > state.current && state.current == state.desired {
                state.desired += 1;
                if rand::thread_rng().gen::<f64>() < p {
                    state.desired += 1;
                }
            }
            state.current = count;
            (state.desired, state.current)
        };
        tracing::debug!(
            peer = %connection.address.short(),
            desired,
            current,
            "unstructured link up"
        );
        self.activate();
    }

    fn on_disconnection(&self, connection: &Arc<Connection>) {
        if connection.main_type != ConnectionType::Unstructured {
            return;
        }
        let count = self.table_count();
        self.state.lock().current = count;
        self.activate();
    }

    fn resync(&self) {
        let count = self.table_count();
        self.state.lock().current = count;
        self.activate();
    }

    fn connector_finished(&self, report: ConnectorReport) {
        if !report.succeeded() {
            tracing::debug!(error = ?report.error, "unstructured connect attempt failed");
        }
        let gained = {
            let mut state = self.state.lock();
            state.connecting = false;
            state.current > state.attempt_base
        };
        if gained {
            self.activate();
        }
    }
}
