//! Managed links: structured connections to caller-pinned addresses.
//!
//! Each pinned target walks `Off -> Attempt1 -> Attempt2 -> Off`, one step
//! per finished handshake that did not leave it connected, and sits in `On`
//! while connected. A target that gave up is picked up again by the periodic
//! check or when its link drops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::time::Instant;

use ringmesh_core::RingAddress;
use ringmesh_services::{Connection, ConnectionType, RpcTarget};

use super::ConnectionOverlord;
use crate::context::NodeContext;
use crate::handshake::{AttemptKey, Connector, ConnectorReport};

pub const MANAGED_TYPE: &str = "structured.managed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedState {
    Off,
    Attempt1,
    Attempt2,
    On,
}

pub struct ManagedOverlord {
    ctx: Arc<NodeContext>,
    active: AtomicBool,
    targets: Mutex<HashMap<RingAddress, ManagedState>>,
    last_check: Mutex<Instant>,
    me: Weak<ManagedOverlord>,
}

impl ManagedOverlord {
    pub fn new(ctx: Arc<NodeContext>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            ctx,
            active: AtomicBool::new(false),
            targets: Mutex::new(HashMap::new()),
            last_check: Mutex::new(Instant::now()),
            me: me.clone(),
        })
    }

    /// Pin `address`. Connects right away when active.
    pub fn set(&self, address: RingAddress) {
        if address == self.ctx.address {
            tracing::debug!("not pinning own address");
            return;
        }
        let added = {
            let mut targets = self.targets.lock();
            if targets.contains_key(&address) {
                false
            } else {
                let state = if self.is_connected(&address) {
                    ManagedState::On
                } else {
                    ManagedState::Off
                };
                targets.insert(address, state);
                state == ManagedState::Off
            }
        };
        tracing::info!(peer = %address.short(), "managed target pinned");
        if added && self.is_active() {
            self.connect_to(address);
        }
    }

    /// Unpin `address` and close its managed link, if any.
    pub fn unset(&self, address: &RingAddress) -> bool {
        if self.targets.lock().remove(address).is_none() {
            return false;
        }
        tracing::info!(peer = %address.short(), "managed target unpinned");
        if let Some(conn) = self.ctx.table.get(ConnectionType::Structured, address) {
            if conn.connection_type == MANAGED_TYPE {
                self.ctx.closer.close(&conn.edge, "managed target removed");
            }
        }
        true
    }

    pub fn state(&self, address: &RingAddress) -> Option<ManagedState> {
        self.targets.lock().get(address).copied()
    }

    pub fn targets(&self) -> Vec<RingAddress> {
        self.targets.lock().keys().copied().collect()
    }

    fn is_connected(&self, address: &RingAddress) -> bool {
        self.ctx.table.contains(ConnectionType::Structured, address)
    }

    fn connect_to(&self, address: RingAddress) {
        let Some(owner) = self.me.upgrade() else {
            return;
        };
        tracing::debug!(peer = %address.short(), "connecting to managed target");

        let ctx = self.ctx.clone();
        let key = AttemptKey::new(address, ConnectionType::Structured);
        Connector::new(
            &self.ctx,
            owner,
            RpcTarget::Exact(address),
            self.ctx.connect_request(MANAGED_TYPE),
        )
        .with_abort_check(move || {
            ctx.table.contains(ConnectionType::Structured, &address) || ctx.setup.is_active(&key)
        })
        .start();
    }

    /// Try again after the configured delay, if still wanted by then.
    fn retry_later(&self, address: RingAddress) {
        let me = self.me.clone();
        let delay = self.ctx.config.managed.retry_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(me) = me.upgrade() else { return };
            let wanted = matches!(
                me.state(&address),
                Some(ManagedState::Attempt1 | ManagedState::Attempt2)
            );
            if wanted && me.is_active() {
                me.connect_to(address);
            }
        });
    }

    /// Restart every target that is not connected and has no link attempt
    /// running.
    fn check(&self) {
        let idle: Vec<_> = {
            let targets = self.targets.lock();
            targets
                .iter()
                .filter(|(addr, state)| {
                    **state != ManagedState::On
                        && !self.is_connected(addr)
                        && !self
                            .ctx
                            .setup
                            .is_active(&AttemptKey::new(**addr, ConnectionType::Structured))
                })
                .map(|(addr, _)| *addr)
                .collect()
        };
        for address in idle {
            self.connect_to(address);
        }
    }
}

impl ConnectionOverlord for ManagedOverlord {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Structured
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
        self.targets
            .lock()
            .values()
            .any(|s| *s != ManagedState::On)
    }

    fn activate(&self) {
        if self.is_active() {
            self.check();
        }
    }

    fn on_connection(&self, connection: &Arc<Connection>) {
        if connection.main_type != ConnectionType::Structured {
            return;
        }
        if let Some(state) = self.targets.lock().get_mut(&connection.address) {
            *state = ManagedState::On;
        }
    }

    fn on_disconnection(&self, connection: &Arc<Connection>) {
        if connection.main_type != ConnectionType::Structured {
            return;
        }
        let pinned = match self.targets.lock().get_mut(&connection.address) {
            Some(state) => {
                *state = ManagedState::Off;
                true
            }
            None => false,
        };
        if pinned && self.is_active() {
            tracing::debug!(peer = %connection.address.short(), "managed link lost");
            self.connect_to(connection.address);
        }
    }

    fn resync(&self) {
        {
            let mut targets = self.targets.lock();
            for (address, state) in targets.iter_mut() {
                if self.is_connected(address) {
                    *state = ManagedState::On;
                } else if *state == ManagedState::On {
                    *state = ManagedState::Off;
                }
            }
        }
        self.activate();
    }

    fn on_heartbeat(&self) {
        if !self.is_active() {
            return;
        }
        let now = Instant::now();
        {
            let mut last = self.last_check.lock();
            if now.duration_since(*last) < self.ctx.config.managed.check_interval() {
                return;
            }
            *last = now;
        }
        self.check();
    }

    fn connector_finished(&self, report: ConnectorReport) {
        let Some(address) = report.target.exact_address() else {
            return;
        };
        let connected = self.is_connected(&address);
        let retry = {
            let mut targets = self.targets.lock();
            let Some(state) = targets.get_mut(&address) else {
                return;
            };
            if connected {
                *state = ManagedState::On;
                false
            } else {
                // a reply without a link counts the same as no reply
                let (next, retry) = match *state {
                    ManagedState::Off => (ManagedState::Attempt1, true),
                    ManagedState::Attempt1 => (ManagedState::Attempt2, true),
                    ManagedState::Attempt2 | ManagedState::On => (ManagedState::Off, false),
                };
                tracing::debug!(
                    peer = %address.short(),
                    state = ?next,
                    outcome = ?report.state,
                    error = ?report.error,
                    "managed connect attempt ended unconnected"
                );
                *state = next;
                retry
            }
        };
        if retry {
            self.retry_later(address);
        }
    }
}
