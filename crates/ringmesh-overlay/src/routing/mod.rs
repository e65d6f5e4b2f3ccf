//! Per-address-class packet routing.
//!
//! `Router::route` dispatches on the destination's class. Routing is best
//! effort: it never blocks, never retries, and drops silently when there is
//! nowhere useful to send a packet.

use std::sync::Arc;

use ringmesh_core::wire::Packet;
use ringmesh_core::{Address, RingAddress};
use ringmesh_services::{ConnectionTable, EdgeId, EdgeRef};

pub mod directional;
pub mod flood;
pub mod random_walk;
pub mod ring;

/// What happened to one packet at this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteOutcome {
    /// Edges the packet went out on.
    pub sent: usize,
    pub deliver_locally: bool,
}

impl RouteOutcome {
    pub fn dropped() -> Self {
        Self::default()
    }

    pub fn deliver() -> Self {
        Self {
            sent: 0,
            deliver_locally: true,
        }
    }

    pub fn forwarded(sent: usize) -> Self {
        Self {
            sent,
            deliver_locally: false,
        }
    }

    /// Nothing was forwarded; deliver only on a last-hop packet.
    fn stuck(packet: &Packet) -> Self {
        Self {
            sent: 0,
            deliver_locally: packet.delivery.is_last_hop(),
        }
    }
}

pub struct Router {
    local: RingAddress,
    table: Arc<ConnectionTable>,
}

impl Router {
    pub fn new(local: RingAddress, table: Arc<ConnectionTable>) -> Self {
        Self { local, table }
    }

    /// Route a packet that arrived on `from` (`None` if it originated here).
    pub fn route(&self, from: Option<&EdgeRef>, packet: &Packet) -> RouteOutcome {
        let from = from.map(|e| e.id());
        let outcome = match &packet.destination {
            Address::Ring(dest) => ring::route(&self.local, &self.table, from, packet, dest),
            Address::Directional(dest) => {
                directional::route(&self.local, &self.table, from, packet, dest.bearing)
            }
            Address::Flood(dest) => {
                flood::route(&self.table, from, packet, dest, &mut rand::thread_rng())
            }
            Address::RandomWalk(_) => {
                random_walk::route(&self.table, from, packet, &mut rand::thread_rng())
            }
        };
        tracing::trace!(
            destination = %packet.destination,
            hops = packet.hops,
            ttl = packet.ttl,
            sent = outcome.sent,
            deliver = outcome.deliver_locally,
            "routed"
        );
        outcome
    }
}

/// Send, logging and swallowing transport failures.
pub(crate) fn send_on(edge: &EdgeRef, packet: &Packet) -> bool {
    match edge.send(packet) {
        Ok(()) => true,
        Err(e) => {
            tracing::trace!(edge = %edge.id(), error = %e, "send failed, dropping");
            false
        }
    }
}

pub(crate) fn is_from(edge: &EdgeRef, from: Option<EdgeId>) -> bool {
    Some(edge.id()) == from
}
