//! Greedy ring routing towards a ring address.
//!
//! A packet moves to whichever structured neighbor is closest to the
//! destination, and only while that neighbor is strictly closer than this
//! node. A leaf link to the exact destination short-circuits the search.

use ringmesh_core::wire::{DeliveryMode, Packet};
use ringmesh_core::RingAddress;
use ringmesh_services::{ConnectionTable, ConnectionType, EdgeId};

use super::{is_from, send_on, RouteOutcome};

pub fn route(
    local: &RingAddress,
    table: &ConnectionTable,
    from: Option<EdgeId>,
    packet: &Packet,
    dest: &RingAddress,
) -> RouteOutcome {
    if packet.hops > packet.ttl {
        return RouteOutcome::dropped();
    }
    if dest == local {
        return RouteOutcome::deliver();
    }
    if !packet.has_ttl_left() {
        return RouteOutcome::stuck(packet);
    }

    let next = packet.increment_hops();

    if let Some(leaf) = table.get(ConnectionType::Leaf, dest) {
        if !is_from(&leaf.edge, from) && send_on(&leaf.edge, &next) {
            return RouteOutcome::forwarded(1);
        }
    }

    let view = table.view(ConnectionType::Structured);
    let closest = view
        .iter()
        .filter(|c| !is_from(&c.edge, from))
        .min_by_key(|c| dest.distance_to(&c.address).unsigned_abs());

    match closest {
        Some(c) if dest.is_closer(&c.address, local) => {
            if send_on(&c.edge, &next) {
                RouteOutcome::forwarded(1)
            } else {
                RouteOutcome::stuck(packet)
            }
        }
        // nobody we know is closer than us
        _ => RouteOutcome {
            sent: 0,
            deliver_locally: packet.delivery != DeliveryMode::Exact,
        },
    }
}
