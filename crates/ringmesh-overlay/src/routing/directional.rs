//! Directional routing: hand the packet to the nearest structured neighbor
//! on one side of this node.

use std::sync::Arc;

use ringmesh_core::wire::Packet;
use ringmesh_core::{Bearing, RingAddress};
use ringmesh_services::{Connection, ConnectionTable, ConnectionType, EdgeId, RingView};

use super::{is_from, send_on, RouteOutcome};

pub fn route(
    local: &RingAddress,
    table: &ConnectionTable,
    from: Option<EdgeId>,
    packet: &Packet,
    bearing: Bearing,
) -> RouteOutcome {
    let view = table.view(ConnectionType::Structured);

    // skip the sender once by stepping past it in the same direction
    let next = match step(&view, local, bearing) {
        Some(c) if is_from(&c.edge, from) => step(&view, &c.address, bearing),
        other => other,
    };

    match next {
        Some(c) if packet.has_ttl_left() && !is_from(&c.edge, from) => {
            if send_on(&c.edge, &packet.increment_hops()) {
                RouteOutcome::forwarded(1)
            } else {
                RouteOutcome::stuck(packet)
            }
        }
        _ => RouteOutcome::stuck(packet),
    }
}

fn step<'a>(view: &'a RingView, from: &RingAddress, bearing: Bearing) -> Option<&'a Arc<Connection>> {
    match bearing {
        Bearing::Left => view.left_of(from),
        Bearing::Right => view.right_of(from),
    }
}
