//! Random-walk routing: one random unstructured hop at a time until the
//! hop budget runs out.

use rand::Rng;

use ringmesh_core::wire::Packet;
use ringmesh_services::{ConnectionTable, ConnectionType, EdgeId};

use super::{send_on, RouteOutcome};

pub fn route<R: Rng>(
    table: &ConnectionTable,
    from: Option<EdgeId>,
    packet: &Packet,
    rng: &mut R,
) -> RouteOutcome {
    if packet.hops > packet.ttl {
        return RouteOutcome::dropped();
    }
    if packet.hops == packet.ttl {
        return RouteOutcome::deliver();
    }

    let view = table.view(ConnectionType::Unstructured);
    if view.len() <= 1 {
        return RouteOutcome::deliver();
    }

    match view.random(rng, from) {
        Some(c) if send_on(&c.edge, &packet.increment_hops()) => RouteOutcome::forwarded(1),
        // the walk ends here if the next hop is gone
        _ => RouteOutcome::deliver(),
    }
}
