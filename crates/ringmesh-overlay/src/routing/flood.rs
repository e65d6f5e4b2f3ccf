//! Probabilistic epidemic routing over unstructured links.
//!
//! With the first-hop flag set, one random unstructured neighbor gets the
//! packet as-is, and every other neighbor gets an unflagged copy with
//! probability `p`. Without the flag, every neighbor gets it with
//! probability `p`. The randomly chosen neighbor is excluded from the
//! probabilistic pass, so no neighbor receives two copies.

use rand::Rng;

use ringmesh_core::wire::Packet;
use ringmesh_core::{Address, FloodAddress};
use ringmesh_services::{ConnectionTable, ConnectionType, EdgeId};

use super::{send_on, RouteOutcome};

pub fn route<R: Rng>(
    table: &ConnectionTable,
    from: Option<EdgeId>,
    packet: &Packet,
    dest: &FloodAddress,
    rng: &mut R,
) -> RouteOutcome {
    let view = table.view(ConnectionType::Unstructured);
    if view.len() < 2 || !packet.has_ttl_left() {
        return RouteOutcome::stuck(packet);
    }

    let mut sent = 0;
    let mut chosen = None;
    if dest.first_hop {
        if let Some(c) = view.random(rng, from) {
            chosen = Some(c.edge_id());
            if send_on(&c.edge, &packet.increment_hops()) {
                sent += 1;
            }
        }
    }

    let next = if dest.first_hop {
        packet
            .increment_hops()
            .with_destination(Address::Flood(dest.without_first_hop()))
    } else {
        packet.increment_hops()
    };

    for c in view.iter() {
        let id = Some(c.edge_id());
        if id == from || id == chosen {
            continue;
        }
        if rng.gen::<f32>() < dest.probability && send_on(&c.edge, &next) {
            sent += 1;
        }
    }

    // every node the epidemic reaches processes the packet
    RouteOutcome {
        sent,
        deliver_locally: true,
    }
}
