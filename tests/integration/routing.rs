use crate::*;

use bytes::Bytes;
use ringmesh_core::wire::DeliveryMode;
use ringmesh_core::{Bearing, DirectionalAddress, FloodAddress, RandomWalkAddress};

/// Nodes sorted by address, each linked to its successor, closing the ring.
fn ring_net(count: usize) -> (Arc<SimNet>, Vec<SimPeer>) {
    let net = SimNet::new();
    for i in 0..count {
        let name = format!("ring-{i}");
        net.add_node(&name, test_config(&name));
    }
    let peers = net.peers();
    for i in 0..count {
        let next = &peers[(i + 1) % count];
        net.connect(peers[i].address(), next.address(), "structured.near")
            .unwrap();
    }
    (net, peers)
}

fn mesh_net(count: usize) -> (Arc<SimNet>, Vec<SimPeer>) {
    let net = SimNet::new();
    for i in 0..count {
        let name = format!("mesh-{i}");
        net.add_node(&name, test_config(&name));
    }
    let peers = net.peers();
    for i in 0..count {
        for j in i + 1..count {
            net.connect(peers[i].address(), peers[j].address(), "unstructured")
                .unwrap();
        }
    }
    (net, peers)
}

#[tokio::test]
async fn test_greedy_ring_delivery_reaches_exact_target() {
    let (net, peers) = ring_net(8);
    for (src, dst) in [(0, 5), (3, 2), (7, 1), (4, 4)] {
        let packet = Packet::new(
            peers[src].address(),
            Address::Ring(peers[dst].address()),
            64,
            Bytes::from_static(b"hello"),
        );
        net.send_from(&peers[src].address(), &packet);
        net.pump();

        let delivered = net.take_delivered();
        assert_eq!(delivered.len(), 1, "{src} -> {dst}");
        assert_eq!(delivered[0].0, peers[dst].address());
        assert_eq!(delivered[0].1.payload, Bytes::from_static(b"hello"));
        // every hop gets strictly closer, so no node is visited twice
        assert!(delivered[0].1.hops < 8);
    }
}

#[tokio::test]
async fn test_nearest_mode_lands_on_closest_node() {
    let (net, peers) = ring_net(8);
    let target = RingAddress::from_seed(b"nobody lives here");
    let closest = peers
        .iter()
        .min_by_key(|p| target.distance_to(&p.address()).unsigned_abs())
        .unwrap()
        .address();

    let nearest = Packet::new(peers[0].address(), Address::Ring(target), 64, Bytes::new())
        .with_delivery(DeliveryMode::Nearest);
    net.send_from(&peers[0].address(), &nearest);
    net.pump();
    let delivered = net.take_delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, closest);

    let exact = Packet::new(peers[0].address(), Address::Ring(target), 64, Bytes::new());
    net.send_from(&peers[0].address(), &exact);
    net.pump();
    assert!(net.take_delivered().is_empty());
}

#[tokio::test]
async fn test_directional_walks_left_for_ttl_hops() {
    let (net, peers) = ring_net(8);
    let packet = Packet::new(
        peers[6].address(),
        Address::Directional(DirectionalAddress::new(Bearing::Left)),
        3,
        Bytes::new(),
    )
    .with_delivery(DeliveryMode::Last);
    net.send_from(&peers[6].address(), &packet);
    net.pump();

    let delivered = net.take_delivered();
    assert_eq!(delivered.len(), 1);
    // left is towards larger addresses, wrapping past the top
    assert_eq!(delivered[0].0, peers[1].address());
    assert_eq!(delivered[0].1.hops, 3);
}

#[tokio::test]
async fn test_random_walk_ends_at_one_node() {
    let (net, peers) = mesh_net(5);
    for _ in 0..10 {
        let packet = Packet::new(
            peers[0].address(),
            Address::RandomWalk(RandomWalkAddress),
            3,
            Bytes::new(),
        );
        net.send_from(&peers[0].address(), &packet);
        assert_eq!(net.pump(), 3);

        let delivered = net.take_delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1.hops, 3);
    }
}

#[tokio::test]
async fn test_certain_flood_reaches_everyone() {
    let (net, peers) = mesh_net(4);
    let packet = Packet::new(
        peers[0].address(),
        Address::Flood(FloodAddress::new(true, 1.0)),
        2,
        Bytes::new(),
    );
    net.send_from(&peers[0].address(), &packet);
    net.pump();

    let delivered = net.take_delivered();
    for p in &peers {
        assert!(
            delivered.iter().any(|(at, _)| *at == p.address()),
            "{} never saw the flood",
            p.name
        );
    }
    assert!(delivered.iter().all(|(_, pkt)| pkt.hops <= 2));
}
