use crate::*;

use ringmesh_core::message::CONNECT_METHOD;
use ringmesh_core::{ConnectRequest, NodeInfo};
use ringmesh_overlay::overlord::{ManagedState, MANAGED_TYPE};

/// A pinned target is reached with one managed link on each side.
#[tokio::test]
async fn test_managed_pin_links_both_sides() {
    let net = SimNet::new();
    let a = net.add_node("alpha", test_config("alpha"));
    let b = net.add_node("bravo", test_config("bravo"));
    net.start(&a);
    net.start(&b);

    a.node.managed().set(b.address());

    let linked = eventually(Duration::from_secs(2), || {
        a.node.managed().state(&b.address()) == Some(ManagedState::On)
    })
    .await;
    assert!(linked, "managed target never came up");

    let on_a = a.table().get(ConnectionType::Structured, &b.address()).unwrap();
    let on_b = b.table().get(ConnectionType::Structured, &a.address()).unwrap();
    assert_eq!(on_a.connection_type, MANAGED_TYPE);
    assert_eq!(on_b.connection_type, MANAGED_TYPE);
    assert_eq!(a.table().count(ConnectionType::Structured), 1);
    assert_eq!(b.table().count(ConnectionType::Structured), 1);

    net.stop_all();
}

/// Unpinning closes the link on both ends.
#[tokio::test]
async fn test_unpin_closes_managed_link() {
    let net = SimNet::new();
    let a = net.add_node("alpha", test_config("alpha"));
    let b = net.add_node("bravo", test_config("bravo"));
    net.start(&a);
    net.start(&b);

    a.node.managed().set(b.address());
    assert!(
        eventually(Duration::from_secs(2), || a.table().total_count() == 1).await,
        "link never came up"
    );

    assert!(a.node.managed().unset(&b.address()));
    assert!(
        eventually(Duration::from_secs(2), || {
            a.table().total_count() == 0 && b.table().total_count() == 0
        })
        .await,
        "link still present after unpin"
    );

    net.stop_all();
}

/// The connect reply names the responder and its structured peers nearest
/// to the requester, never the requester itself.
#[tokio::test]
async fn test_connect_reply_lists_nearest_neighbors() {
    let net = SimNet::new();
    let hub = net.add_node("hub", test_config("hub"));
    let asker = net.add_node("asker", test_config("asker"));
    let others: Vec<_> = (0..6)
        .map(|i| {
            let name = format!("spoke-{i}");
            net.add_node(&name, test_config(&name))
        })
        .collect();
    for o in &others {
        net.connect(hub.address(), o.address(), "structured.near").unwrap();
    }
    net.connect(hub.address(), asker.address(), "structured.near").unwrap();

    let request = ConnectRequest::new(
        "structured.shortcut",
        NodeInfo::new(asker.address(), asker.ctx.local_tas()),
    );
    let reply = hub
        .registry
        .dispatch(&RpcCaller::default(), CONNECT_METHOD, request.to_value())
        .unwrap();
    let reply = ConnectRequest::from_value(reply).unwrap();

    assert_eq!(reply.target.address, hub.address());
    assert_eq!(reply.connection_type, "structured.shortcut");
    assert_eq!(reply.token, asker.address().to_string());
    assert_eq!(reply.neighbors.len(), 4);
    assert!(reply.neighbors.iter().all(|n| n.address != asker.address()));

    let mut expected: Vec<_> = others.iter().map(|o| o.address()).collect();
    expected.sort_by_key(|x| asker.address().distance_to(x).unsigned_abs());
    let got: Vec<_> = reply.neighbors.iter().map(|n| n.address).collect();
    for n in &got {
        assert!(expected[..4].contains(n), "{n} is not among the nearest");
    }
}

/// Concurrent link attempts for the same peer and type collapse to one link.
#[tokio::test]
async fn test_concurrent_links_collapse() {
    let net = SimNet::new();
    let a = net.add_node("alpha", test_config("alpha"));
    let b = net.add_node("bravo", test_config("bravo"));

    let msg = ConnectRequest::new("structured.near", NodeInfo::new(b.address(), b.ctx.local_tas()));
    for _ in 0..5 {
        a.ctx.setup.start_linking(LinkRequest::from_message(&msg));
    }
    assert!(
        eventually(Duration::from_secs(2), || {
            a.table().count(ConnectionType::Structured) == 1 && a.ctx.setup.active_count() == 0
        })
        .await
    );
    assert_eq!(b.table().count(ConnectionType::Structured), 1);
}
