use crate::*;

use ringmesh_core::message::{DiscoveryQuery, DiscoveryReply, DISCOVERY_METHOD};
use ringmesh_overlay::discovery::multicast::if_index;
use ringmesh_overlay::discovery::MulticastDiscovery;

/// In-process segment: a query reaches every registry on it.
struct Segment {
    registries: Vec<Arc<RpcRegistry>>,
}

impl DiscoveryChannel for Segment {
    fn query(&self, query: DiscoveryQuery) -> mpsc::Receiver<DiscoveryReply> {
        let (tx, rx) = mpsc::channel(16);
        for registry in &self.registries {
            let Ok(value) = registry.dispatch(&RpcCaller::default(), &query.method, Value::Null) else {
                continue;
            };
            if let Ok(reply) = serde_json::from_value(value) {
                let _ = tx.try_send(reply);
            }
        }
        rx
    }
}

/// An isolated node learns same-realm endpoints from the segment and leafs
/// onto them.
#[tokio::test]
async fn test_isolated_node_discovers_and_links() {
    let net = SimNet::new();
    let seed = net.add_node("seed", test_config("seed"));
    let mut foreign = test_config("foreign");
    foreign.node.realm = "elsewhere".into();
    let foreign = net.add_node("foreign", foreign);

    let mut config = test_config("lonely");
    config.discovery.enabled = true;
    let segment = Arc::new(Segment {
        registries: vec![seed.registry.clone(), foreign.registry.clone()],
    });
    let lonely = net.add_node_with("lonely", config, Some(segment));
    net.start(&seed);
    net.start(&lonely);

    assert!(
        eventually(Duration::from_secs(2), || {
            lonely.ctx.remote_tas().iter().any(|t| t.as_str() == "sim://seed")
        })
        .await,
        "seed never discovered"
    );
    assert!(lonely
        .ctx
        .remote_tas()
        .iter()
        .all(|t| t.as_str() != "sim://foreign"));

    assert!(
        eventually(Duration::from_secs(3), || {
            lonely.table().contains(ConnectionType::Leaf, &seed.address())
        })
        .await,
        "leaf to discovered seed never came up"
    );

    net.stop_all();
}

#[tokio::test]
async fn test_local_info_answers_through_registry() {
    let net = SimNet::new();
    let node = net.add_node("solo", test_config("solo"));
    let value = node
        .registry
        .dispatch(&RpcCaller::default(), DISCOVERY_METHOD, Value::Null)
        .unwrap();
    let reply: DiscoveryReply = serde_json::from_value(value).unwrap();
    assert_eq!(reply.address, node.address());
    assert_eq!(reply.namespace, node.ctx.realm);
    assert_eq!(reply.tas[0].as_str(), "sim://solo");
}

/// Real multicast over loopback. Skips where the host does not allow it.
#[tokio::test]
async fn test_multicast_round_trip_on_loopback() {
    let Ok(index) = if_index("lo") else {
        eprintln!("SKIP: no loopback interface");
        return;
    };
    let net = SimNet::new();
    let node = net.add_node("mcast", test_config("mcast"));

    let discovery = Arc::new(MulticastDiscovery::new(index, 47_411, Duration::from_millis(300)));
    let (tx, rx) = broadcast::channel(1);
    let responder = discovery.clone();
    let registry = node.registry.clone();
    let task = tokio::spawn(async move { responder.respond_loop(registry, rx).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut replies = discovery.query(DiscoveryQuery::default());
    let mut seen = Vec::new();
    while let Some(reply) = replies.recv().await {
        seen.push(reply);
    }
    let _ = tx.send(());
    let _ = task.await;

    if seen.is_empty() {
        eprintln!("SKIP: multicast not available on loopback");
        return;
    }
    assert!(seen.iter().all(|r| r.address == node.address()));
    assert_eq!(seen[0].namespace, node.ctx.realm);
}
