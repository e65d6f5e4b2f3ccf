use crate::*;

use ringmesh_overlay::overlord::ConnectionOverlord;

fn joiner_config(name: &str, seed: &str) -> OverlayConfig {
    let mut config = test_config(name);
    config.network.remote_tas = vec![format!("sim://{seed}")];
    config
}

/// A fresh node leafs onto its seed and then gets an unstructured link by
/// walking through that leaf.
#[tokio::test]
async fn test_join_bootstraps_leaf_then_unstructured() {
    let net = SimNet::new();
    let seed = net.add_node("seed", test_config("seed"));
    let joiner = net.add_node("joiner", joiner_config("joiner", "seed"));
    net.start(&seed);
    net.start(&joiner);

    assert!(
        eventually(Duration::from_secs(3), || joiner.table().count(ConnectionType::Leaf) == 1).await,
        "leaf link never came up"
    );
    assert!(seed.table().contains(ConnectionType::Leaf, &joiner.address()));

    assert!(
        eventually(Duration::from_secs(3), || {
            joiner.table().contains(ConnectionType::Unstructured, &seed.address())
        })
        .await,
        "unstructured link never came up"
    );
    assert!(seed.table().contains(ConnectionType::Unstructured, &joiner.address()));
    assert!(joiner.node.unstructured().desired() >= 2);

    net.stop_all();
}

/// Losing links never lowers the unstructured target.
#[tokio::test]
async fn test_unstructured_target_survives_link_loss() {
    let net = SimNet::new();
    let seed = net.add_node("seed", test_config("seed"));
    let joiner = net.add_node("joiner", joiner_config("joiner", "seed"));
    net.start(&seed);
    net.start(&joiner);

    assert!(
        eventually(Duration::from_secs(3), || joiner.node.unstructured().current() >= 1).await
    );
    let before = joiner.node.unstructured().desired();

    for c in joiner.table().connections(ConnectionType::Unstructured) {
        net.disconnect(c.edge_id());
    }
    assert!(
        eventually(Duration::from_secs(1), || {
            joiner.table().count(ConnectionType::Unstructured) == 0
                || joiner.node.unstructured().current() >= 1
        })
        .await
    );
    assert!(joiner.node.unstructured().desired() >= before);

    net.stop_all();
}

/// With five leaf links already up, a sixth makes the node close exactly
/// one of the older ones.
#[tokio::test]
async fn test_leaf_overshoot_closes_one_older_link() {
    let net = SimNet::new();
    let hub = net.add_node("hub", test_config("hub"));
    let spokes: Vec<_> = (0..6)
        .map(|i| {
            let name = format!("leaf-{i}");
            net.add_node(&name, test_config(&name))
        })
        .collect();
    for s in &spokes[..5] {
        net.connect(hub.address(), s.address(), "leaf").unwrap();
    }
    net.start(&hub);
    // let the run loop subscribe before the sixth link arrives
    assert!(eventually(Duration::from_secs(1), || hub.node.leaf().is_active()).await);

    let newest = spokes[5].address();
    net.connect(hub.address(), newest, "leaf").unwrap();

    assert!(
        eventually(Duration::from_secs(2), || hub.table().count(ConnectionType::Leaf) == 5).await,
        "no leaf was closed"
    );
    assert!(hub.table().contains(ConnectionType::Leaf, &newest));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hub.table().count(ConnectionType::Leaf), 5);

    net.stop_all();
}
