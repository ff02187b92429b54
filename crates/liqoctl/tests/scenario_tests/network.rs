//! Networking stories
//!
//! cluster-a hosts the gateway client, cluster-b the gateway server.

use std::time::Duration;

use liqo_common::crd::{Configuration, GatewayClient, GatewayServer, PublicKey};
use liqo_common::OpContext;
use liqoctl::commands::network;

use super::helpers::{
    ctx, install_configuration_controller, install_gateway_controller, install_networks, pair,
    peering_ready_pair, CLUSTER_A,
};

/// Story: connecting two clusters exchanges the CIDR configurations, brings
/// up one gateway on each side and swaps their tunnel keys
#[tokio::test]
async fn story_connect_brings_up_the_tunnel() {
    let (a, b) = peering_ready_pair();
    let mut opts = network::Options::new(&a.factory, &b.factory);
    opts.wait = true;

    opts.run_connect(&ctx()).await.unwrap();

    // Each side describes the peer's CIDRs
    let on_a: Configuration = a.fake.get(Some("liqo-tenant-cluster-b"), "cluster-b").unwrap();
    assert_eq!(on_a.spec.remote.cidr.pod, vec!["10.1.0.0/16".to_string()]);
    assert_eq!(on_a.spec.remote.cidr.external, vec!["10.71.0.0/16".to_string()]);
    let on_b: Configuration = b.fake.get(Some("liqo-tenant-cluster-a"), "cluster-a").unwrap();
    assert_eq!(on_b.spec.remote.cidr.pod, vec!["10.0.0.0/16".to_string()]);

    // Server on cluster-b, client on cluster-a pointed at its endpoint
    let servers: Vec<GatewayServer> = b.fake.list(Some("liqo-tenant-cluster-a"));
    assert_eq!(servers.len(), 1);
    let clients: Vec<GatewayClient> = a.fake.list(Some("liqo-tenant-cluster-b"));
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].spec.remote_endpoint.addresses, vec!["172.18.0.10".to_string()]);
    assert!(b.fake.list::<GatewayClient>(None).is_empty());
    assert!(a.fake.list::<GatewayServer>(None).is_empty());

    // Keys crossed over
    let key_on_a: PublicKey = a.fake.get(Some("liqo-tenant-cluster-b"), "cluster-b").unwrap();
    assert_eq!(key_on_a.spec.public_key.0, b"server-key-of-cluster-b".to_vec());
    let key_on_b: PublicKey = b.fake.get(Some("liqo-tenant-cluster-a"), "cluster-a").unwrap();
    assert_eq!(key_on_b.spec.public_key.0, b"client-key-of-cluster-a".to_vec());
}

/// Story: connecting an already connected pair touches no gateway
#[tokio::test]
async fn story_reconnect_is_a_noop() {
    let (a, b) = peering_ready_pair();
    let mut opts = network::Options::new(&a.factory, &b.factory);
    opts.wait = true;
    opts.run_connect(&ctx()).await.unwrap();
    a.fake.clear_ops();
    b.fake.clear_ops();

    opts.run_connect(&ctx()).await.unwrap();

    assert!(a.fake.ops_on("GatewayClient").is_empty());
    assert!(b.fake.ops_on("GatewayServer").is_empty());
    assert!(a.fake.ops_on("PublicKey").is_empty());
}

/// Story: when the network controllers never remap the CIDRs, connect gives
/// up at the deadline without creating any gateway
#[tokio::test]
async fn story_unanswered_configuration_times_out() {
    let (a, b) = pair();
    install_networks(&a, "10.0.0.0/16", "10.70.0.0/16");
    install_networks(&b, "10.1.0.0/16", "10.71.0.0/16");
    let opts = network::Options::new(&a.factory, &b.factory);

    let err = opts
        .run_connect(&OpContext::with_timeout(Duration::from_millis(200)))
        .await
        .unwrap_err();

    assert!(err.liqo().is_some_and(|e| e.is_timeout()));
    assert!(b.fake.ops_on("GatewayServer").is_empty());
    assert!(a.fake.ops_on("GatewayClient").is_empty());
}

/// Story: only the provider's network controller answers; one confirmed
/// side is not enough to start creating gateways
#[tokio::test]
async fn story_one_sided_configuration_blocks_the_gateways() {
    let (a, b) = pair();
    install_networks(&a, "10.0.0.0/16", "10.70.0.0/16");
    install_networks(&b, "10.1.0.0/16", "10.71.0.0/16");
    install_configuration_controller(&b);
    install_gateway_controller(&b, CLUSTER_A);
    let opts = network::Options::new(&a.factory, &b.factory);

    let err = opts
        .run_connect(&OpContext::with_timeout(Duration::from_millis(200)))
        .await
        .unwrap_err();

    assert!(err.liqo().is_some_and(|e| e.is_timeout()));
    assert_eq!(err.phases(), vec!["wait for configuration"]);
    let on_b: Configuration = b.fake.get(Some("liqo-tenant-cluster-a"), "cluster-a").unwrap();
    assert!(on_b.status.and_then(|s| s.remote).is_some());
    let on_a: Configuration = a.fake.get(Some("liqo-tenant-cluster-b"), "cluster-b").unwrap();
    assert!(on_a.status.and_then(|s| s.remote).is_none());
    assert!(b.fake.ops_on("GatewayServer").is_empty());
    assert!(b.fake.list::<GatewayServer>(None).is_empty());
    assert!(a.fake.ops_on("GatewayClient").is_empty());
}

/// Story: disconnect removes the gateways but keeps the configurations;
/// reset removes those too
#[tokio::test]
async fn story_disconnect_then_reset() {
    let (a, b) = peering_ready_pair();
    let mut opts = network::Options::new(&a.factory, &b.factory);
    opts.wait = true;
    opts.run_connect(&ctx()).await.unwrap();

    opts.run_disconnect(&ctx()).await.unwrap();
    assert!(a.fake.list::<GatewayClient>(None).is_empty());
    assert!(b.fake.list::<GatewayServer>(None).is_empty());
    assert_eq!(a.fake.list::<Configuration>(None).len(), 1);
    assert_eq!(b.fake.list::<Configuration>(None).len(), 1);

    opts.run_reset(&ctx()).await.unwrap();
    assert!(a.fake.list::<Configuration>(None).is_empty());
    assert!(b.fake.list::<Configuration>(None).is_empty());
}

/// Story: a cluster without IPAM networks is reported as not running Liqo
#[tokio::test]
async fn story_missing_networks_are_a_precondition() {
    let (a, b) = pair();
    let err = network::Options::new(&a.factory, &b.factory)
        .run_init(&ctx())
        .await
        .unwrap_err();

    assert!(matches!(
        err.liqo(),
        Some(liqo_common::Error::Precondition { .. })
    ));
    assert!(err.phases().contains(&"forge configuration"));
}
