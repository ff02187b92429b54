//! Teardown stories: unpeer, unauthenticate and force unpeer
//!
//! Every story starts from a completed `liqoctl peer` between cluster-a
//! (consumer) and cluster-b (provider).

use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use liqo_common::crd::{
    Configuration, ForeignCluster, ForeignClusterSpec, ForeignClusterStatus, GatewayClient,
    GatewayServer, Identity, PeeringRole, ResourceSlice, Tenant,
};
use liqo_common::testing::Verb;
use liqo_common::{Error, OpContext, PERMANENTLY_UNREACHABLE_ANNOTATION};
use liqoctl::commands::{force_unpeer, peer, unauthenticate, unpeer};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::helpers::{ctx, peering_ready_pair, remote_labels, TestCluster};

async fn peered() -> (TestCluster, TestCluster) {
    let (a, b) = peering_ready_pair();
    peer::Options::new(&a.factory, &b.factory)
        .run(&ctx())
        .await
        .unwrap();
    (a, b)
}

fn foreign_cluster(id: &str, role: PeeringRole) -> ForeignCluster {
    let mut fc = ForeignCluster::new(
        id,
        ForeignClusterSpec {
            cluster_id: id.to_string(),
        },
    );
    fc.metadata.labels = remote_labels(id);
    fc.status = Some(ForeignClusterStatus {
        role,
        ..Default::default()
    });
    fc
}

fn unpeer_options<'a>(a: &'a TestCluster, b: &'a TestCluster, delete_namespaces: bool) -> unpeer::Options<'a> {
    unpeer::Options {
        local: &a.factory,
        remote: &b.factory,
        delete_namespaces,
        wait: true,
    }
}

// =============================================================================
// Peer and unpeer
// =============================================================================

/// Story: a full peering is created and then removed without leaving
/// anything behind on either cluster
#[tokio::test]
async fn story_peer_then_unpeer_leaves_nothing_behind() {
    let (a, b) = peered().await;

    assert_eq!(a.fake.list::<ResourceSlice>(Some("liqo-tenant-cluster-b")).len(), 1);
    assert_eq!(a.fake.list::<Identity>(None).len(), 1);
    assert_eq!(b.fake.list::<Tenant>(None).len(), 1);
    assert_eq!(b.fake.list::<GatewayServer>(None).len(), 1);

    unpeer_options(&a, &b, true).run(&ctx()).await.unwrap();

    assert!(a.fake.list::<ResourceSlice>(None).is_empty());
    assert!(a.fake.list::<Identity>(None).is_empty());
    assert!(a.fake.list::<GatewayClient>(None).is_empty());
    assert!(a.fake.list::<Configuration>(None).is_empty());
    assert!(a.fake.list::<Namespace>(None).is_empty());

    assert!(b.fake.list::<Tenant>(None).is_empty());
    assert!(b.fake.list::<GatewayServer>(None).is_empty());
    assert!(b.fake.list::<Configuration>(None).is_empty());
    assert!(b.fake.list::<Namespace>(None).is_empty());
}

/// Story: with a bidirectional peering, deleting the tenant namespaces is
/// refused before anything is touched
#[tokio::test]
async fn story_bidirectional_namespace_deletion_is_refused() {
    let (a, b) = peered().await;
    a.fake
        .insert(foreign_cluster("cluster-b", PeeringRole::ConsumerAndProvider));
    a.fake.clear_ops();
    b.fake.clear_ops();

    let err = unpeer_options(&a, &b, true).run(&ctx()).await.unwrap_err();

    assert!(matches!(err.liqo(), Some(Error::Precondition { .. })));
    assert!(a.fake.ops().is_empty());
    assert!(b.fake.ops().is_empty());
}

/// Story: unpeering one direction of a bidirectional peering keeps the
/// network the reverse direction still needs
#[tokio::test]
async fn story_bidirectional_unpeer_keeps_networking() {
    let (a, b) = peered().await;
    a.fake
        .insert(foreign_cluster("cluster-b", PeeringRole::ConsumerAndProvider));

    unpeer_options(&a, &b, false).run(&ctx()).await.unwrap();

    assert!(a.fake.list::<ResourceSlice>(None).is_empty());
    assert!(a.fake.list::<Identity>(None).is_empty());
    assert!(b.fake.list::<Tenant>(None).is_empty());

    assert_eq!(a.fake.list::<Configuration>(None).len(), 1);
    assert_eq!(a.fake.list::<GatewayClient>(None).len(), 1);
    assert_eq!(b.fake.list::<GatewayServer>(None).len(), 1);
}

/// Story: the slice controller takes a while to release the ResourceSlice;
/// a plain unpeer waits for it instead of tripping over its own leftovers
#[tokio::test]
async fn story_unpeer_outlasts_a_slow_slice_finalizer() {
    let (a, b) = peered().await;
    let ns = "liqo-tenant-cluster-b";
    assert!(a.fake.mutate::<ResourceSlice>(Some(ns), "cluster-b", |rs| {
        rs.metadata.finalizers = Some(vec!["resourceslice.liqo.io/finalizer".into()]);
    }));

    let fake = a.fake.clone();
    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        fake.finalize::<ResourceSlice>(Some(ns), "cluster-b")
    });

    unpeer::Options {
        local: &a.factory,
        remote: &b.factory,
        delete_namespaces: false,
        wait: false,
    }
    .run(&ctx())
    .await
    .unwrap();

    assert!(release.await.unwrap());
    assert!(a.fake.list::<ResourceSlice>(None).is_empty());
    assert!(a.fake.list::<Identity>(None).is_empty());
    assert!(b.fake.list::<Tenant>(None).is_empty());
    assert!(a.fake.list::<Configuration>(None).is_empty());
}

/// Story: Ctrl-C while the network is being torn down stops before the
/// provider side is touched
#[tokio::test]
async fn story_interrupted_unpeer_stops_mid_teardown() {
    let (a, b) = peered().await;
    let ctx = ctx();
    let token = ctx.cancellation_token().clone();
    a.fake
        .on::<GatewayClient>(&[Verb::Delete], move |_| token.cancel());
    b.fake.clear_ops();

    let err = unpeer::Options {
        local: &a.factory,
        remote: &b.factory,
        delete_namespaces: false,
        wait: false,
    }
    .run(&ctx)
    .await
    .unwrap_err();

    assert!(matches!(err.liqo(), Some(Error::Canceled { .. })), "{err}");
    assert!(err.phases().contains(&"networking"));
    assert!(a.fake.list::<GatewayClient>(None).is_empty());
    assert_eq!(b.fake.list::<GatewayServer>(None).len(), 1);
    assert_eq!(a.fake.list::<Configuration>(None).len(), 1);
    assert_eq!(b.fake.list::<Configuration>(None).len(), 1);
    assert!(b.fake.ops_on("GatewayServer").is_empty());
}

// =============================================================================
// Unauthenticate
// =============================================================================

/// Story: unauthenticating while ResourceSlices still exist is refused on
/// both clusters
#[tokio::test]
async fn story_unauthenticate_refuses_with_live_slices() {
    let (a, b) = peered().await;
    a.fake.clear_ops();
    b.fake.clear_ops();

    let err = unauthenticate::Options {
        consumer: &a.factory,
        provider: &b.factory,
        wait: false,
    }
    .run(&ctx())
    .await
    .unwrap_err();

    match err.liqo() {
        Some(Error::Precondition { message }) => {
            assert!(message.contains("liqo-tenant-cluster-b/cluster-b"))
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(a.fake.ops().is_empty());
    assert!(b.fake.ops().is_empty());
    assert_eq!(a.fake.list::<Identity>(None).len(), 1);
    assert_eq!(b.fake.list::<Tenant>(None).len(), 1);
}

// =============================================================================
// Force unpeer
// =============================================================================

/// Story: the provider is gone for good; the consumer cleans up on its own
/// without a single call to the remote cluster
#[tokio::test]
async fn story_force_unpeer_stays_local() {
    let (a, b) = peered().await;
    a.fake.insert(foreign_cluster("cluster-b", PeeringRole::Provider));
    b.fake.clear_ops();

    force_unpeer::Options {
        local: &a.factory,
        remote_cluster_id: "cluster-b".into(),
        wait: true,
    }
    .run(&ctx())
    .await
    .unwrap();

    let fc: ForeignCluster = a.fake.get(None, "cluster-b").unwrap();
    let annotations = fc.metadata.annotations.unwrap_or_default();
    assert_eq!(
        annotations
            .get(PERMANENTLY_UNREACHABLE_ANNOTATION)
            .map(String::as_str),
        Some("true")
    );
    assert!(a.fake.get::<Namespace>(None, "liqo-tenant-cluster-b").is_none());
    assert!(b.fake.ops().is_empty());
}

// =============================================================================
// Deadlines
// =============================================================================

/// Story: an already expired deadline stops the command before any call
#[tokio::test]
async fn story_expired_deadline_fails_fast() {
    let (a, b) = peered().await;
    a.fake.clear_ops();
    b.fake.clear_ops();

    let err = unpeer_options(&a, &b, false)
        .run(&OpContext::with_timeout(Duration::ZERO))
        .await
        .unwrap_err();

    assert!(err.liqo().is_some_and(|e| e.is_timeout()));
    assert!(a.fake.ops().is_empty());
    assert!(b.fake.ops().is_empty());
}

/// Story: Ctrl-C during a command surfaces as a cancellation
#[tokio::test]
async fn story_cancelled_context_is_reported() {
    let (a, b) = peered().await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let ctx = OpContext::with_deadline(Instant::now() + Duration::from_secs(10), cancel);

    let err = unpeer_options(&a, &b, false).run(&ctx).await.unwrap_err();

    assert!(matches!(err.liqo(), Some(Error::Canceled { .. })));
    assert_eq!(a.fake.list::<Identity>(None).len(), 1);
}
