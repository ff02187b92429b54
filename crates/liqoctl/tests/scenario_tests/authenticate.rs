//! Authentication stories
//!
//! A consumer (cluster-a) obtains a control-plane identity from a provider
//! (cluster-b) through the nonce handshake.

use k8s_openapi::api::core::v1::{Namespace, Secret};
use liqo_common::crd::{Identity, IdentityType, Tenant, TenantCondition};
use liqo_common::testing::Verb;
use liqo_common::{Error, NONCE_SECRET_LABEL, REMOTE_CLUSTER_ID_LABEL, SIGNED_NONCE_SECRET_FIELD};
use liqoctl::commands::authenticate::{self, Cluster};
use liqoctl::commands::tenant::set_tenant_condition;

use super::helpers::{ctx, install_consumer_auth, install_provider_auth, pair, TestCluster};

fn options<'a>(consumer: &'a TestCluster, provider: &'a TestCluster) -> authenticate::Options<'a> {
    authenticate::Options {
        consumer: &consumer.factory,
        provider: &provider.factory,
        in_band: false,
        proxy_url: None,
    }
}

async fn authenticate(consumer: &TestCluster, provider: &TestCluster) -> liqoctl::Result<()> {
    options(consumer, provider)
        .run_with(
            &ctx(),
            Cluster::with_waiter(&consumer.factory, consumer.waiter()),
            Cluster::with_waiter(&provider.factory, provider.waiter()),
        )
        .await
}

fn auth_ready_pair() -> (TestCluster, TestCluster) {
    let (a, b) = pair();
    install_consumer_auth(&a);
    install_provider_auth(&b);
    (a, b)
}

// =============================================================================
// Handshake
// =============================================================================

/// Story: cluster-a authenticates towards cluster-b and ends up holding a
/// control-plane Identity, while cluster-b keeps a Tenant for cluster-a
#[tokio::test]
async fn story_consumer_obtains_control_plane_identity() {
    let (a, b) = auth_ready_pair();

    authenticate(&a, &b).await.unwrap();

    // Tenant namespaces are named after the peer
    assert!(a.fake.get::<Namespace>(None, "liqo-tenant-cluster-b").is_some());
    assert!(b.fake.get::<Namespace>(None, "liqo-tenant-cluster-a").is_some());

    // The provider generated the nonce for cluster-a
    let nonces: Vec<Secret> = b.fake.list(Some("liqo-tenant-cluster-a"));
    let nonce = nonces
        .iter()
        .find(|s| {
            s.metadata
                .labels
                .as_ref()
                .is_some_and(|l| l.contains_key(NONCE_SECRET_LABEL))
        })
        .expect("nonce secret");
    let labels = nonce.metadata.labels.clone().unwrap_or_default();
    assert_eq!(
        labels.get(REMOTE_CLUSTER_ID_LABEL).map(String::as_str),
        Some("cluster-a")
    );

    // The consumer signed it
    let signed: Vec<Secret> = a.fake.list(Some("liqo-tenant-cluster-b"));
    assert!(signed.iter().any(|s| s
        .data
        .as_ref()
        .is_some_and(|d| d.contains_key(SIGNED_NONCE_SECRET_FIELD))));

    // Exactly one Tenant, active, with credentials
    let tenants: Vec<Tenant> = b.fake.list(None);
    assert_eq!(tenants.len(), 1);
    let tenant = &tenants[0];
    assert_eq!(tenant.spec.cluster_id, "cluster-a");
    assert_eq!(tenant.metadata.namespace.as_deref(), Some("liqo-tenant-cluster-a"));
    assert_eq!(tenant.spec.tenant_condition, None);
    assert!(tenant.spec.csr.is_some());
    assert!(tenant
        .status
        .as_ref()
        .is_some_and(|s| s.auth_params.is_some()));

    // Exactly one ControlPlane Identity, with its kubeconfig
    let identities: Vec<Identity> = a.fake.list(None);
    assert_eq!(identities.len(), 1);
    let identity = &identities[0];
    assert_eq!(identity.spec.type_, IdentityType::ControlPlane);
    assert_eq!(identity.spec.cluster_id, "cluster-b");
    assert_eq!(identity.spec.namespace.as_deref(), Some("liqo-tenant-cluster-a"));
    assert!(identity
        .status
        .as_ref()
        .and_then(|s| s.kubeconfig_secret_ref.as_ref())
        .is_some());
}

/// Story: an interrupted or repeated authentication converges without
/// duplicating anything
#[tokio::test]
async fn story_rerun_does_not_create_anything() {
    let (a, b) = auth_ready_pair();
    authenticate(&a, &b).await.unwrap();
    a.fake.clear_ops();
    b.fake.clear_ops();

    authenticate(&a, &b).await.unwrap();

    assert!(a.fake.ops_of_verb(Verb::Create).is_empty());
    assert!(b.fake.ops_of_verb(Verb::Create).is_empty());
    assert_eq!(b.fake.list::<Tenant>(None).len(), 1);
    assert_eq!(a.fake.list::<Identity>(None).len(), 1);
}

/// Story: a provider admin cordons the tenant; re-authenticating must not
/// silently lift the cordon
#[tokio::test]
async fn story_cordoned_tenant_stays_cordoned() {
    let (a, b) = auth_ready_pair();
    authenticate(&a, &b).await.unwrap();

    set_tenant_condition(&ctx(), &b.factory, "cluster-a", TenantCondition::Cordoned)
        .await
        .unwrap();
    authenticate(&a, &b).await.unwrap();

    let tenants: Vec<Tenant> = b.fake.list(None);
    assert_eq!(tenants.len(), 1);
    assert_eq!(tenants[0].spec.tenant_condition, Some(TenantCondition::Cordoned));
}

// =============================================================================
// Guards
// =============================================================================

/// Story: in-band authentication without networking is refused before the
/// handshake touches either cluster
#[tokio::test]
async fn story_in_band_without_networking_is_refused() {
    let (a, b) = auth_ready_pair();
    let mut opts = options(&a, &b);
    opts.in_band = true;

    let err = opts
        .run_with(
            &ctx(),
            Cluster::with_waiter(&a.factory, a.waiter()),
            Cluster::with_waiter(&b.factory, b.waiter()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err.liqo(), Some(Error::Precondition { .. })));
    assert!(a.fake.ops().is_empty());
    assert!(b.fake.ops().is_empty());
}

/// Story: without the local authentication keys the consumer cannot build
/// its Tenant, and the error names the failing phase
#[tokio::test]
async fn story_missing_auth_keys_fail_tenant_generation() {
    let (a, b) = pair();
    install_provider_auth(&b);
    // nonce signing without the key secret
    a.fake.on_write::<Secret>(|s| {
        let data = s.data.get_or_insert_with(Default::default);
        if data.contains_key("nonce") {
            data.entry(SIGNED_NONCE_SECRET_FIELD.to_string())
                .or_insert_with(|| k8s_openapi::ByteString(b"sig".to_vec()));
        }
    });

    let err = authenticate(&a, &b).await.unwrap_err();

    assert!(matches!(err.liqo(), Some(Error::Precondition { .. })));
    assert!(err.phases().contains(&"generate tenant"));
    assert!(b.fake.list::<Tenant>(None).is_empty());
}
