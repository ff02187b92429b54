//! Two-cluster fixtures for the scenario tests
//!
//! A `TestCluster` is an in-memory API server plus a factory over it. The
//! `install_*` helpers register reactors standing in for the controllers that
//! react to what liqoctl writes: nonce generation, nonce signing, credential
//! issuing, CIDR remapping, gateway key generation and slice admission.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{ConfigMap, Pod, PodCondition, PodStatus, Secret};
use k8s_openapi::ByteString;
use liqo_common::crd::{
    AuthParams, Configuration, ConfigurationStatus, Connection, ConnectionSpec,
    ConnectionStatus, ConnectionStatusValue, EndpointStatus, GatewayClient,
    GatewayClientStatus, GatewayServer, GatewayServerStatus, Identity, IdentityStatus,
    LocalObjectReference, Network, NetworkSpec, NetworkType, ObjectRef, ResourceSlice,
    ResourceSliceCondition, ResourceSliceConditionStatus, ResourceSliceConditionType,
    ResourceSliceStatus, Tenant, TenantStatus, WgGatewayClientTemplate,
    WgGatewayClientTemplateSpec, WgGatewayServerTemplate, WgGatewayServerTemplateSpec,
};
use liqo_common::kube_utils::secret_data;
use liqo_common::tenant_namespace::tenant_namespace_name;
use liqo_common::testing::FakeCluster;
use liqo_common::{
    OpContext, AUTH_KEYS_PRIVATE_KEY_FIELD, AUTH_KEYS_PUBLIC_KEY_FIELD, AUTH_KEYS_SECRET_NAME,
    CLUSTER_ID_CONFIGMAP_KEY, CLUSTER_ID_CONFIGMAP_NAME, DEFAULT_LIQO_NAMESPACE,
    GATEWAY_COMPONENT_LABEL, GATEWAY_COMPONENT_VALUE, GATEWAY_PUBLIC_KEY_FIELD,
    NETWORK_TYPE_LABEL, NONCE_SECRET_FIELD, NONCE_SECRET_LABEL, REMOTE_CLUSTER_ID_LABEL,
    SIGNED_NONCE_SECRET_FIELD, SIGNED_NONCE_SECRET_LABEL,
};
use liqoctl::config::ClusterScope;
use liqoctl::factory::Factory;
use liqoctl::wait::Waiter;

pub const CLUSTER_A: &str = "cluster-a";
pub const CLUSTER_B: &str = "cluster-b";

const SERVER_KEY_SECRET: &str = "gateway-server-keys";
const CLIENT_KEY_SECRET: &str = "gateway-client-keys";

// =============================================================================
// Clusters
// =============================================================================

pub struct TestCluster {
    pub id: String,
    pub fake: Arc<FakeCluster>,
    pub factory: Factory,
}

impl TestCluster {
    /// Waiter polling every few milliseconds
    pub fn waiter(&self) -> Waiter {
        Waiter::with_resources(self.fake.resources(), self.factory.scope_label())
            .with_interval(Duration::from_millis(5))
    }
}

/// A cluster with its ID published in the cluster-ID ConfigMap
pub fn cluster(id: &str, scope: ClusterScope) -> TestCluster {
    let fake = Arc::new(FakeCluster::new());
    let mut cm = ConfigMap::default();
    cm.metadata.name = Some(CLUSTER_ID_CONFIGMAP_NAME.into());
    cm.metadata.namespace = Some(DEFAULT_LIQO_NAMESPACE.into());
    cm.data = Some(BTreeMap::from([(
        CLUSTER_ID_CONFIGMAP_KEY.to_string(),
        id.to_string(),
    )]));
    fake.insert(cm);
    let factory = Factory::with_store(scope, fake.clone());
    TestCluster {
        id: id.to_string(),
        fake,
        factory,
    }
}

/// cluster-a as the local consumer, cluster-b as the remote provider
pub fn pair() -> (TestCluster, TestCluster) {
    (
        cluster(CLUSTER_A, ClusterScope::Local),
        cluster(CLUSTER_B, ClusterScope::Remote),
    )
}

pub fn ctx() -> OpContext {
    OpContext::with_timeout(Duration::from_secs(10))
}

pub fn remote_labels(remote_cluster_id: &str) -> Option<BTreeMap<String, String>> {
    Some(BTreeMap::from([(
        REMOTE_CLUSTER_ID_LABEL.to_string(),
        remote_cluster_id.to_string(),
    )]))
}

fn has_label(labels: &Option<BTreeMap<String, String>>, key: &str) -> bool {
    labels
        .as_ref()
        .is_some_and(|l| l.get(key).map(String::as_str) == Some("true"))
}

// =============================================================================
// Authentication controllers
// =============================================================================

/// Provider side: nonces are generated, Tenants get credentials
pub fn install_provider_auth(tc: &TestCluster) {
    let provider_id = tc.id.clone();
    tc.fake.on_write::<Secret>(|s| {
        if has_label(&s.metadata.labels, NONCE_SECRET_LABEL)
            && secret_data(s, NONCE_SECRET_FIELD).is_none()
        {
            s.data.get_or_insert_with(Default::default).insert(
                NONCE_SECRET_FIELD.to_string(),
                ByteString(b"nonce-0123456789".to_vec()),
            );
        }
    });
    tc.fake.on_write::<Tenant>(move |t| {
        if t.is_status_filled() {
            return;
        }
        t.status = Some(TenantStatus {
            auth_params: Some(AuthParams {
                ca: Some(ByteString(b"ca".to_vec())),
                signed_crt: Some(ByteString(b"crt".to_vec())),
                api_server: format!("https://{}.example:6443", provider_id),
                proxy_url: t.spec.proxy_url.clone(),
            }),
            tenant_namespace: t.metadata.namespace.clone().unwrap_or_default(),
        });
    });
}

/// Consumer side: an authentication key pair, nonces get signed, Identities
/// get a kubeconfig
pub fn install_consumer_auth(tc: &TestCluster) {
    let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519).expect("key pair");
    let mut keys = Secret::default();
    keys.metadata.name = Some(AUTH_KEYS_SECRET_NAME.into());
    keys.metadata.namespace = Some(DEFAULT_LIQO_NAMESPACE.into());
    keys.data = Some(BTreeMap::from([
        (
            AUTH_KEYS_PRIVATE_KEY_FIELD.to_string(),
            ByteString(key.serialize_pem().into_bytes()),
        ),
        (
            AUTH_KEYS_PUBLIC_KEY_FIELD.to_string(),
            ByteString(key.public_key_raw().to_vec()),
        ),
    ]));
    tc.fake.insert(keys);

    tc.fake.on_write::<Secret>(|s| {
        if !has_label(&s.metadata.labels, SIGNED_NONCE_SECRET_LABEL)
            || secret_data(s, SIGNED_NONCE_SECRET_FIELD).is_some()
        {
            return;
        }
        if let Some(nonce) = secret_data(s, NONCE_SECRET_FIELD) {
            let mut signature = b"signed:".to_vec();
            signature.extend(nonce);
            s.data
                .get_or_insert_with(Default::default)
                .insert(SIGNED_NONCE_SECRET_FIELD.to_string(), ByteString(signature));
        }
    });
    tc.fake.on_write::<Identity>(|i| {
        let name = format!("kubeconfig-{}", i.metadata.name.as_deref().unwrap_or_default());
        i.status = Some(IdentityStatus {
            kubeconfig_secret_ref: Some(LocalObjectReference { name }),
        });
    });
}

// =============================================================================
// Network controllers
// =============================================================================

fn network(network_type: NetworkType, cidr: &str) -> Network {
    let name = network_type.label_value();
    let mut net = Network::new(name, NetworkSpec { cidr: cidr.into() });
    net.metadata.namespace = Some(DEFAULT_LIQO_NAMESPACE.into());
    net.metadata.labels = Some(BTreeMap::from([(
        NETWORK_TYPE_LABEL.to_string(),
        name.to_string(),
    )]));
    net
}

/// Pod and external CIDRs in the Liqo namespace
pub fn install_networks(tc: &TestCluster, pod: &str, external: &str) {
    tc.fake.insert(network(NetworkType::PodCidr, pod));
    tc.fake.insert(network(NetworkType::ExternalCidr, external));
}

/// Configurations get remapped CIDRs (identity remapping)
pub fn install_configuration_controller(tc: &TestCluster) {
    tc.fake.on_write::<Configuration>(|c| {
        c.status = Some(ConfigurationStatus {
            remote: Some(c.spec.remote.clone()),
            ..Default::default()
        });
    });
}

/// Everything a gateway towards `remote_cluster_id` produces once running:
/// endpoint, key secret, ready pod and an established connection. The
/// gateway templates are installed as well.
pub fn install_gateway_controller(tc: &TestCluster, remote_cluster_id: &str) {
    let namespace = tenant_namespace_name(remote_cluster_id);

    tc.fake.on_write::<GatewayServer>(|gs| {
        gs.status = Some(GatewayServerStatus {
            endpoint: Some(EndpointStatus {
                addresses: vec!["172.18.0.10".into()],
                port: gs.spec.endpoint.port,
                protocol: Some("UDP".into()),
            }),
            secret_ref: Some(ObjectRef {
                name: SERVER_KEY_SECRET.into(),
                ..Default::default()
            }),
        });
    });
    tc.fake.on_write::<GatewayClient>(|gc| {
        gc.status = Some(GatewayClientStatus {
            secret_ref: Some(ObjectRef {
                name: CLIENT_KEY_SECRET.into(),
                ..Default::default()
            }),
        });
    });

    for (name, key) in [
        (SERVER_KEY_SECRET, format!("server-key-of-{}", tc.id)),
        (CLIENT_KEY_SECRET, format!("client-key-of-{}", tc.id)),
    ] {
        let mut secret = Secret::default();
        secret.metadata.name = Some(name.into());
        secret.metadata.namespace = Some(namespace.clone());
        secret.data = Some(BTreeMap::from([(
            GATEWAY_PUBLIC_KEY_FIELD.to_string(),
            ByteString(key.into_bytes()),
        )]));
        tc.fake.insert(secret);
    }

    let mut pod = Pod::default();
    pod.metadata.name = Some(format!("gateway-{}", remote_cluster_id));
    pod.metadata.namespace = Some(namespace.clone());
    pod.metadata.labels = Some(BTreeMap::from([
        (GATEWAY_COMPONENT_LABEL.to_string(), GATEWAY_COMPONENT_VALUE.to_string()),
        (REMOTE_CLUSTER_ID_LABEL.to_string(), remote_cluster_id.to_string()),
    ]));
    pod.status = Some(PodStatus {
        conditions: Some(vec![PodCondition {
            type_: "Ready".into(),
            status: "True".into(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    tc.fake.insert(pod);

    let mut conn = Connection::new(remote_cluster_id, ConnectionSpec::default());
    conn.metadata.namespace = Some(namespace);
    conn.metadata.labels = remote_labels(remote_cluster_id);
    conn.status = Some(ConnectionStatus {
        value: ConnectionStatusValue::Connected,
    });
    tc.fake.insert(conn);

    let mut server_template = WgGatewayServerTemplate::new(
        "wireguard-server",
        WgGatewayServerTemplateSpec::default(),
    );
    server_template.metadata.namespace = Some(DEFAULT_LIQO_NAMESPACE.into());
    tc.fake.insert(server_template);
    let mut client_template = WgGatewayClientTemplate::new(
        "wireguard-client",
        WgGatewayClientTemplateSpec::default(),
    );
    client_template.metadata.namespace = Some(DEFAULT_LIQO_NAMESPACE.into());
    tc.fake.insert(client_template);
}

// =============================================================================
// Offloading controllers
// =============================================================================

/// ResourceSlices are accepted by the provider
pub fn install_slice_admission(tc: &TestCluster) {
    tc.fake.on_write::<ResourceSlice>(|rs| {
        rs.status = Some(ResourceSliceStatus {
            conditions: vec![ResourceSliceCondition {
                type_: ResourceSliceConditionType::Authentication,
                status: ResourceSliceConditionStatus::Accepted,
                message: None,
            }],
        });
    });
}

/// A fully equipped consumer/provider pair, ready for `liqoctl peer`
pub fn peering_ready_pair() -> (TestCluster, TestCluster) {
    let (a, b) = pair();
    install_networks(&a, "10.0.0.0/16", "10.70.0.0/16");
    install_networks(&b, "10.1.0.0/16", "10.71.0.0/16");
    install_configuration_controller(&a);
    install_configuration_controller(&b);
    install_gateway_controller(&a, CLUSTER_B);
    install_gateway_controller(&b, CLUSTER_A);
    install_consumer_auth(&a);
    install_provider_auth(&b);
    install_slice_admission(&a);
    (a, b)
}
