//! Label-selector lookups of peering resources.
//!
//! These are the single source of truth for "does X exist for this peer":
//! both the operation objects and the waiter go through them. A lookup
//! expected to be unique fails with `Ambiguous` on more than one match.

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use liqo_common::crd::{
    Configuration, Connection, ForeignCluster, GatewayClient, GatewayServer, Identity,
    IdentityType, Network, NetworkType, ResourceSlice, Tenant, VirtualNode,
};
use liqo_common::kube_utils::{label_selector, remote_cluster_selector};
use liqo_common::{
    Error, Resources, Result, CLUSTER_ID_CONFIGMAP_KEY, CLUSTER_ID_CONFIGMAP_NAME,
    IDENTITY_TYPE_LABEL, NETWORK_TYPE_LABEL, REMOTE_CLUSTER_ID_LABEL,
    REPLICATION_REQUESTED_LABEL,
};

/// Read this cluster's ID from the cluster ID ConfigMap
pub async fn get_cluster_id(resources: &Resources, liqo_namespace: &str) -> Result<String> {
    let cm: Option<ConfigMap> = resources
        .get(Some(liqo_namespace), CLUSTER_ID_CONFIGMAP_NAME)
        .await?;
    let cm = cm.ok_or_else(|| {
        Error::precondition(format!(
            "ConfigMap {}/{} not found: is Liqo installed?",
            liqo_namespace, CLUSTER_ID_CONFIGMAP_NAME
        ))
    })?;
    cm.data
        .as_ref()
        .and_then(|d| d.get(CLUSTER_ID_CONFIGMAP_KEY))
        .filter(|id| !id.is_empty())
        .cloned()
        .ok_or_else(|| {
            Error::precondition(format!(
                "ConfigMap {}/{} has no {} key",
                liqo_namespace, CLUSTER_ID_CONFIGMAP_NAME, CLUSTER_ID_CONFIGMAP_KEY
            ))
        })
}

/// The ForeignCluster describing `cluster_id`
pub async fn get_foreign_cluster_by_id(
    resources: &Resources,
    cluster_id: &str,
) -> Result<Option<ForeignCluster>> {
    resources
        .find_unique(None, &remote_cluster_selector(cluster_id), cluster_id)
        .await
}

/// The Tenant of consumer `cluster_id` (any namespace when `namespace` is `None`)
pub async fn get_tenant_by_cluster_id(
    resources: &Resources,
    cluster_id: &str,
    namespace: Option<&str>,
) -> Result<Option<Tenant>> {
    resources
        .find_unique(namespace, &remote_cluster_selector(cluster_id), cluster_id)
        .await
}

/// The ControlPlane Identity towards provider `cluster_id`
pub async fn get_control_plane_identity(
    resources: &Resources,
    cluster_id: &str,
    namespace: Option<&str>,
) -> Result<Option<Identity>> {
    let selector = label_selector([
        (REMOTE_CLUSTER_ID_LABEL, cluster_id),
        (IDENTITY_TYPE_LABEL, IdentityType::ControlPlane.as_str()),
    ]);
    resources.find_unique(namespace, &selector, cluster_id).await
}

/// ResourceSlices requested from provider `cluster_id`
pub async fn list_resource_slices_by_cluster_id(
    resources: &Resources,
    cluster_id: &str,
    namespace: Option<&str>,
) -> Result<Vec<ResourceSlice>> {
    let selector = label_selector([
        (REPLICATION_REQUESTED_LABEL, "true"),
        (REMOTE_CLUSTER_ID_LABEL, cluster_id),
    ]);
    resources.list(namespace, &selector).await
}

/// VirtualNodes backed by provider `cluster_id`
pub async fn list_virtual_nodes_by_cluster_id(
    resources: &Resources,
    cluster_id: &str,
    namespace: Option<&str>,
) -> Result<Vec<VirtualNode>> {
    resources
        .list(namespace, &remote_cluster_selector(cluster_id))
        .await
}

pub async fn get_configuration_by_cluster_id(
    resources: &Resources,
    cluster_id: &str,
    namespace: Option<&str>,
) -> Result<Option<Configuration>> {
    resources
        .find_unique(namespace, &remote_cluster_selector(cluster_id), cluster_id)
        .await
}

pub async fn get_gateway_server_by_cluster_id(
    resources: &Resources,
    cluster_id: &str,
    namespace: Option<&str>,
) -> Result<Option<GatewayServer>> {
    resources
        .find_unique(namespace, &remote_cluster_selector(cluster_id), cluster_id)
        .await
}

pub async fn get_gateway_client_by_cluster_id(
    resources: &Resources,
    cluster_id: &str,
    namespace: Option<&str>,
) -> Result<Option<GatewayClient>> {
    resources
        .find_unique(namespace, &remote_cluster_selector(cluster_id), cluster_id)
        .await
}

pub async fn get_connection_by_cluster_id(
    resources: &Resources,
    cluster_id: &str,
    namespace: Option<&str>,
) -> Result<Option<Connection>> {
    resources
        .find_unique(namespace, &remote_cluster_selector(cluster_id), cluster_id)
        .await
}

/// The IPAM Network of the given type in `namespace`
pub async fn get_network_by_type(
    resources: &Resources,
    namespace: &str,
    network_type: NetworkType,
) -> Result<Option<Network>> {
    let selector = label_selector([(NETWORK_TYPE_LABEL, network_type.label_value())]);
    let mut items: Vec<Network> = resources.list(Some(namespace), &selector).await?;
    match items.len() {
        0 => Ok(None),
        1 => Ok(items.pop()),
        n => Err(Error::Ambiguous {
            kind: format!("Network ({})", network_type.label_value()),
            cluster_id: "local".to_string(),
            count: n,
        }),
    }
}

/// The single Secret matching `selector` in `namespace`
pub async fn get_secret_by_labels(
    resources: &Resources,
    namespace: &str,
    selector: &str,
    cluster_id: &str,
) -> Result<Option<Secret>> {
    resources
        .find_unique(Some(namespace), selector, cluster_id)
        .await
}
