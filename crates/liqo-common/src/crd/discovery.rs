//! ForeignCluster: the local record describing a known peer

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Specification for a ForeignCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "discovery.liqo.io",
    version = "v1beta1",
    kind = "ForeignCluster",
    plural = "foreignclusters",
    status = "ForeignClusterStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ForeignClusterSpec {
    /// Identity of the remote cluster
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
}

/// Role of the remote cluster relative to the local one
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum PeeringRole {
    /// No peering artifacts exist yet
    #[default]
    Unknown,
    /// The remote cluster consumes local resources
    Consumer,
    /// The remote cluster provides resources to the local one
    Provider,
    /// Both directions are active (bidirectional peering)
    ConsumerAndProvider,
}

impl PeeringRole {
    /// Derive the role from the peering artifacts present locally.
    ///
    /// A local Tenant for the peer means the peer consumes from us; a local
    /// Identity or VirtualNode for the peer means the peer provides to us.
    pub fn derive(has_tenant: bool, has_identity: bool, has_virtual_node: bool) -> Self {
        let consumer = has_tenant;
        let provider = has_identity || has_virtual_node;
        match (consumer, provider) {
            (true, true) => Self::ConsumerAndProvider,
            (true, false) => Self::Consumer,
            (false, true) => Self::Provider,
            (false, false) => Self::Unknown,
        }
    }

    /// Whether the peering is bidirectional
    pub fn is_bidirectional(self) -> bool {
        self == Self::ConsumerAndProvider
    }
}

/// Per-module status (networking, authentication, offloading)
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    /// Whether the module is enabled for this peer
    #[serde(default)]
    pub enabled: bool,
    /// Ordered list of module conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Status of the three peering modules
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Modules {
    /// Networking module
    #[serde(default)]
    pub networking: Module,
    /// Authentication module
    #[serde(default)]
    pub authentication: Module,
    /// Offloading module
    #[serde(default)]
    pub offloading: Module,
}

/// Tenant namespaces used for this peer on both sides
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantNamespaceStatus {
    /// Local tenant namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<String>,
    /// Remote tenant namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

/// Status for a ForeignCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForeignClusterStatus {
    /// Role of the peer, derived by the controller
    #[serde(default)]
    pub role: PeeringRole,
    /// Module status
    #[serde(default)]
    pub modules: Modules,
    /// Tenant namespaces
    #[serde(default)]
    pub tenant_namespace: TenantNamespaceStatus,
}

impl ForeignCluster {
    /// Role reported by the controller, if the status has been filled
    pub fn role(&self) -> Option<PeeringRole> {
        self.status.as_ref().map(|s| s.role)
    }
}
