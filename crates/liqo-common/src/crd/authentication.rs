//! Authentication artifacts: Tenant (provider side), Identity (consumer side)
//! and ResourceSlice (consumer request for provider resources)

use k8s_openapi::ByteString;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::types::LocalObjectReference;

/// Gate on whether a Tenant accepts new ResourceSlices
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum TenantCondition {
    /// New ResourceSlices are accepted
    Active,
    /// New ResourceSlices are refused, existing ones are kept
    Cordoned,
    /// New ResourceSlices are refused and existing ones are released
    Drained,
}

/// Specification for a Tenant
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "authentication.liqo.io",
    version = "v1beta1",
    kind = "Tenant",
    plural = "tenants",
    status = "TenantStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    /// Consumer cluster identity
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    /// Consumer public key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<ByteString>,
    /// Certificate signing request for the consumer control plane
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csr: Option<ByteString>,
    /// Nonce signed by the consumer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<ByteString>,
    /// Proxy through which the consumer reaches the provider API server
    #[serde(default, rename = "proxyURL", skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    /// Admission gate for new ResourceSlices (unset means Active)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_condition: Option<TenantCondition>,
}

/// Credentials to reach a remote API server
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthParams {
    /// CA bundle of the remote API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<ByteString>,
    /// Signed client certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_crt: Option<ByteString>,
    /// Address of the remote API server
    #[serde(default, rename = "apiServer")]
    pub api_server: String,
    /// Proxy to reach the remote API server
    #[serde(default, rename = "proxyURL", skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

/// Status for a Tenant
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    /// Credentials issued to the consumer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_params: Option<AuthParams>,
    /// Provider tenant namespace assigned to the consumer
    #[serde(default)]
    pub tenant_namespace: String,
}

impl Tenant {
    /// The controller has issued credentials and assigned the tenant namespace
    pub fn is_status_filled(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.auth_params.is_some() && !s.tenant_namespace.is_empty())
    }
}

/// Kind of identity held by the consumer
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum IdentityType {
    /// Control-plane credentials for the provider
    #[default]
    ControlPlane,
    /// Credentials bound to a single ResourceSlice
    ResourceSlice,
}

impl IdentityType {
    /// Wire name of the type
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ControlPlane => "ControlPlane",
            Self::ResourceSlice => "ResourceSlice",
        }
    }
}

/// Specification for an Identity
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "authentication.liqo.io",
    version = "v1beta1",
    kind = "Identity",
    plural = "identities",
    status = "IdentityStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySpec {
    /// Provider cluster identity
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    /// Identity type
    #[serde(rename = "type")]
    pub type_: IdentityType,
    /// Credentials issued by the provider
    pub auth_params: AuthParams,
    /// Provider tenant namespace assigned to this consumer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Status for an Identity
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityStatus {
    /// Secret holding the generated kubeconfig
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_secret_ref: Option<LocalObjectReference>,
}

impl Identity {
    /// The controller has generated the kubeconfig secret
    pub fn has_kubeconfig_secret(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.kubeconfig_secret_ref.as_ref())
            .is_some_and(|r| !r.name.is_empty())
    }
}

/// Specification for a ResourceSlice
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "authentication.liqo.io",
    version = "v1beta1",
    kind = "ResourceSlice",
    plural = "resourceslices",
    status = "ResourceSliceStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSliceSpec {
    /// Consumer cluster identity
    #[serde(default, rename = "consumerClusterID", skip_serializing_if = "Option::is_none")]
    pub consumer_cluster_id: Option<String>,
    /// Provider cluster identity
    #[serde(default, rename = "providerClusterID", skip_serializing_if = "Option::is_none")]
    pub provider_cluster_id: Option<String>,
    /// Resource class requested
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub class: String,
}

/// Type of a ResourceSlice condition
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum ResourceSliceConditionType {
    /// The provider authenticated the request
    Authentication,
    /// The provider granted the resources
    Resources,
}

/// Outcome of a ResourceSlice condition
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum ResourceSliceConditionStatus {
    /// Accepted by the provider
    Accepted,
    /// Denied by the provider
    Denied,
}

/// A ResourceSlice condition
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSliceCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: ResourceSliceConditionType,
    /// Condition outcome
    pub status: ResourceSliceConditionStatus,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status for a ResourceSlice
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSliceStatus {
    /// Admission conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ResourceSliceCondition>,
}

impl ResourceSlice {
    /// Look up a condition by type
    pub fn condition(&self, type_: ResourceSliceConditionType) -> Option<&ResourceSliceCondition> {
        self.status
            .as_ref()?
            .conditions
            .iter()
            .find(|c| c.type_ == type_)
    }
}
