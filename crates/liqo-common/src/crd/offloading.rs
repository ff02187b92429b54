//! Offloading resources: virtual nodes and namespace offloading

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Specification for a VirtualNode
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "offloading.liqo.io",
    version = "v1beta1",
    kind = "VirtualNode",
    plural = "virtualnodes",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNodeSpec {
    /// Provider cluster identity
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    /// Whether the backing Node object is created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_node: Option<bool>,
}

/// Phase of a namespace offloading
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum OffloadingPhase {
    /// Offloaded to every selected cluster
    Ready,
    /// No cluster matches the selector
    NoClusterSelected,
    /// Offloading failed on part of the selected clusters
    SomeFailed,
    /// Offloading failed on every selected cluster
    AllFailed,
    /// Offloading is being removed
    Terminating,
}

/// Specification for a NamespaceOffloading
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "offloading.liqo.io",
    version = "v1beta1",
    kind = "NamespaceOffloading",
    plural = "namespaceoffloadings",
    status = "NamespaceOffloadingStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceOffloadingSpec {
    /// How remote namespace names are derived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_mapping_strategy: Option<String>,
    /// Where pods may be scheduled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_offloading_strategy: Option<String>,
}

/// Status for a NamespaceOffloading
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceOffloadingStatus {
    /// Generation the status refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Aggregate offloading phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offloading_phase: Option<OffloadingPhase>,
}
