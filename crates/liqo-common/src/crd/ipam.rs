//! IPAM resources: cluster networks and remapped IPs

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Role of a Network resource, carried in the network-type label
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkType {
    /// Cluster pod CIDR
    PodCidr,
    /// Cluster external CIDR
    ExternalCidr,
}

impl NetworkType {
    /// Label value identifying this network type
    pub fn label_value(self) -> &'static str {
        match self {
            Self::PodCidr => "pod-cidr",
            Self::ExternalCidr => "external-cidr",
        }
    }
}

/// Specification for a Network
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "ipam.liqo.io",
    version = "v1alpha1",
    kind = "Network",
    plural = "networks",
    status = "NetworkStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Requested CIDR
    pub cidr: String,
}

/// Status for a Network
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// CIDR allocated by IPAM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
}

impl Network {
    /// Allocated CIDR, falling back to the requested one
    pub fn effective_cidr(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.cidr.as_deref())
            .unwrap_or(&self.spec.cidr)
    }
}

/// Specification for an IP
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "ipam.liqo.io",
    version = "v1alpha1",
    kind = "IP",
    plural = "ips",
    status = "IpStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct IpSpec {
    /// Address to remap
    pub ip: String,
}

/// Status for an IP
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IpStatus {
    /// Address remapped into the external CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}
