//! Networking resources: CIDR remapping Configuration, gateway pair,
//! tunnel public keys and connection health

use k8s_openapi::ByteString;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::types::ObjectRef;

/// Pod and external CIDRs of one cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfigCidr {
    /// Pod CIDRs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pod: Vec<String>,
    /// External CIDRs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external: Vec<String>,
}

/// Network configuration of one side of the peering
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// CIDRs of the cluster
    #[serde(default)]
    pub cidr: ClusterConfigCidr,
}

impl ClusterConfig {
    /// Both pod and external CIDRs are known
    pub fn is_complete(&self) -> bool {
        !self.cidr.pod.is_empty() && !self.cidr.external.is_empty()
    }
}

/// Specification for a Configuration
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "networking.liqo.io",
    version = "v1beta1",
    kind = "Configuration",
    plural = "configurations",
    status = "ConfigurationStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSpec {
    /// Local cluster CIDRs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<ClusterConfig>,
    /// Remote cluster CIDRs as advertised by the remote cluster
    pub remote: ClusterConfig,
}

/// Status for a Configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationStatus {
    /// Local CIDRs as remapped by the remote cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<ClusterConfig>,
    /// Remote CIDRs remapped to be routable locally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<ClusterConfig>,
}

/// Whether the remapped remote CIDRs have been computed.
///
/// A cluster is "network initialized" towards a peer only once this holds.
pub fn is_configuration_status_set(conf: &Configuration) -> bool {
    conf.status
        .as_ref()
        .and_then(|s| s.remote.as_ref())
        .is_some_and(ClusterConfig::is_complete)
}

/// Endpoint requested for a gateway server
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerEndpoint {
    /// Service port
    pub port: i32,
    /// Service type (NodePort, LoadBalancer, ClusterIP)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    /// Requested node port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
    /// Requested LoadBalancer IP
    #[serde(default, rename = "loadBalancerIP", skip_serializing_if = "Option::is_none")]
    pub load_balancer_ip: Option<String>,
}

/// Endpoint actually reachable on a gateway server
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    /// Reachable addresses
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Reachable port
    pub port: i32,
    /// Transport protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Specification for a GatewayServer
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "networking.liqo.io",
    version = "v1beta1",
    kind = "GatewayServer",
    plural = "gatewayservers",
    status = "GatewayServerStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct GatewayServerSpec {
    /// Tunnel MTU
    pub mtu: i32,
    /// Requested service endpoint
    pub endpoint: ServerEndpoint,
    /// Template used to render the gateway
    pub server_template_ref: ObjectRef,
}

/// Status for a GatewayServer
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayServerStatus {
    /// Endpoint clients must connect to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointStatus>,
    /// Secret holding the gateway keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<ObjectRef>,
}

/// Specification for a GatewayClient
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "networking.liqo.io",
    version = "v1beta1",
    kind = "GatewayClient",
    plural = "gatewayclients",
    status = "GatewayClientStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClientSpec {
    /// Tunnel MTU
    pub mtu: i32,
    /// Server endpoint to connect to
    pub remote_endpoint: EndpointStatus,
    /// Template used to render the gateway
    pub client_template_ref: ObjectRef,
}

/// Status for a GatewayClient
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClientStatus {
    /// Secret holding the gateway keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<ObjectRef>,
}

/// Specification for a PublicKey
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "networking.liqo.io",
    version = "v1beta1",
    kind = "PublicKey",
    plural = "publickeys",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeySpec {
    /// Tunnel public key of the remote gateway
    pub public_key: ByteString,
}

/// Which end of the tunnel a Connection describes
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum ConnectionType {
    /// Gateway server end
    #[default]
    Server,
    /// Gateway client end
    Client,
}

/// Tunnel health
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum ConnectionStatusValue {
    /// Tunnel is up
    Connected,
    /// Tunnel is being established
    Connecting,
    /// Anything else
    #[default]
    Error,
}

/// Specification for a Connection
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "networking.liqo.io",
    version = "v1beta1",
    kind = "Connection",
    plural = "connections",
    status = "ConnectionStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    /// Tunnel end
    #[serde(rename = "type")]
    pub type_: ConnectionType,
    /// Gateway owning this connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_ref: Option<ObjectRef>,
}

/// Status for a Connection
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Tunnel health
    #[serde(default)]
    pub value: ConnectionStatusValue,
}

impl Connection {
    /// Whether the tunnel is up
    pub fn is_connected(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.value == ConnectionStatusValue::Connected)
    }
}

/// Specification for a WireGuard gateway server template
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "networking.liqo.io",
    version = "v1beta1",
    kind = "WgGatewayServerTemplate",
    plural = "wggatewayservertemplates",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct WgGatewayServerTemplateSpec {
    /// Opaque template body
    #[serde(default)]
    pub template: serde_json::Value,
}

/// Specification for a WireGuard gateway client template
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "networking.liqo.io",
    version = "v1beta1",
    kind = "WgGatewayClientTemplate",
    plural = "wggatewayclienttemplates",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct WgGatewayClientTemplateSpec {
    /// Opaque template body
    #[serde(default)]
    pub template: serde_json::Value,
}
