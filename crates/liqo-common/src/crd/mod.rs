//! Liqo custom resources consumed and produced by liqoctl
//!
//! The schemas and their controllers are owned by Liqo itself; these types
//! only model the fields the peering protocol reads or writes. Schema
//! generation is disabled for the same reason.

mod authentication;
mod discovery;
mod ipam;
mod networking;
mod offloading;
mod types;

pub use authentication::{
    AuthParams, Identity, IdentitySpec, IdentityStatus, IdentityType, ResourceSlice,
    ResourceSliceCondition, ResourceSliceConditionStatus, ResourceSliceConditionType,
    ResourceSliceSpec, ResourceSliceStatus, Tenant, TenantCondition, TenantSpec, TenantStatus,
};
pub use discovery::{
    ForeignCluster, ForeignClusterSpec, ForeignClusterStatus, Module, Modules, PeeringRole,
    TenantNamespaceStatus,
};
pub use ipam::{Network, NetworkSpec, NetworkStatus, NetworkType, IpSpec, IpStatus, IP};
pub use networking::{
    is_configuration_status_set, ClusterConfig, ClusterConfigCidr, Configuration,
    ConfigurationSpec, ConfigurationStatus, Connection, ConnectionSpec, ConnectionStatus,
    ConnectionStatusValue, ConnectionType, EndpointStatus, GatewayClient, GatewayClientSpec,
    GatewayClientStatus, GatewayServer, GatewayServerSpec, GatewayServerStatus, PublicKey,
    PublicKeySpec, ServerEndpoint, WgGatewayClientTemplate, WgGatewayClientTemplateSpec,
    WgGatewayServerTemplate, WgGatewayServerTemplateSpec,
};
pub use offloading::{
    NamespaceOffloading, NamespaceOffloadingSpec, NamespaceOffloadingStatus, OffloadingPhase,
    VirtualNode, VirtualNodeSpec,
};
pub use types::{Condition, LocalObjectReference, ObjectRef};
