//! Common types for liqoctl: Liqo custom resources, errors, and utilities

#![deny(missing_docs)]

pub mod cidr;
pub mod context;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod store;
pub mod tenant_namespace;
#[cfg(any(test, feature = "testkit"))]
pub mod testing;

pub use context::OpContext;
pub use error::Error;
pub use store::{ObjectStore, Operation, Resources};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default namespace where the Liqo control plane runs
pub const DEFAULT_LIQO_NAMESPACE: &str = "liqo";

/// Name of the ConfigMap holding the local cluster identity
pub const CLUSTER_ID_CONFIGMAP_NAME: &str = "liqo-clusterid-configmap";

/// Key of the cluster identity inside [`CLUSTER_ID_CONFIGMAP_NAME`]
pub const CLUSTER_ID_CONFIGMAP_KEY: &str = "CLUSTER_ID";

/// Label carried by every per-peer object, valued with the peer's cluster ID
pub const REMOTE_CLUSTER_ID_LABEL: &str = "liqo.io/remote-cluster-id";

/// Label marking a namespace as a tenant namespace
pub const TENANT_NAMESPACE_LABEL: &str = "liqo.io/tenant-namespace";

/// Prefix of tenant namespace names
pub const TENANT_NAMESPACE_PREFIX: &str = "liqo-tenant";

/// Label marking the nonce secret
pub const NONCE_SECRET_LABEL: &str = "liqo.io/nonce";

/// Name of the nonce secret inside a tenant namespace
pub const NONCE_SECRET_NAME: &str = "liqo-nonce";

/// Data key of the nonce inside nonce and signed-nonce secrets
pub const NONCE_SECRET_FIELD: &str = "nonce";

/// Label marking the signed-nonce secret
pub const SIGNED_NONCE_SECRET_LABEL: &str = "liqo.io/signed-nonce";

/// Name of the signed-nonce secret inside a tenant namespace
pub const SIGNED_NONCE_SECRET_NAME: &str = "liqo-signed-nonce";

/// Data key of the signature inside the signed-nonce secret
pub const SIGNED_NONCE_SECRET_FIELD: &str = "signedNonce";

/// Secret holding the local cluster authentication key pair
pub const AUTH_KEYS_SECRET_NAME: &str = "liqo-auth-keys";

/// Data key of the PKCS#8 PEM private key in [`AUTH_KEYS_SECRET_NAME`]
pub const AUTH_KEYS_PRIVATE_KEY_FIELD: &str = "privateKey";

/// Data key of the public key in [`AUTH_KEYS_SECRET_NAME`]
pub const AUTH_KEYS_PUBLIC_KEY_FIELD: &str = "publicKey";

/// Label distinguishing Identity types
pub const IDENTITY_TYPE_LABEL: &str = "liqo.io/identity-type";

/// Label requesting replication of a resource to the remote cluster
pub const REPLICATION_REQUESTED_LABEL: &str = "liqo.io/replication";

/// Annotation asking the provider to also create a VirtualNode for a ResourceSlice
pub const CREATE_VIRTUAL_NODE_ANNOTATION: &str = "liqo.io/create-virtual-node";

/// Annotation marking a ForeignCluster as permanently unreachable (force unpeer)
pub const PERMANENTLY_UNREACHABLE_ANNOTATION: &str = "liqo.io/permanently-unreachable";

/// Label identifying gateway pods and services
pub const GATEWAY_COMPONENT_LABEL: &str = "networking.liqo.io/component";

/// Value of [`GATEWAY_COMPONENT_LABEL`] for gateways
pub const GATEWAY_COMPONENT_VALUE: &str = "gateway";

/// Label identifying the IPAM network type
pub const NETWORK_TYPE_LABEL: &str = "ipam.liqo.io/network-type";

/// Data key of the public key inside a gateway key secret
pub const GATEWAY_PUBLIC_KEY_FIELD: &str = "publicKey";

/// Name of the IP resource remapping the API server proxy address
pub const API_PROXY_IP_NAME: &str = "api-server-proxy";

/// Port of the Liqo API server proxy
pub const API_PROXY_PORT: u16 = 8118;

/// Field manager used for every write
pub const FIELD_MANAGER: &str = "liqoctl";
