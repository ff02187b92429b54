//! One cluster's side of the network setup.

use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::Resource;
use liqo_common::crd::{
    ClusterConfig, ClusterConfigCidr, Configuration, ConfigurationSpec, EndpointStatus,
    GatewayClient, GatewayClientSpec, GatewayServer, GatewayServerSpec, NetworkType, ObjectRef,
    PublicKey, PublicKeySpec, ServerEndpoint, WgGatewayClientTemplate, WgGatewayServerTemplate,
};
use liqo_common::kube_utils::{merge_labels, remote_cluster_labels};
use liqo_common::store::Object;
use liqo_common::{Error, OpContext, Result, GATEWAY_PUBLIC_KEY_FIELD};
use tracing::{debug, info};

use crate::commands::{existing_tenant_namespace, resolve_network_namespace};
use crate::factory::Factory;
use crate::getters;
use crate::wait::Waiter;

/// Default tunnel MTU
pub const DEFAULT_MTU: i32 = 1340;
/// Default gateway server port
pub const DEFAULT_SERVER_PORT: i32 = 51840;
/// Default gateway server service type
pub const DEFAULT_SERVICE_TYPE: &str = "LoadBalancer";
/// Default WireGuard gateway server template
pub const DEFAULT_SERVER_TEMPLATE: &str = "wireguard-server";
/// Default WireGuard gateway client template
pub const DEFAULT_CLIENT_TEMPLATE: &str = "wireguard-client";

/// Desired gateway server settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayServerOptions {
    pub service_type: String,
    pub port: i32,
    pub node_port: Option<i32>,
    pub load_balancer_ip: Option<String>,
    pub mtu: i32,
    pub template_name: String,
    /// `None` means the Liqo namespace
    pub template_namespace: Option<String>,
}

impl Default for GatewayServerOptions {
    fn default() -> Self {
        Self {
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            port: DEFAULT_SERVER_PORT,
            node_port: None,
            load_balancer_ip: None,
            mtu: DEFAULT_MTU,
            template_name: DEFAULT_SERVER_TEMPLATE.to_string(),
            template_namespace: None,
        }
    }
}

/// Desired gateway client settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayClientOptions {
    pub mtu: i32,
    pub template_name: String,
    /// `None` means the Liqo namespace
    pub template_namespace: Option<String>,
}

impl Default for GatewayClientOptions {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            template_name: DEFAULT_CLIENT_TEMPLATE.to_string(),
            template_namespace: None,
        }
    }
}

/// Which gateway a cluster hosts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayRole {
    Server,
    Client,
}

/// Whether a gateway server's requested endpoint no longer matches the
/// Service currently exposing it (type, port, nodePort or LoadBalancer IP).
///
/// Clients cannot follow an endpoint change in place, so a differing
/// endpoint forces the server to be recreated.
pub fn endpoint_differs(endpoint: &ServerEndpoint, service: &Service) -> bool {
    let Some(spec) = service.spec.as_ref() else {
        return true;
    };
    if let Some(wanted) = endpoint.service_type.as_deref() {
        if spec.type_.as_deref().unwrap_or("ClusterIP") != wanted {
            return true;
        }
    }
    let Some(port) = spec.ports.as_ref().and_then(|ports| ports.first()) else {
        return true;
    };
    if port.port != endpoint.port {
        return true;
    }
    if endpoint.node_port.is_some() && port.node_port != endpoint.node_port {
        return true;
    }
    if let Some(ip) = endpoint.load_balancer_ip.as_deref() {
        if spec.load_balancer_ip.as_deref() != Some(ip) {
            return true;
        }
    }
    false
}

fn template_ref<K: Object>(name: &str, namespace: &str) -> ObjectRef {
    ObjectRef {
        kind: Some(K::kind(&()).into_owned()),
        api_version: Some(K::api_version(&()).into_owned()),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
    }
}

/// Network steps bound to one cluster
pub struct Cluster<'a> {
    factory: &'a Factory,
    waiter: Waiter,
}

impl<'a> Cluster<'a> {
    pub fn new(factory: &'a Factory) -> Self {
        Self::with_waiter(factory, Waiter::new(factory))
    }

    pub fn with_waiter(factory: &'a Factory, waiter: Waiter) -> Self {
        Self { factory, waiter }
    }

    pub fn factory(&self) -> &Factory {
        self.factory
    }

    pub fn waiter(&self) -> &Waiter {
        &self.waiter
    }

    /// This cluster's own ID
    pub async fn local_cluster_id(&self) -> Result<String> {
        self.factory.cluster_id().await
    }

    /// Namespace for the networking resources towards `remote_cluster_id`,
    /// creating the tenant namespace when it is the one selected
    pub async fn ensure_network_namespace(
        &self,
        ctx: &OpContext,
        requested: &str,
        remote_cluster_id: &str,
    ) -> Result<String> {
        let manager = self.factory.tenant_namespaces();
        resolve_network_namespace(requested, || async move {
            ctx.run("ensure tenant namespace", manager.ensure(remote_cluster_id))
                .await
        })
        .await
    }

    /// Like [`Self::ensure_network_namespace`], without creating anything
    pub async fn network_namespace(&self, requested: &str, remote_cluster_id: &str) -> Result<String> {
        resolve_network_namespace(requested, || {
            existing_tenant_namespace(self.factory, remote_cluster_id)
        })
        .await
    }

    async fn own_cidr(&self, network_type: NetworkType) -> Result<String> {
        let liqo_ns = self.factory.liqo_namespace();
        let network = getters::get_network_by_type(self.factory.resources(), liqo_ns, network_type)
            .await?
            .ok_or_else(|| {
                Error::precondition(format!(
                    "no {} network found in namespace {}: is Liqo installed?",
                    network_type.label_value(),
                    liqo_ns
                ))
            })?;
        Ok(network.effective_cidr().to_string())
    }

    /// Describe this cluster's CIDRs as a Configuration to apply on the peer,
    /// inside `peer_namespace`
    pub async fn forge_configuration(&self, peer_namespace: &str) -> Result<Configuration> {
        let local_id = self.factory.cluster_id().await?;
        let pod = self.own_cidr(NetworkType::PodCidr).await?;
        let external = self.own_cidr(NetworkType::ExternalCidr).await?;

        let mut conf = Configuration::new(
            &local_id,
            ConfigurationSpec {
                local: None,
                remote: ClusterConfig {
                    cidr: ClusterConfigCidr {
                        pod: vec![pod],
                        external: vec![external],
                    },
                },
            },
        );
        conf.metadata.namespace = Some(peer_namespace.to_string());
        conf.metadata.labels = Some(remote_cluster_labels(&local_id, &[]));
        Ok(conf)
    }

    /// Apply the peer's Configuration on this cluster, keeping the name of an
    /// existing one for the same peer
    pub async fn setup_configuration(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
        conf: &Configuration,
    ) -> Result<Configuration> {
        let res = self.factory.resources();
        let namespace = conf
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::validation("configuration has no namespace"))?;
        let name = getters::get_configuration_by_cluster_id(res, remote_cluster_id, Some(namespace))
            .await?
            .and_then(|c| c.metadata.name)
            .unwrap_or_else(|| remote_cluster_id.to_string());

        let labels = conf.metadata.labels.clone().unwrap_or_default();
        let apply = res.create_or_update(
            Some(namespace),
            &name,
            || Configuration::new(&name, ConfigurationSpec::default()),
            |c: &mut Configuration| {
                merge_labels(&mut c.metadata.labels, &labels);
                c.spec = conf.spec.clone();
                Ok(())
            },
        );
        let (applied, op) = ctx.run("apply configuration", apply).await?;
        info!(
            cluster = %self.factory.scope(),
            namespace = %namespace,
            name = %name,
            operation = ?op,
            "Network configuration applied"
        );
        Ok(applied)
    }

    /// Wait until the controller has computed the remapped CIDRs towards
    /// `remote_cluster_id`
    pub async fn wait_configuration(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
        namespace: &str,
    ) -> Result<Configuration> {
        self.waiter
            .for_configuration(ctx, remote_cluster_id, namespace)
            .await
    }

    /// Fail unless the named gateway template exists
    pub async fn check_template<K: Object>(&self, name: &str, namespace: Option<&str>) -> Result<()> {
        let namespace = namespace.unwrap_or(self.factory.liqo_namespace());
        let found: Option<K> = self.factory.resources().get(Some(namespace), name).await?;
        if found.is_none() {
            return Err(Error::precondition(format!(
                "{} {}/{} not found",
                K::kind(&()),
                namespace,
                name
            )));
        }
        debug!(kind = %K::kind(&()), namespace = %namespace, name = %name, "Template found");
        Ok(())
    }

    /// Validate the template for the gateway this cluster hosts
    pub async fn check_gateway_template(&self, role: GatewayRole, name: &str, namespace: Option<&str>) -> Result<()> {
        match role {
            GatewayRole::Server => self.check_template::<WgGatewayServerTemplate>(name, namespace).await,
            GatewayRole::Client => self.check_template::<WgGatewayClientTemplate>(name, namespace).await,
        }
    }

    /// The GatewayServer this cluster would host for `remote_cluster_id`
    pub fn forge_gateway_server(
        &self,
        remote_cluster_id: &str,
        namespace: &str,
        opts: &GatewayServerOptions,
    ) -> GatewayServer {
        let template_ns = opts
            .template_namespace
            .as_deref()
            .unwrap_or(self.factory.liqo_namespace());
        let mut gs = GatewayServer::new(
            remote_cluster_id,
            GatewayServerSpec {
                mtu: opts.mtu,
                endpoint: ServerEndpoint {
                    port: opts.port,
                    service_type: Some(opts.service_type.clone()),
                    node_port: opts.node_port,
                    load_balancer_ip: opts.load_balancer_ip.clone(),
                },
                server_template_ref: template_ref::<WgGatewayServerTemplate>(
                    &opts.template_name,
                    template_ns,
                ),
            },
        );
        gs.metadata.namespace = Some(namespace.to_string());
        gs.metadata.labels = Some(remote_cluster_labels(remote_cluster_id, &[]));
        gs
    }

    /// The GatewayServer for `remote_cluster_id`, if any
    pub async fn gateway_server(&self, remote_cluster_id: &str, namespace: &str) -> Result<Option<GatewayServer>> {
        getters::get_gateway_server_by_cluster_id(self.factory.resources(), remote_cluster_id, Some(namespace))
            .await
    }

    /// The GatewayClient for `remote_cluster_id`, if any
    pub async fn gateway_client(&self, remote_cluster_id: &str, namespace: &str) -> Result<Option<GatewayClient>> {
        getters::get_gateway_client_by_cluster_id(self.factory.resources(), remote_cluster_id, Some(namespace))
            .await
    }

    /// Apply the GatewayServer for `remote_cluster_id` and wait for the
    /// endpoint clients must connect to.
    ///
    /// When the backing Service no longer matches the requested endpoint the
    /// server is deleted, its absence awaited, and only then recreated.
    pub async fn ensure_gateway_server(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
        namespace: &str,
        opts: &GatewayServerOptions,
    ) -> Result<(GatewayServer, EndpointStatus)> {
        let res = self.factory.resources();
        let forged = self.forge_gateway_server(remote_cluster_id, namespace, opts);

        let name = match self.gateway_server(remote_cluster_id, namespace).await? {
            Some(existing) => {
                let name = existing
                    .metadata
                    .name
                    .unwrap_or_else(|| remote_cluster_id.to_string());
                let service: Option<Service> = res.get(Some(namespace), &name).await?;
                if service.is_some_and(|svc| endpoint_differs(&forged.spec.endpoint, &svc)) {
                    info!(
                        namespace = %namespace,
                        name = %name,
                        "Gateway server endpoint changed, recreating it"
                    );
                    ctx.run(
                        "delete gateway server",
                        res.delete::<GatewayServer>(Some(namespace), &name),
                    )
                    .await?;
                    self.waiter
                        .for_gateway_server_absence(ctx, namespace, &name)
                        .await?;
                }
                name
            }
            None => remote_cluster_id.to_string(),
        };

        let labels = forged.metadata.labels.clone().unwrap_or_default();
        let apply = res.create_or_update(
            Some(namespace),
            &name,
            || GatewayServer::new(&name, GatewayServerSpec::default()),
            |gs: &mut GatewayServer| {
                merge_labels(&mut gs.metadata.labels, &labels);
                gs.spec = forged.spec.clone();
                Ok(())
            },
        );
        let (gs, op) = ctx.run("apply gateway server", apply).await?;
        info!(namespace = %namespace, name = %name, operation = ?op, "Gateway server applied");

        let endpoint = self
            .waiter
            .for_gateway_server_status_endpoint(ctx, namespace, &name)
            .await?;
        Ok((gs, endpoint))
    }

    /// Apply the GatewayClient for `remote_cluster_id`, pointed at `endpoint`
    pub async fn ensure_gateway_client(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
        namespace: &str,
        endpoint: &EndpointStatus,
        opts: &GatewayClientOptions,
    ) -> Result<GatewayClient> {
        let res = self.factory.resources();
        let template_ns = opts
            .template_namespace
            .as_deref()
            .unwrap_or(self.factory.liqo_namespace());
        let spec = GatewayClientSpec {
            mtu: opts.mtu,
            remote_endpoint: endpoint.clone(),
            client_template_ref: template_ref::<WgGatewayClientTemplate>(
                &opts.template_name,
                template_ns,
            ),
        };
        let name = self
            .gateway_client(remote_cluster_id, namespace)
            .await?
            .and_then(|gc| gc.metadata.name)
            .unwrap_or_else(|| remote_cluster_id.to_string());

        let labels = remote_cluster_labels(remote_cluster_id, &[]);
        let apply = res.create_or_update(
            Some(namespace),
            &name,
            || GatewayClient::new(&name, GatewayClientSpec::default()),
            |gc: &mut GatewayClient| {
                merge_labels(&mut gc.metadata.labels, &labels);
                gc.spec = spec.clone();
                Ok(())
            },
        );
        let (gc, op) = ctx.run("apply gateway client", apply).await?;
        info!(namespace = %namespace, name = %name, operation = ?op, "Gateway client applied");
        Ok(gc)
    }

    /// Tunnel public key of the gateway this cluster hosts towards
    /// `remote_cluster_id`. Waits for the key secret and a ready gateway pod,
    /// since the key only exists once the gateway has generated it.
    pub async fn gateway_public_key(
        &self,
        ctx: &OpContext,
        role: GatewayRole,
        remote_cluster_id: &str,
        namespace: &str,
        gateway_name: &str,
    ) -> Result<Vec<u8>> {
        let secret_ref = match role {
            GatewayRole::Server => {
                self.waiter
                    .for_gateway_server_secret_ref(ctx, namespace, gateway_name)
                    .await?
            }
            GatewayRole::Client => {
                self.waiter
                    .for_gateway_client_secret_ref(ctx, namespace, gateway_name)
                    .await?
            }
        };
        self.waiter
            .for_gateway_pod_ready(ctx, namespace, remote_cluster_id)
            .await?;

        let secret_ns = secret_ref.namespace.as_deref().unwrap_or(namespace);
        let secret: Option<Secret> = self
            .factory
            .resources()
            .get(Some(secret_ns), &secret_ref.name)
            .await?;
        secret
            .and_then(|s| s.data)
            .and_then(|mut d| d.remove(GATEWAY_PUBLIC_KEY_FIELD))
            .map(|ByteString(key)| key)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::missing("gateway public key", remote_cluster_id))
    }

    /// Store the peer's tunnel public key, owned by the local gateway so it
    /// goes away with it
    pub async fn ensure_public_key(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
        namespace: &str,
        key: &[u8],
        owner: Option<OwnerReference>,
    ) -> Result<PublicKey> {
        let labels = remote_cluster_labels(remote_cluster_id, &[]);
        let apply = self.factory.resources().create_or_update(
            Some(namespace),
            remote_cluster_id,
            || PublicKey::new(remote_cluster_id, PublicKeySpec::default()),
            |pk: &mut PublicKey| {
                merge_labels(&mut pk.metadata.labels, &labels);
                pk.spec.public_key = ByteString(key.to_vec());
                if let Some(owner) = &owner {
                    pk.metadata.owner_references = Some(vec![owner.clone()]);
                }
                Ok(())
            },
        );
        let (pk, op) = ctx.run("apply public key", apply).await?;
        info!(namespace = %namespace, name = %remote_cluster_id, operation = ?op, "Public key applied");
        Ok(pk)
    }

    /// Wait for the tunnel towards `remote_cluster_id` to report Connected
    pub async fn wait_connection(&self, ctx: &OpContext, remote_cluster_id: &str, namespace: &str) -> Result<()> {
        self.waiter
            .for_connection(ctx, namespace, remote_cluster_id)
            .await
            .map(|_| ())
    }

    /// Delete every gateway (server and client) towards `remote_cluster_id`.
    /// Returns how many were deleted.
    pub async fn delete_gateways(&self, ctx: &OpContext, remote_cluster_id: &str, namespace: &str) -> Result<usize> {
        let res = self.factory.resources();
        let mut deleted = 0;
        if let Some(name) = self
            .gateway_server(remote_cluster_id, namespace)
            .await?
            .and_then(|gs| gs.metadata.name)
        {
            let gone = ctx
                .run("delete gateway server", res.delete::<GatewayServer>(Some(namespace), &name))
                .await?;
            deleted += usize::from(gone);
        }
        if let Some(name) = self
            .gateway_client(remote_cluster_id, namespace)
            .await?
            .and_then(|gc| gc.metadata.name)
        {
            let gone = ctx
                .run("delete gateway client", res.delete::<GatewayClient>(Some(namespace), &name))
                .await?;
            deleted += usize::from(gone);
        }
        Ok(deleted)
    }

    /// Delete the Configuration describing `remote_cluster_id`, wherever it is
    pub async fn delete_configuration(&self, ctx: &OpContext, remote_cluster_id: &str) -> Result<bool> {
        let res = self.factory.resources();
        match getters::get_configuration_by_cluster_id(res, remote_cluster_id, None).await? {
            Some(conf) => {
                let name = conf.metadata.name.clone().unwrap_or_default();
                ctx.run(
                    "delete configuration",
                    res.delete::<Configuration>(conf.metadata.namespace.as_deref(), &name),
                )
                .await
            }
            None => Ok(false),
        }
    }
}

/// Controller owner reference to a gateway
pub fn gateway_owner<K: Resource<DynamicType = ()>>(gateway: &K) -> Option<OwnerReference> {
    gateway.controller_owner_ref(&())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterScope;
    use k8s_openapi::api::core::v1::{Namespace, ServicePort, ServiceSpec};
    use liqo_common::crd::GatewayServerStatus;
    use liqo_common::testing::{FakeCluster, Verb};
    use std::sync::Arc;
    use std::time::Duration;

    fn service(type_: &str, port: i32, node_port: Option<i32>) -> Service {
        Service {
            spec: Some(ServiceSpec {
                type_: Some(type_.into()),
                ports: Some(vec![ServicePort {
                    port,
                    node_port,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn endpoint_comparison() {
        let endpoint = ServerEndpoint {
            port: 51840,
            service_type: Some("NodePort".into()),
            node_port: Some(30000),
            load_balancer_ip: None,
        };
        assert!(!endpoint_differs(&endpoint, &service("NodePort", 51840, Some(30000))));
        assert!(endpoint_differs(&endpoint, &service("NodePort", 51840, Some(30001))));
        assert!(endpoint_differs(&endpoint, &service("LoadBalancer", 51840, Some(30000))));
        assert!(endpoint_differs(&endpoint, &service("NodePort", 1, Some(30000))));
        assert!(endpoint_differs(&endpoint, &Service::default()));

        let lb = ServerEndpoint {
            port: 51840,
            service_type: Some("LoadBalancer".into()),
            node_port: None,
            load_balancer_ip: Some("1.2.3.4".into()),
        };
        let mut svc = service("LoadBalancer", 51840, Some(31000));
        assert!(endpoint_differs(&lb, &svc));
        if let Some(spec) = svc.spec.as_mut() {
            spec.load_balancer_ip = Some("1.2.3.4".into());
        }
        assert!(!endpoint_differs(&lb, &svc));
    }

    #[tokio::test]
    async fn changed_endpoint_deletes_before_creating() {
        let fake = Arc::new(FakeCluster::new());
        let mut ns = Namespace::default();
        ns.metadata.name = Some("liqo-tenant-cluster-a".into());
        fake.insert(ns);
        fake.on_create::<GatewayServer>(|gs| {
            gs.status = Some(GatewayServerStatus {
                endpoint: Some(EndpointStatus {
                    addresses: vec!["172.18.0.5".into()],
                    port: gs.spec.endpoint.port,
                    protocol: Some("UDP".into()),
                }),
                secret_ref: None,
            });
        });
        let factory = Factory::with_store(ClusterScope::Remote, fake.clone());
        let cluster = Cluster::with_waiter(
            &factory,
            Waiter::new(&factory).with_interval(Duration::from_millis(5)),
        );
        let ctx = OpContext::with_timeout(Duration::from_secs(5));
        let ns = "liqo-tenant-cluster-a";

        let node_port = GatewayServerOptions {
            service_type: "NodePort".into(),
            ..Default::default()
        };
        cluster
            .ensure_gateway_server(&ctx, "cluster-a", ns, &node_port)
            .await
            .unwrap();
        let mut svc = service("NodePort", DEFAULT_SERVER_PORT, Some(30000));
        svc.metadata.name = Some("cluster-a".into());
        svc.metadata.namespace = Some(ns.into());
        fake.insert(svc);

        // same endpoint: untouched
        fake.clear_ops();
        cluster
            .ensure_gateway_server(&ctx, "cluster-a", ns, &node_port)
            .await
            .unwrap();
        assert!(fake.ops().is_empty());

        let load_balancer = GatewayServerOptions::default();
        cluster
            .ensure_gateway_server(&ctx, "cluster-a", ns, &load_balancer)
            .await
            .unwrap();
        let ops: Vec<_> = fake
            .ops_on("GatewayServer")
            .into_iter()
            .map(|op| op.verb)
            .collect();
        assert_eq!(ops, vec![Verb::Delete, Verb::Create]);

        let gs = fake.get::<GatewayServer>(Some(ns), "cluster-a").unwrap();
        assert_eq!(gs.spec.endpoint.service_type.as_deref(), Some("LoadBalancer"));
    }
}
