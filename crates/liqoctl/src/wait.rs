//! Blocking waits on eventually consistent remote state.
//!
//! Every `for_*` method polls one resource through the getters until a
//! predicate holds, the operation deadline passes or the operation is
//! cancelled. All of them share [`poll_until`]: the first check runs
//! immediately, a missing resource means "not yet", and any other API error
//! ends the wait at once. Progress is reported as tracing events.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use kube::Resource;
use liqo_common::crd::{
    is_configuration_status_set, Configuration, Connection, EndpointStatus, Identity,
    NamespaceOffloading, ObjectRef, OffloadingPhase, ResourceSlice,
    ResourceSliceConditionStatus, ResourceSliceConditionType, Tenant, VirtualNode, IP,
};
use liqo_common::kube_utils::{label_selector, poll_until, secret_data, DEFAULT_POLL_INTERVAL};
use liqo_common::store::Object;
use liqo_common::{
    Error, OpContext, Resources, Result, GATEWAY_COMPONENT_LABEL, GATEWAY_COMPONENT_VALUE,
    NONCE_SECRET_FIELD, NONCE_SECRET_LABEL, REMOTE_CLUSTER_ID_LABEL,
    SIGNED_NONCE_SECRET_FIELD, SIGNED_NONCE_SECRET_LABEL,
};
use tracing::{debug, info, warn};

use crate::factory::Factory;
use crate::getters;

/// Name of the NamespaceOffloading object inside an offloaded namespace
pub const NAMESPACE_OFFLOADING_NAME: &str = "offloading";

/// Polls one cluster for the conditions the peering protocol waits on
#[derive(Clone)]
pub struct Waiter {
    resources: Resources,
    cluster: &'static str,
    interval: Duration,
}

fn secret_field(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    secret_data(secret, key).filter(|bytes| !bytes.is_empty())
}

fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

impl Waiter {
    /// Waiter over a factory's cluster
    pub fn new(factory: &Factory) -> Self {
        Self::with_resources(factory.resources().clone(), factory.scope_label())
    }

    /// Waiter over arbitrary resources, labelled `cluster` in logs
    pub fn with_resources(resources: Resources, cluster: &'static str) -> Self {
        Self {
            resources,
            cluster,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the polling interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    async fn wait<T, F, Fut>(&self, ctx: &OpContext, condition: String, check: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        info!(cluster = %self.cluster, "Waiting for {}", condition);
        match poll_until(ctx, self.interval, &condition, check).await {
            Ok(value) => {
                info!(cluster = %self.cluster, "{} ready", condition);
                Ok(value)
            }
            Err(e) => {
                warn!(cluster = %self.cluster, error = %e, "Failed waiting for {}", condition);
                Err(e)
            }
        }
    }

    async fn wait_absent<F, Fut>(&self, ctx: &OpContext, condition: String, mut count: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<usize>>,
    {
        let cluster = self.cluster;
        self.wait(ctx, condition, || {
            let fut = count();
            async move {
                match fut.await {
                    Ok(0) => Ok(Some(())),
                    Ok(n) => {
                        debug!(cluster = %cluster, remaining = n, "Still present");
                        Ok(None)
                    }
                    Err(e) if e.is_not_found() => Ok(Some(())),
                    Err(e) => Err(e),
                }
            }
        })
        .await
    }

    /// Nonce generated by the provider for consumer `remote_cluster_id`
    pub async fn for_nonce(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
        tenant_namespace: &str,
    ) -> Result<Vec<u8>> {
        let res = &self.resources;
        let selector = label_selector([
            (NONCE_SECRET_LABEL, "true"),
            (REMOTE_CLUSTER_ID_LABEL, remote_cluster_id),
        ]);
        let selector = selector.as_str();
        self.wait(ctx, format!("nonce for cluster {}", remote_cluster_id), || async move {
            let secret =
                getters::get_secret_by_labels(res, tenant_namespace, selector, remote_cluster_id)
                    .await?;
            Ok(secret.and_then(|s| secret_field(&s, NONCE_SECRET_FIELD)))
        })
        .await
    }

    /// Signature of the nonce issued by provider `remote_cluster_id`
    pub async fn for_signed_nonce(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
        tenant_namespace: &str,
    ) -> Result<Vec<u8>> {
        let res = &self.resources;
        let selector = label_selector([
            (SIGNED_NONCE_SECRET_LABEL, "true"),
            (REMOTE_CLUSTER_ID_LABEL, remote_cluster_id),
        ]);
        let selector = selector.as_str();
        self.wait(
            ctx,
            format!("signed nonce for cluster {}", remote_cluster_id),
            || async move {
                let secret = getters::get_secret_by_labels(
                    res,
                    tenant_namespace,
                    selector,
                    remote_cluster_id,
                )
                .await?;
                Ok(secret.and_then(|s| secret_field(&s, SIGNED_NONCE_SECRET_FIELD)))
            },
        )
        .await
    }

    /// Tenant of consumer `remote_cluster_id` with credentials and namespace filled
    pub async fn for_tenant_status(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
        namespace: &str,
    ) -> Result<Tenant> {
        let res = &self.resources;
        self.wait(ctx, format!("tenant {} status", remote_cluster_id), || async move {
            let tenant =
                getters::get_tenant_by_cluster_id(res, remote_cluster_id, Some(namespace)).await?;
            Ok(tenant.filter(Tenant::is_status_filled))
        })
        .await
    }

    /// ControlPlane Identity towards provider `remote_cluster_id` with its
    /// kubeconfig secret generated
    pub async fn for_identity_status(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
        namespace: &str,
    ) -> Result<Identity> {
        let res = &self.resources;
        self.wait(
            ctx,
            format!("identity for cluster {} kubeconfig", remote_cluster_id),
            || async move {
                let identity =
                    getters::get_control_plane_identity(res, remote_cluster_id, Some(namespace))
                        .await?;
                Ok(identity.filter(Identity::has_kubeconfig_secret))
            },
        )
        .await
    }

    /// Configuration for `remote_cluster_id` with its remapped CIDRs computed
    pub async fn for_configuration(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
        namespace: &str,
    ) -> Result<Configuration> {
        let res = &self.resources;
        self.wait(
            ctx,
            format!("network configuration for cluster {}", remote_cluster_id),
            || async move {
                let conf = getters::get_configuration_by_cluster_id(
                    res,
                    remote_cluster_id,
                    Some(namespace),
                )
                .await?;
                Ok(conf.filter(is_configuration_status_set))
            },
        )
        .await
    }

    /// Endpoint exposed by a GatewayServer
    pub async fn for_gateway_server_status_endpoint(
        &self,
        ctx: &OpContext,
        namespace: &str,
        name: &str,
    ) -> Result<EndpointStatus> {
        let res = &self.resources;
        self.wait(
            ctx,
            format!("gateway server {}/{} endpoint", namespace, name),
            || async move {
                let gs: Option<liqo_common::crd::GatewayServer> =
                    res.get(Some(namespace), name).await?;
                Ok(gs
                    .and_then(|gs| gs.status)
                    .and_then(|s| s.endpoint)
                    .filter(|e| !e.addresses.is_empty()))
            },
        )
        .await
    }

    /// Key secret of a GatewayServer
    pub async fn for_gateway_server_secret_ref(
        &self,
        ctx: &OpContext,
        namespace: &str,
        name: &str,
    ) -> Result<ObjectRef> {
        let res = &self.resources;
        self.wait(
            ctx,
            format!("gateway server {}/{} secret", namespace, name),
            || async move {
                let gs: Option<liqo_common::crd::GatewayServer> =
                    res.get(Some(namespace), name).await?;
                Ok(gs
                    .and_then(|gs| gs.status)
                    .and_then(|s| s.secret_ref)
                    .filter(|r| !r.name.is_empty()))
            },
        )
        .await
    }

    /// Key secret of a GatewayClient
    pub async fn for_gateway_client_secret_ref(
        &self,
        ctx: &OpContext,
        namespace: &str,
        name: &str,
    ) -> Result<ObjectRef> {
        let res = &self.resources;
        self.wait(
            ctx,
            format!("gateway client {}/{} secret", namespace, name),
            || async move {
                let gc: Option<liqo_common::crd::GatewayClient> =
                    res.get(Some(namespace), name).await?;
                Ok(gc
                    .and_then(|gc| gc.status)
                    .and_then(|s| s.secret_ref)
                    .filter(|r| !r.name.is_empty()))
            },
        )
        .await
    }

    /// At least one gateway pod for `remote_cluster_id` is Ready
    pub async fn for_gateway_pod_ready(
        &self,
        ctx: &OpContext,
        namespace: &str,
        remote_cluster_id: &str,
    ) -> Result<()> {
        let res = &self.resources;
        let selector = label_selector([
            (GATEWAY_COMPONENT_LABEL, GATEWAY_COMPONENT_VALUE),
            (REMOTE_CLUSTER_ID_LABEL, remote_cluster_id),
        ]);
        let selector = selector.as_str();
        self.wait(
            ctx,
            format!("gateway pod for cluster {}", remote_cluster_id),
            || async move {
                let pods: Vec<Pod> = res.list(Some(namespace), selector).await?;
                Ok(pods.iter().any(pod_is_ready).then_some(()))
            },
        )
        .await
    }

    /// Connection for `remote_cluster_id` reporting Connected
    pub async fn for_connection(
        &self,
        ctx: &OpContext,
        namespace: &str,
        remote_cluster_id: &str,
    ) -> Result<Connection> {
        let res = &self.resources;
        self.wait(
            ctx,
            format!("connection to cluster {}", remote_cluster_id),
            || async move {
                let conn =
                    getters::get_connection_by_cluster_id(res, remote_cluster_id, Some(namespace))
                        .await?;
                Ok(conn.filter(Connection::is_connected))
            },
        )
        .await
    }

    /// Provider's verdict on a ResourceSlice; `Denied` ends the wait with an error
    pub async fn for_resource_slice_authentication(
        &self,
        ctx: &OpContext,
        namespace: &str,
        name: &str,
    ) -> Result<ResourceSlice> {
        let res = &self.resources;
        let condition = format!("resource slice {}/{} authentication", namespace, name);
        let label = condition.as_str();
        self.wait(ctx, condition.clone(), || async move {
            let Some(rs) = res.get::<ResourceSlice>(Some(namespace), name).await? else {
                return Ok(None);
            };
            let verdict = rs
                .condition(ResourceSliceConditionType::Authentication)
                .map(|c| (c.status, c.message.clone()));
            match verdict {
                Some((ResourceSliceConditionStatus::Accepted, _)) => Ok(Some(rs)),
                Some((ResourceSliceConditionStatus::Denied, message)) => {
                    Err(Error::ConditionFailed {
                        condition: label.to_string(),
                        message: message.unwrap_or_else(|| "denied by the provider".to_string()),
                    })
                }
                None => Ok(None),
            }
        })
        .await
    }

    /// Address assigned to an IP resource
    pub async fn for_ip_status(&self, ctx: &OpContext, namespace: &str, name: &str) -> Result<String> {
        let res = &self.resources;
        self.wait(ctx, format!("IP {}/{} allocation", namespace, name), || async move {
            let ip: Option<IP> = res.get(Some(namespace), name).await?;
            Ok(ip
                .and_then(|ip| ip.status)
                .and_then(|s| s.ip)
                .filter(|ip| !ip.is_empty()))
        })
        .await
    }

    /// Offloading of `namespace` settled.
    ///
    /// `SomeFailed` and `AllFailed` end the wait with an error,
    /// `NoClusterSelected` succeeds with a warning, and a status older than
    /// the current generation keeps polling.
    pub async fn for_offloading(&self, ctx: &OpContext, namespace: &str) -> Result<OffloadingPhase> {
        let res = &self.resources;
        let condition = format!("offloading of namespace {}", namespace);
        let label = condition.as_str();
        let phase = self
            .wait(ctx, condition.clone(), || async move {
                let Some(nsoff) = res
                    .get::<NamespaceOffloading>(Some(namespace), NAMESPACE_OFFLOADING_NAME)
                    .await?
                else {
                    return Ok(None);
                };
                let Some(status) = nsoff.status.as_ref() else {
                    return Ok(None);
                };
                if status.observed_generation != nsoff.metadata.generation {
                    return Ok(None);
                }
                match status.offloading_phase {
                    Some(phase @ (OffloadingPhase::Ready | OffloadingPhase::NoClusterSelected)) => {
                        Ok(Some(phase))
                    }
                    Some(phase @ (OffloadingPhase::SomeFailed | OffloadingPhase::AllFailed)) => {
                        Err(Error::ConditionFailed {
                            condition: label.to_string(),
                            message: format!("offloading phase is {:?}", phase),
                        })
                    }
                    _ => Ok(None),
                }
            })
            .await?;
        if phase == OffloadingPhase::NoClusterSelected {
            warn!(
                namespace = %namespace,
                "No cluster selected for offloading: check the cluster selector"
            );
        }
        Ok(phase)
    }

    /// Tenant namespace for `remote_cluster_id` is gone
    pub async fn for_tenant_namespace_absence(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
    ) -> Result<()> {
        let res = &self.resources;
        let selector = label_selector([
            (liqo_common::TENANT_NAMESPACE_LABEL, "true"),
            (REMOTE_CLUSTER_ID_LABEL, remote_cluster_id),
        ]);
        let selector = selector.as_str();
        self.wait_absent(
            ctx,
            format!("tenant namespace for cluster {} deletion", remote_cluster_id),
            || async move {
                let items: Vec<Namespace> = res.list(None, selector).await?;
                Ok(items.len())
            },
        )
        .await
    }

    /// No ResourceSlice towards `remote_cluster_id` remains
    pub async fn for_resource_slices_absence(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
        namespace: Option<&str>,
    ) -> Result<()> {
        let res = &self.resources;
        self.wait_absent(
            ctx,
            format!("resource slices for cluster {} deletion", remote_cluster_id),
            || async move {
                let items =
                    getters::list_resource_slices_by_cluster_id(res, remote_cluster_id, namespace)
                        .await?;
                Ok(items.len())
            },
        )
        .await
    }

    /// No VirtualNode backed by `remote_cluster_id` remains
    pub async fn for_virtual_nodes_absence(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
        namespace: Option<&str>,
    ) -> Result<()> {
        let res = &self.resources;
        self.wait_absent(
            ctx,
            format!("virtual nodes for cluster {} deletion", remote_cluster_id),
            || async move {
                let items =
                    getters::list_virtual_nodes_by_cluster_id(res, remote_cluster_id, namespace)
                        .await?;
                Ok(items.len())
            },
        )
        .await
    }

    /// At least one VirtualNode backed by `remote_cluster_id` exists
    pub async fn for_virtual_node(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
        namespace: Option<&str>,
    ) -> Result<VirtualNode> {
        let res = &self.resources;
        self.wait(
            ctx,
            format!("virtual node for cluster {}", remote_cluster_id),
            || async move {
                let mut items =
                    getters::list_virtual_nodes_by_cluster_id(res, remote_cluster_id, namespace)
                        .await?;
                Ok(items.pop())
            },
        )
        .await
    }

    /// GatewayServer `namespace/name` is gone
    pub async fn for_gateway_server_absence(
        &self,
        ctx: &OpContext,
        namespace: &str,
        name: &str,
    ) -> Result<()> {
        self.for_absence::<liqo_common::crd::GatewayServer>(ctx, Some(namespace), name)
            .await
    }

    /// Any named object is gone
    pub async fn for_absence<K: Object>(
        &self,
        ctx: &OpContext,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        let res = &self.resources;
        let kind = K::kind(&());
        let target = match namespace {
            Some(ns) => format!("{}/{}", ns, name),
            None => name.to_string(),
        };
        self.wait_absent(ctx, format!("{} {} deletion", kind, target), || async move {
            let obj: Option<K> = res.get(namespace, name).await?;
            Ok(usize::from(obj.is_some()))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use liqo_common::crd::{
        NamespaceOffloadingSpec, NamespaceOffloadingStatus, ResourceSliceCondition,
        ResourceSliceSpec, ResourceSliceStatus,
    };
    use liqo_common::testing::FakeCluster;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn waiter(fake: &Arc<FakeCluster>) -> Waiter {
        Waiter::with_resources(fake.resources(), "local").with_interval(Duration::from_millis(5))
    }

    fn ctx() -> OpContext {
        OpContext::with_timeout(Duration::from_secs(5))
    }

    fn offloading(generation: i64, observed: i64, phase: OffloadingPhase) -> NamespaceOffloading {
        let mut nsoff = NamespaceOffloading::new(NAMESPACE_OFFLOADING_NAME, NamespaceOffloadingSpec::default());
        nsoff.metadata.namespace = Some("app".into());
        nsoff.metadata.generation = Some(generation);
        nsoff.status = Some(NamespaceOffloadingStatus {
            observed_generation: Some(observed),
            offloading_phase: Some(phase),
        });
        nsoff
    }

    #[tokio::test]
    async fn expired_deadline_returns_without_waiting() {
        let fake = Arc::new(FakeCluster::new());
        fake.insert(offloading(1, 1, OffloadingPhase::Ready));
        let expired = OpContext::with_timeout(Duration::ZERO);

        let start = tokio::time::Instant::now();
        let err = waiter(&fake).for_offloading(&expired, "app").await.unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn offloading_phases() {
        let fake = Arc::new(FakeCluster::new());
        fake.insert(offloading(1, 1, OffloadingPhase::NoClusterSelected));
        let phase = waiter(&fake).for_offloading(&ctx(), "app").await.unwrap();
        assert_eq!(phase, OffloadingPhase::NoClusterSelected);

        let fake = Arc::new(FakeCluster::new());
        fake.insert(offloading(1, 1, OffloadingPhase::SomeFailed));
        let err = waiter(&fake).for_offloading(&ctx(), "app").await.unwrap_err();
        assert!(matches!(err, Error::ConditionFailed { .. }));
    }

    #[tokio::test]
    async fn offloading_ignores_stale_status() {
        let fake = Arc::new(FakeCluster::new());
        fake.insert(offloading(2, 1, OffloadingPhase::AllFailed));
        let short = OpContext::with_timeout(Duration::from_millis(60));
        let err = waiter(&fake).for_offloading(&short, "app").await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn resource_slice_denial_is_terminal() {
        let fake = Arc::new(FakeCluster::new());
        let mut rs = ResourceSlice::new("cluster-b", ResourceSliceSpec::default());
        rs.metadata.namespace = Some("liqo-tenant-cluster-b".into());
        rs.status = Some(ResourceSliceStatus {
            conditions: vec![ResourceSliceCondition {
                type_: ResourceSliceConditionType::Authentication,
                status: ResourceSliceConditionStatus::Denied,
                message: Some("tenant cordoned".into()),
            }],
        });
        fake.insert(rs);

        let err = waiter(&fake)
            .for_resource_slice_authentication(&ctx(), "liqo-tenant-cluster-b", "cluster-b")
            .await
            .unwrap_err();
        match err {
            Error::ConditionFailed { message, .. } => assert_eq!(message, "tenant cordoned"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn gateway_pod_readiness() {
        let fake = Arc::new(FakeCluster::new());
        let mut pod = Pod::default();
        pod.metadata.name = Some("gw-0".into());
        pod.metadata.namespace = Some("t".into());
        pod.metadata.labels = Some(BTreeMap::from([
            (GATEWAY_COMPONENT_LABEL.to_string(), GATEWAY_COMPONENT_VALUE.to_string()),
            (REMOTE_CLUSTER_ID_LABEL.to_string(), "cluster-b".to_string()),
        ]));
        pod.status = Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "Ready".into(),
                status: "False".into(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        fake.insert(pod);

        let w = waiter(&fake);
        let short = OpContext::with_timeout(Duration::from_millis(60));
        assert!(w
            .for_gateway_pod_ready(&short, "t", "cluster-b")
            .await
            .unwrap_err()
            .is_timeout());

        fake.mutate::<Pod>(Some("t"), "gw-0", |p| {
            if let Some(conds) = p.status.as_mut().and_then(|s| s.conditions.as_mut()) {
                conds[0].status = "True".into();
            }
        });
        w.for_gateway_pod_ready(&ctx(), "t", "cluster-b").await.unwrap();
    }

    #[tokio::test]
    async fn absence_waits_succeed_on_empty() {
        let fake = Arc::new(FakeCluster::new());
        let w = waiter(&fake);
        w.for_resource_slices_absence(&ctx(), "cluster-b", None).await.unwrap();
        w.for_virtual_nodes_absence(&ctx(), "cluster-b", None).await.unwrap();
        w.for_tenant_namespace_absence(&ctx(), "cluster-b").await.unwrap();
        w.for_gateway_server_absence(&ctx(), "t", "cluster-b").await.unwrap();
    }
}
