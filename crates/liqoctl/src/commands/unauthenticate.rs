//! Unauthenticate command - revoke the trust set up by `authenticate`
//!
//! Usage: liqoctl unauthenticate --remote-kubeconfig <provider kubeconfig>
//!
//! Refuses to run while the consumer still has ResourceSlices towards the
//! provider: offloading must be torn down first (`liqoctl unpeer`).

use clap::Args;
use liqo_common::crd::{Identity, Tenant};
use liqo_common::{Error, OpContext, Result as LiqoResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::GlobalArgs;
use crate::error::PhaseExt;
use crate::factory::Factory;
use crate::getters;
use crate::wait::Waiter;
use crate::Result;

/// Remove the authentication between the local cluster (consumer) and the
/// remote cluster (provider)
#[derive(Args, Debug, Clone, Default)]
pub struct UnauthenticateArgs {
    /// Wait for the removed resources to disappear
    #[arg(long)]
    pub wait: bool,
}

/// Unauthentication steps bound to one cluster
pub struct Cluster<'a> {
    factory: &'a Factory,
    waiter: Waiter,
}

impl<'a> Cluster<'a> {
    pub fn new(factory: &'a Factory) -> Self {
        Self {
            factory,
            waiter: Waiter::new(factory),
        }
    }

    /// Consumer: fail if any ResourceSlice towards `remote_cluster_id` is left
    pub async fn check_leftover_resource_slices(&self, remote_cluster_id: &str) -> LiqoResult<()> {
        let slices = getters::list_resource_slices_by_cluster_id(
            self.factory.resources(),
            remote_cluster_id,
            None,
        )
        .await?;
        if slices.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = slices
            .iter()
            .map(|rs| {
                format!(
                    "{}/{}",
                    rs.metadata.namespace.as_deref().unwrap_or_default(),
                    rs.metadata.name.as_deref().unwrap_or_default()
                )
            })
            .collect();
        Err(Error::precondition(format!(
            "found {} ResourceSlice(s) towards cluster {} ({}): remove them before unauthenticating",
            slices.len(),
            remote_cluster_id,
            names.join(", ")
        )))
    }

    /// Consumer: delete the ControlPlane Identity towards `remote_cluster_id`.
    /// Returns the deleted identity's namespace and name.
    pub async fn delete_control_plane_identity(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
    ) -> LiqoResult<Option<(String, String)>> {
        let res = self.factory.resources();
        let Some(identity) =
            getters::get_control_plane_identity(res, remote_cluster_id, None).await?
        else {
            info!(remote_cluster_id = %remote_cluster_id, "No control plane identity to delete");
            return Ok(None);
        };
        let ns = identity.metadata.namespace.unwrap_or_default();
        let name = identity.metadata.name.unwrap_or_default();
        ctx.run("delete identity", res.delete::<Identity>(Some(&ns), &name))
            .await?;
        Ok(Some((ns, name)))
    }

    /// Provider: delete the Tenant of consumer `remote_cluster_id`.
    /// Returns the deleted tenant's namespace and name.
    pub async fn delete_tenant(
        &self,
        ctx: &OpContext,
        remote_cluster_id: &str,
    ) -> LiqoResult<Option<(String, String)>> {
        let res = self.factory.resources();
        let Some(tenant) = getters::get_tenant_by_cluster_id(res, remote_cluster_id, None).await?
        else {
            info!(remote_cluster_id = %remote_cluster_id, "No tenant to delete");
            return Ok(None);
        };
        let ns = tenant.metadata.namespace.unwrap_or_default();
        let name = tenant.metadata.name.unwrap_or_default();
        ctx.run("delete tenant", res.delete::<Tenant>(Some(&ns), &name))
            .await?;
        Ok(Some((ns, name)))
    }

    pub fn waiter(&self) -> &Waiter {
        &self.waiter
    }
}

/// Unauthentication between two clusters
pub struct Options<'a> {
    pub consumer: &'a Factory,
    pub provider: &'a Factory,
    pub wait: bool,
}

impl Options<'_> {
    /// Check for leftover ResourceSlices, then delete the Identity on the
    /// consumer and the Tenant on the provider
    pub async fn run(&self, ctx: &OpContext) -> Result<()> {
        let c = self.consumer.scope_label();
        let p = self.provider.scope_label();
        ctx.ensure_live("unauthenticate")?;

        let consumer_id = self.consumer.cluster_id().await.in_phase("read cluster ID", c)?;
        let provider_id = self.provider.cluster_id().await.in_phase("read cluster ID", p)?;
        let consumer = Cluster::new(self.consumer);
        let provider = Cluster::new(self.provider);

        consumer
            .check_leftover_resource_slices(&provider_id)
            .await
            .in_phase("check resource slices", c)?;

        let identity = consumer
            .delete_control_plane_identity(ctx, &provider_id)
            .await
            .in_phase("delete identity", c)?;
        let tenant = provider
            .delete_tenant(ctx, &consumer_id)
            .await
            .in_phase("delete tenant", p)?;

        if self.wait {
            if let Some((ns, name)) = &identity {
                consumer
                    .waiter()
                    .for_absence::<Identity>(ctx, Some(ns), name)
                    .await
                    .in_phase("wait for identity deletion", c)?;
            }
            if let Some((ns, name)) = &tenant {
                provider
                    .waiter()
                    .for_absence::<Tenant>(ctx, Some(ns), name)
                    .await
                    .in_phase("wait for tenant deletion", p)?;
            }
        }

        if identity.is_none() && tenant.is_none() {
            warn!(consumer = %consumer_id, provider = %provider_id, "Clusters were not authenticated");
        } else {
            info!(consumer = %consumer_id, provider = %provider_id, "Authentication removed");
        }
        Ok(())
    }
}

/// Run the unauthenticate command
pub async fn run(args: UnauthenticateArgs, global: &GlobalArgs, cancel: CancellationToken) -> Result<()> {
    let ctx = super::op_context(global, cancel)?;
    let local = Factory::connect(&global.local()).await?;
    let remote = Factory::connect(&global.remote()?).await?;

    Options {
        consumer: &local,
        provider: &remote,
        wait: args.wait,
    }
    .run(&ctx)
    .await
    .in_phase("unauthentication", local.scope_label())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterScope;
    use k8s_openapi::api::core::v1::ConfigMap;
    use liqo_common::crd::{IdentitySpec, IdentityType, TenantSpec};
    use liqo_common::testing::{FakeCluster, Verb};
    use liqo_common::{
        CLUSTER_ID_CONFIGMAP_KEY, CLUSTER_ID_CONFIGMAP_NAME, IDENTITY_TYPE_LABEL,
        REMOTE_CLUSTER_ID_LABEL,
    };
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn cluster(id: &str, scope: ClusterScope) -> (Arc<FakeCluster>, Factory) {
        let fake = Arc::new(FakeCluster::new());
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some(CLUSTER_ID_CONFIGMAP_NAME.into());
        cm.metadata.namespace = Some("liqo".into());
        cm.data = Some(BTreeMap::from([(
            CLUSTER_ID_CONFIGMAP_KEY.to_string(),
            id.to_string(),
        )]));
        fake.insert(cm);
        let factory = Factory::with_store(scope, fake.clone());
        (fake, factory)
    }

    fn control_plane_identity(provider: &str) -> Identity {
        let mut identity = Identity::new(&format!("controlplane-{provider}"), IdentitySpec {
            cluster_id: provider.into(),
            type_: IdentityType::ControlPlane,
            ..Default::default()
        });
        identity.metadata.namespace = Some(format!("liqo-tenant-{provider}"));
        identity.metadata.labels = Some(BTreeMap::from([
            (REMOTE_CLUSTER_ID_LABEL.to_string(), provider.to_string()),
            (IDENTITY_TYPE_LABEL.to_string(), IdentityType::ControlPlane.as_str().to_string()),
        ]));
        identity
    }

    fn tenant_of(consumer: &str) -> Tenant {
        let mut tenant = Tenant::new(consumer, TenantSpec {
            cluster_id: consumer.into(),
            ..Default::default()
        });
        tenant.metadata.namespace = Some(format!("liqo-tenant-{consumer}"));
        tenant.metadata.labels = Some(BTreeMap::from([(
            REMOTE_CLUSTER_ID_LABEL.to_string(),
            consumer.to_string(),
        )]));
        tenant
    }

    #[tokio::test]
    async fn deletes_identity_and_tenant() {
        let (consumer_fake, consumer) = cluster("cluster-a", ClusterScope::Local);
        let (provider_fake, provider) = cluster("cluster-b", ClusterScope::Remote);

        consumer_fake.insert(control_plane_identity("cluster-b"));
        provider_fake.insert(tenant_of("cluster-a"));

        Options {
            consumer: &consumer,
            provider: &provider,
            wait: true,
        }
        .run(&OpContext::with_timeout(Duration::from_secs(5)))
        .await
        .unwrap();

        assert!(consumer_fake.list::<Identity>(None).is_empty());
        assert!(provider_fake.list::<Tenant>(None).is_empty());
        assert_eq!(consumer_fake.ops_of_verb(Verb::Delete).len(), 1);
        assert_eq!(provider_fake.ops_of_verb(Verb::Delete).len(), 1);
    }

    #[tokio::test]
    async fn cancellation_after_identity_deletion_keeps_the_tenant() {
        let (consumer_fake, consumer) = cluster("cluster-a", ClusterScope::Local);
        let (provider_fake, provider) = cluster("cluster-b", ClusterScope::Remote);
        consumer_fake.insert(control_plane_identity("cluster-b"));
        provider_fake.insert(tenant_of("cluster-a"));

        let ctx = OpContext::with_timeout(Duration::from_secs(5));
        let token = ctx.cancellation_token().clone();
        consumer_fake.on::<Identity>(&[Verb::Delete], move |_| token.cancel());

        let err = Options {
            consumer: &consumer,
            provider: &provider,
            wait: false,
        }
        .run(&ctx)
        .await
        .unwrap_err();

        assert!(matches!(err.liqo(), Some(Error::Canceled { .. })), "{err}");
        assert!(consumer_fake.list::<Identity>(None).is_empty());
        assert_eq!(provider_fake.list::<Tenant>(None).len(), 1);
        assert!(provider_fake.ops().is_empty());
    }

    #[tokio::test]
    async fn nothing_to_remove_is_not_an_error() {
        let (consumer_fake, consumer) = cluster("cluster-a", ClusterScope::Local);
        let (provider_fake, provider) = cluster("cluster-b", ClusterScope::Remote);

        Options {
            consumer: &consumer,
            provider: &provider,
            wait: false,
        }
        .run(&OpContext::with_timeout(Duration::from_secs(5)))
        .await
        .unwrap();

        assert!(consumer_fake.ops().is_empty());
        assert!(provider_fake.ops().is_empty());
    }
}
