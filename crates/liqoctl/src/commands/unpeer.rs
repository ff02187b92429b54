//! Unpeer command - tear down a peering from the consumer side
//!
//! Usage: liqoctl unpeer --remote-kubeconfig <provider kubeconfig>
//!
//! Order: offloading (ResourceSlices, then VirtualNodes), authentication,
//! networking, tenant namespaces. Networking is left in place when the
//! peering is bidirectional, since the reverse peering still uses it.
//!
//! ResourceSlice removal is always awaited, `--wait` or not: the
//! authentication teardown refuses to run while any slice is left.

use clap::Args;
use liqo_common::crd::{PeeringRole, ResourceSlice, VirtualNode};
use liqo_common::{Error, OpContext, Result as LiqoResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::commands::{network, unauthenticate};
use crate::config::GlobalArgs;
use crate::error::PhaseExt;
use crate::factory::Factory;
use crate::getters;
use crate::wait::Waiter;
use crate::Result;

/// Disable the peering where the local cluster consumes the remote one
#[derive(Args, Debug, Clone, Default)]
pub struct UnpeerArgs {
    /// Also delete the tenant namespaces on both clusters
    #[arg(long)]
    pub delete_namespaces: bool,

    /// Wait for every deleted resource to disappear
    #[arg(long)]
    pub wait: bool,
}

/// Role of `remote_cluster_id` as seen from `factory`'s cluster.
///
/// The ForeignCluster status is authoritative once the controller filled it;
/// before that the role is derived from the peering artifacts present.
pub async fn peering_role(factory: &Factory, remote_cluster_id: &str) -> LiqoResult<PeeringRole> {
    let res = factory.resources();
    let reported = getters::get_foreign_cluster_by_id(res, remote_cluster_id)
        .await?
        .and_then(|fc| fc.role())
        .filter(|role| *role != PeeringRole::Unknown);
    if let Some(role) = reported {
        return Ok(role);
    }

    let (tenant, identity, virtual_nodes) = tokio::try_join!(
        getters::get_tenant_by_cluster_id(res, remote_cluster_id, None),
        getters::get_control_plane_identity(res, remote_cluster_id, None),
        getters::list_virtual_nodes_by_cluster_id(res, remote_cluster_id, None),
    )?;
    let role = PeeringRole::derive(
        tenant.is_some(),
        identity.is_some(),
        !virtual_nodes.is_empty(),
    );
    debug!(remote_cluster_id = %remote_cluster_id, role = ?role, "Derived peering role");
    Ok(role)
}

/// Unpeering between the local consumer and the remote provider
pub struct Options<'a> {
    pub local: &'a Factory,
    pub remote: &'a Factory,
    pub delete_namespaces: bool,
    pub wait: bool,
}

impl Options<'_> {
    pub async fn run(&self, ctx: &OpContext) -> Result<()> {
        let l = self.local.scope_label();
        let r = self.remote.scope_label();
        ctx.ensure_live("unpeer")?;

        let local_id = self.local.cluster_id().await.in_phase("read cluster ID", l)?;
        let remote_id = self.remote.cluster_id().await.in_phase("read cluster ID", r)?;

        let role = peering_role(self.local, &remote_id)
            .await
            .in_phase("detect peering role", l)?;
        let bidirectional = role.is_bidirectional();
        if bidirectional && self.delete_namespaces {
            return Err(Error::precondition(format!(
                "the peering with cluster {} is bidirectional: deleting the tenant namespaces \
                 would also break the reverse peering",
                remote_id
            ))
            .into());
        }

        self.disable_offloading(ctx, &remote_id)
            .await
            .in_phase("offloading", l)?;

        unauthenticate::Options {
            consumer: self.local,
            provider: self.remote,
            wait: self.wait,
        }
        .run(ctx)
        .await
        .in_phase("authentication", l)?;

        if bidirectional {
            info!(remote_cluster_id = %remote_id, "Peering is bidirectional, keeping networking");
        } else {
            network::Options::new(self.local, self.remote)
                .run_reset(ctx)
                .await
                .in_phase("networking", l)?;
        }

        if self.delete_namespaces {
            self.delete_tenant_namespaces(ctx, &local_id, &remote_id).await?;
        }

        info!(local = %local_id, remote = %remote_id, "Unpeered");
        Ok(())
    }

    async fn disable_offloading(&self, ctx: &OpContext, remote_id: &str) -> LiqoResult<()> {
        let res = self.local.resources();
        let waiter = Waiter::new(self.local);

        let slices = getters::list_resource_slices_by_cluster_id(res, remote_id, None).await?;
        for rs in &slices {
            let name = rs.metadata.name.as_deref().unwrap_or_default();
            ctx.run(
                "delete resource slice",
                res.delete::<ResourceSlice>(rs.metadata.namespace.as_deref(), name),
            )
            .await?;
        }
        if !slices.is_empty() {
            waiter.for_resource_slices_absence(ctx, remote_id, None).await?;
        }

        let nodes = getters::list_virtual_nodes_by_cluster_id(res, remote_id, None).await?;
        for vn in &nodes {
            let name = vn.metadata.name.as_deref().unwrap_or_default();
            ctx.run(
                "delete virtual node",
                res.delete::<VirtualNode>(vn.metadata.namespace.as_deref(), name),
            )
            .await?;
        }
        if self.wait && !nodes.is_empty() {
            waiter.for_virtual_nodes_absence(ctx, remote_id, None).await?;
        }

        info!(
            remote_cluster_id = %remote_id,
            resource_slices = slices.len(),
            virtual_nodes = nodes.len(),
            "Offloading disabled"
        );
        Ok(())
    }

    async fn delete_tenant_namespaces(
        &self,
        ctx: &OpContext,
        local_id: &str,
        remote_id: &str,
    ) -> Result<()> {
        let l = self.local.scope_label();
        let r = self.remote.scope_label();
        ctx.run(
            "delete tenant namespace",
            self.local.tenant_namespaces().delete(remote_id),
        )
        .await
        .in_phase("delete tenant namespace", l)?;
        ctx.run(
            "delete tenant namespace",
            self.remote.tenant_namespaces().delete(local_id),
        )
        .await
        .in_phase("delete tenant namespace", r)?;

        if self.wait {
            Waiter::new(self.local)
                .for_tenant_namespace_absence(ctx, remote_id)
                .await
                .in_phase("wait for tenant namespace deletion", l)?;
            Waiter::new(self.remote)
                .for_tenant_namespace_absence(ctx, local_id)
                .await
                .in_phase("wait for tenant namespace deletion", r)?;
        }
        Ok(())
    }
}

/// Run the unpeer command
pub async fn run(args: UnpeerArgs, global: &GlobalArgs, cancel: CancellationToken) -> Result<()> {
    let ctx = super::op_context(global, cancel)?;
    let local = Factory::connect(&global.local()).await?;
    let remote = Factory::connect(&global.remote()?).await?;

    Options {
        local: &local,
        remote: &remote,
        delete_namespaces: args.delete_namespaces,
        wait: args.wait,
    }
    .run(&ctx)
    .await
}
