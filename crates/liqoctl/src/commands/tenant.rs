//! Tenant commands - gate a consumer on the provider
//!
//! Usage:
//!   liqoctl tenant cordon   <consumer-cluster-id>
//!   liqoctl tenant uncordon <consumer-cluster-id>
//!   liqoctl tenant drain    <consumer-cluster-id>
//!
//! Run against the provider (local) cluster.

use clap::{Args, Subcommand};
use liqo_common::crd::{Tenant, TenantCondition};
use liqo_common::{Error, OpContext};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GlobalArgs;
use crate::error::PhaseExt;
use crate::factory::Factory;
use crate::getters;
use crate::Result;

/// Manage the Tenant of a consumer cluster
#[derive(Args, Debug)]
pub struct TenantArgs {
    #[command(subcommand)]
    pub command: TenantCommand,
}

#[derive(Subcommand, Debug)]
pub enum TenantCommand {
    /// Refuse new ResourceSlices from the consumer
    Cordon {
        /// ID of the consumer cluster
        cluster_id: String,
    },
    /// Accept ResourceSlices from the consumer again
    Uncordon {
        /// ID of the consumer cluster
        cluster_id: String,
    },
    /// Refuse new ResourceSlices and release the existing ones
    Drain {
        /// ID of the consumer cluster
        cluster_id: String,
    },
}

impl TenantCommand {
    fn target(&self) -> (&str, TenantCondition) {
        match self {
            Self::Cordon { cluster_id } => (cluster_id.as_str(), TenantCondition::Cordoned),
            Self::Uncordon { cluster_id } => (cluster_id.as_str(), TenantCondition::Active),
            Self::Drain { cluster_id } => (cluster_id.as_str(), TenantCondition::Drained),
        }
    }
}

/// Set the admission gate of the Tenant of `consumer_cluster_id`
pub async fn set_tenant_condition(
    ctx: &OpContext,
    provider: &Factory,
    consumer_cluster_id: &str,
    condition: TenantCondition,
) -> Result<Tenant> {
    let p = provider.scope_label();
    ctx.ensure_live("set tenant condition")?;
    let res = provider.resources();

    let tenant = getters::get_tenant_by_cluster_id(res, consumer_cluster_id, None)
        .await
        .in_phase("get tenant", p)?
        .ok_or_else(|| Error::missing("Tenant", consumer_cluster_id))
        .in_phase("get tenant", p)?;
    let name = tenant.metadata.name.unwrap_or_default();
    let namespace = tenant.metadata.namespace;

    let patch = json!({ "spec": { "tenantCondition": condition } });
    let patched = ctx
        .run(
            "patch tenant",
            res.patch_merge::<Tenant>(namespace.as_deref(), &name, &patch),
        )
        .await
        .in_phase("patch tenant", p)?;
    info!(
        consumer = %consumer_cluster_id,
        tenant = %name,
        condition = ?condition,
        "Tenant condition set"
    );
    Ok(patched)
}

/// Run a tenant subcommand
pub async fn run(args: TenantArgs, global: &GlobalArgs, cancel: CancellationToken) -> Result<()> {
    let ctx = super::op_context(global, cancel)?;
    let local = Factory::connect(&global.local()).await?;
    let (cluster_id, condition) = args.command.target();
    set_tenant_condition(&ctx, &local, cluster_id, condition)
        .await
        .map(|_| ())
}
