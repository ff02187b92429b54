//! Force unpeer - one-sided teardown when the remote cluster is gone
//!
//! Usage: liqoctl force unpeer <cluster-id>
//!
//! Never contacts the remote cluster. The ForeignCluster is marked
//! permanently unreachable so the local controllers stop waiting for the
//! peer, then the local tenant namespace is deleted.

use clap::{Args, Subcommand};
use liqo_common::crd::ForeignCluster;
use liqo_common::tenant_namespace::validate_cluster_id;
use liqo_common::{Error, OpContext, PERMANENTLY_UNREACHABLE_ANNOTATION};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::commands::unpeer::peering_role;
use crate::config::GlobalArgs;
use crate::error::PhaseExt;
use crate::factory::Factory;
use crate::getters;
use crate::wait::Waiter;
use crate::Result;

/// Forced operations for unreachable peers
#[derive(Args, Debug)]
pub struct ForceArgs {
    #[command(subcommand)]
    pub command: ForceCommand,
}

#[derive(Subcommand, Debug)]
pub enum ForceCommand {
    /// Unpeer from a cluster that can no longer be reached
    Unpeer {
        /// ID of the remote cluster
        cluster_id: String,

        /// Wait for the tenant namespace to disappear
        #[arg(long)]
        wait: bool,
    },
}

/// Forced unpeering of one remote cluster
pub struct Options<'a> {
    pub local: &'a Factory,
    pub remote_cluster_id: String,
    pub wait: bool,
}

impl Options<'_> {
    pub async fn run(&self, ctx: &OpContext) -> Result<()> {
        let l = self.local.scope_label();
        let id = self.remote_cluster_id.as_str();
        ctx.ensure_live("force unpeer")?;
        validate_cluster_id(id)?;

        let res = self.local.resources();
        let fc = getters::get_foreign_cluster_by_id(res, id)
            .await
            .in_phase("get foreign cluster", l)?
            .ok_or_else(|| Error::missing("ForeignCluster", id))
            .in_phase("get foreign cluster", l)?;

        let role = peering_role(self.local, id)
            .await
            .in_phase("detect peering role", l)?;
        if role.is_bidirectional() {
            warn!(
                remote_cluster_id = %id,
                "Peering is bidirectional: the reverse peering loses its tenant namespace too"
            );
        }

        let name = fc.metadata.name.unwrap_or_default();
        let patch = json!({
            "metadata": {
                "annotations": { PERMANENTLY_UNREACHABLE_ANNOTATION: "true" }
            }
        });
        ctx.run(
            "mark foreign cluster unreachable",
            res.patch_merge::<ForeignCluster>(None, &name, &patch),
        )
        .await
            .in_phase("mark foreign cluster unreachable", l)?;
        info!(remote_cluster_id = %id, "ForeignCluster marked as permanently unreachable");

        let deleted = ctx
            .run(
                "delete tenant namespace",
                self.local.tenant_namespaces().delete(id),
            )
            .await
            .in_phase("delete tenant namespace", l)?;
        if deleted && self.wait {
            Waiter::new(self.local)
                .for_tenant_namespace_absence(ctx, id)
                .await
                .in_phase("wait for tenant namespace deletion", l)?;
        }

        info!(remote_cluster_id = %id, "Forced unpeer completed");
        Ok(())
    }
}

/// Run a force subcommand
pub async fn run(args: ForceArgs, global: &GlobalArgs, cancel: CancellationToken) -> Result<()> {
    let ctx = super::op_context(global, cancel)?;
    let local = Factory::connect(&global.local()).await?;

    match args.command {
        ForceCommand::Unpeer { cluster_id, wait } => {
            Options {
                local: &local,
                remote_cluster_id: cluster_id,
                wait,
            }
            .run(&ctx)
            .await
        }
    }
}
