//! Authenticate command - establish trust between a consumer and a provider
//!
//! Usage: liqoctl authenticate --remote-kubeconfig <provider kubeconfig>
//!
//! The local cluster is the consumer, the remote cluster the provider:
//! 1. Both clusters: read the cluster ID, ensure the tenant namespace
//! 2. Provider: issue a nonce
//! 3. Consumer: sign the nonce
//! 4. In-band only: derive the proxy URL through the remapped CIDRs
//! 5. Consumer: build the Tenant; provider: apply it and wait for credentials
//! 6. Provider: build the Identity; consumer: apply it and wait for the kubeconfig

pub mod cluster;

use clap::Args;
use liqo_common::OpContext;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GlobalArgs;
use crate::error::PhaseExt;
use crate::factory::Factory;
use crate::Result;

pub use cluster::Cluster;

/// Authenticate the local cluster (consumer) with the remote cluster (provider)
#[derive(Args, Debug, Clone, Default)]
pub struct AuthenticateArgs {
    /// Reach the provider API server through the network tunnel
    #[arg(long)]
    pub in_band: bool,

    /// Explicit proxy URL towards the provider API server (skips in-band derivation)
    #[arg(long)]
    pub proxy_url: Option<String>,
}

/// Authentication between two connected clusters
pub struct Options<'a> {
    pub consumer: &'a Factory,
    pub provider: &'a Factory,
    pub in_band: bool,
    pub proxy_url: Option<String>,
}

impl<'a> Options<'a> {
    /// Run the whole handshake. Every step is idempotent, so a failed run can
    /// simply be repeated.
    pub async fn run(&self, ctx: &OpContext) -> Result<()> {
        self.run_with(ctx, Cluster::new(self.consumer), Cluster::new(self.provider))
            .await
    }

    /// Run the handshake with prebuilt cluster objects
    pub async fn run_with(
        &self,
        ctx: &OpContext,
        consumer: Cluster<'_>,
        provider: Cluster<'_>,
    ) -> Result<()> {
        let c = self.consumer.scope_label();
        let p = self.provider.scope_label();

        let (consumer_id, provider_id) = tokio::try_join!(
            async { consumer.set_local_cluster_id().await.in_phase("read cluster ID", c) },
            async { provider.set_local_cluster_id().await.in_phase("read cluster ID", p) },
        )?;
        info!(consumer = %consumer_id, provider = %provider_id, "Authenticating");

        let in_band = self.in_band && self.proxy_url.is_none();
        if in_band {
            consumer
                .check_in_band_networking(&provider_id)
                .await
                .in_phase("check in-band networking", c)?;
        }

        let (consumer_ns, provider_ns) = tokio::try_join!(
            async {
                consumer
                    .ensure_tenant_namespace(ctx, &provider_id)
                    .await
                    .in_phase("ensure tenant namespace", c)
            },
            async {
                provider
                    .ensure_tenant_namespace(ctx, &consumer_id)
                    .await
                    .in_phase("ensure tenant namespace", p)
            },
        )?;

        let nonce = provider
            .ensure_nonce(ctx, &consumer_id, &provider_ns)
            .await
            .in_phase("ensure nonce", p)?;
        let signature = consumer
            .ensure_signed_nonce(ctx, &provider_id, &consumer_ns, &nonce)
            .await
            .in_phase("ensure signed nonce", c)?;

        let proxy_url = match (&self.proxy_url, in_band) {
            (Some(url), _) => Some(url.clone()),
            (None, true) => {
                let ip = provider
                    .api_proxy_remapped_ip(ctx)
                    .await
                    .in_phase("get API server proxy IP", p)?;
                let remapped = consumer
                    .remap_ip_external_cidr(&provider_id, &ip)
                    .await
                    .in_phase("remap API server proxy IP", c)?;
                Some(cluster::proxy_url_for(&remapped))
            }
            (None, false) => None,
        };

        let tenant = consumer
            .generate_tenant(&provider_ns, &signature, proxy_url.as_deref())
            .await
            .in_phase("generate tenant", c)?;
        let tenant = provider
            .ensure_tenant(ctx, &tenant)
            .await
            .in_phase("ensure tenant", p)?;

        let identity = provider
            .generate_identity(&tenant, &consumer_ns)
            .await
            .in_phase("generate identity", p)?;
        consumer
            .ensure_identity(ctx, &identity)
            .await
            .in_phase("ensure identity", c)?;

        info!(consumer = %consumer_id, provider = %provider_id, "Authentication completed");
        Ok(())
    }
}

/// Run the authenticate command
pub async fn run(args: AuthenticateArgs, global: &GlobalArgs, cancel: CancellationToken) -> Result<()> {
    let ctx = super::op_context(global, cancel)?;
    let local = Factory::connect(&global.local()).await?;
    let remote = Factory::connect(&global.remote()?).await?;

    Options {
        consumer: &local,
        provider: &remote,
        in_band: args.in_band,
        proxy_url: args.proxy_url,
    }
    .run(&ctx)
    .await
    .in_phase("authentication", local.scope_label())
}
