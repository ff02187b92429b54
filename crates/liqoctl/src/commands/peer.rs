//! Peer command - networking, authentication and offloading in one go
//!
//! Usage: liqoctl peer --remote-kubeconfig <provider kubeconfig>
//!
//! The local cluster consumes resources of the remote one. Each phase is
//! idempotent, so an interrupted peering is resumed by running the command
//! again.

use clap::{ArgAction, Args, ValueEnum};
use liqo_common::OpContext;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::commands::authenticate;
use crate::commands::network::{self, GatewayArgs, GatewayClientOptions, GatewayServerOptions};
use crate::commands::resource_slice::{ensure_resource_slice, ResourceSliceOptions};
use crate::config::GlobalArgs;
use crate::error::PhaseExt;
use crate::factory::Factory;
use crate::wait::Waiter;
use crate::Result;

/// Which cluster hosts the gateway server
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ServerServiceLocation {
    /// The consumer (local) cluster
    Consumer,
    /// The provider (remote) cluster
    #[default]
    Provider,
}

/// Peer the local cluster (consumer) with the remote cluster (provider)
#[derive(Args, Debug, Clone)]
pub struct PeerArgs {
    /// Cluster hosting the gateway server
    #[arg(long, value_enum, default_value_t = ServerServiceLocation::Provider)]
    pub server_service_location: ServerServiceLocation,

    /// Skip the networking phase (the clusters are already reachable)
    #[arg(long)]
    pub networking_disabled: bool,

    #[command(flatten)]
    pub gateway: GatewayArgs,

    /// Reach the provider API server through the network tunnel
    #[arg(long)]
    pub in_band: bool,

    /// Explicit proxy URL towards the provider API server
    #[arg(long)]
    pub proxy_url: Option<String>,

    /// Request resources with a ResourceSlice
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub create_resource_slice: bool,

    /// Name of the ResourceSlice (defaults to the provider cluster ID)
    #[arg(long)]
    pub resource_slice_name: Option<String>,

    /// Resource class of the ResourceSlice
    #[arg(long, default_value = "default")]
    pub resource_slice_class: String,

    /// Create a VirtualNode for the ResourceSlice
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub create_virtual_node: bool,

    /// Wait for the VirtualNode to appear
    #[arg(long)]
    pub wait: bool,
}

/// Full peering between the local consumer and the remote provider
pub struct Options<'a> {
    pub local: &'a Factory,
    pub remote: &'a Factory,
    pub server_service_location: ServerServiceLocation,
    pub networking_disabled: bool,
    pub skip_validation: bool,
    pub disable_sharing_keys: bool,
    pub gateway_server: GatewayServerOptions,
    pub gateway_client: GatewayClientOptions,
    pub in_band: bool,
    pub proxy_url: Option<String>,
    /// `None` skips offloading
    pub resource_slice: Option<ResourceSliceOptions>,
}

impl<'a> Options<'a> {
    /// Defaults: server on the provider, networking on, one ResourceSlice
    pub fn new(local: &'a Factory, remote: &'a Factory) -> Self {
        Self {
            local,
            remote,
            server_service_location: ServerServiceLocation::default(),
            networking_disabled: false,
            skip_validation: false,
            disable_sharing_keys: false,
            gateway_server: GatewayServerOptions::default(),
            gateway_client: GatewayClientOptions::default(),
            in_band: false,
            proxy_url: None,
            resource_slice: Some(ResourceSliceOptions::default()),
        }
    }

    /// Network options with the gateway roles assigned by location
    pub fn network_options(&self) -> network::Options<'a> {
        let (client, server) = match self.server_service_location {
            ServerServiceLocation::Provider => (self.local, self.remote),
            ServerServiceLocation::Consumer => (self.remote, self.local),
        };
        let mut opts = network::Options::new(client, server);
        opts.skip_validation = self.skip_validation;
        opts.disable_sharing_keys = self.disable_sharing_keys;
        opts.wait = true;
        opts.gateway_server = self.gateway_server.clone();
        opts.gateway_client = self.gateway_client.clone();
        opts
    }

    pub async fn run(&self, ctx: &OpContext) -> Result<()> {
        let l = self.local.scope_label();

        if self.networking_disabled {
            info!("Networking disabled, skipping the network setup");
        } else {
            self.network_options()
                .run_connect(ctx)
                .await
                .in_phase("networking", l)?;
        }

        authenticate::Options {
            consumer: self.local,
            provider: self.remote,
            in_band: self.in_band,
            proxy_url: self.proxy_url.clone(),
        }
        .run(ctx)
        .await
        .in_phase("authentication", l)?;

        if let Some(rs_opts) = &self.resource_slice {
            let provider_id = self
                .remote
                .cluster_id()
                .await
                .in_phase("offloading", self.remote.scope_label())?;
            let out = ensure_resource_slice(
                ctx,
                self.local,
                &Waiter::new(self.local),
                &provider_id,
                rs_opts,
            )
            .await
            .in_phase("offloading", l)?;
            if let Some(vn) = out.virtual_node {
                info!(virtual_node = ?vn.metadata.name, "VirtualNode ready");
            }
        }

        info!("Peering completed");
        Ok(())
    }
}

/// Run the peer command
pub async fn run(args: PeerArgs, global: &GlobalArgs, cancel: CancellationToken) -> Result<()> {
    let ctx = super::op_context(global, cancel)?;
    let local = Factory::connect(&global.local()).await?;
    let remote = Factory::connect(&global.remote()?).await?;

    let mut options = Options::new(&local, &remote);
    options.server_service_location = args.server_service_location;
    options.networking_disabled = args.networking_disabled;
    options.skip_validation = args.gateway.skip_validation;
    options.disable_sharing_keys = args.gateway.disable_sharing_keys;
    options.gateway_server = args.gateway.server_options();
    options.gateway_client = args.gateway.client_options();
    options.in_band = args.in_band;
    options.proxy_url = args.proxy_url;
    options.resource_slice = args.create_resource_slice.then(|| ResourceSliceOptions {
        name: args.resource_slice_name,
        class: args.resource_slice_class,
        create_virtual_node: args.create_virtual_node,
        wait_virtual_node: args.wait,
    });

    options.run(&ctx).await
}
