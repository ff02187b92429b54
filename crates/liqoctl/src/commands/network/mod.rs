//! Network commands - set up and tear down the tunnel between two clusters
//!
//! Usage:
//!   liqoctl network init       --remote-kubeconfig <path>
//!   liqoctl network connect    --remote-kubeconfig <path>
//!   liqoctl network disconnect --remote-kubeconfig <path>
//!   liqoctl network reset      --remote-kubeconfig <path>
//!
//! `connect` runs `init` (Configuration exchange, confirmed on both sides)
//! before any gateway is created. The local cluster hosts the gateway client
//! and the remote cluster the gateway server.

pub mod cluster;

use clap::{Args, Subcommand};
use liqo_common::OpContext;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GlobalArgs;
use crate::error::PhaseExt;
use crate::factory::Factory;
use crate::Result;

pub use cluster::{
    endpoint_differs, gateway_owner, Cluster, GatewayClientOptions, GatewayRole,
    GatewayServerOptions,
};

/// Gateway flags shared by `network connect` and `peer`
#[derive(Args, Debug, Clone)]
pub struct GatewayArgs {
    /// Service type exposing the gateway server
    #[arg(long, default_value = cluster::DEFAULT_SERVICE_TYPE)]
    pub server_service_type: String,

    /// Port of the gateway server service
    #[arg(long, default_value_t = cluster::DEFAULT_SERVER_PORT)]
    pub server_port: i32,

    /// Node port of the gateway server service (NodePort only)
    #[arg(long)]
    pub server_node_port: Option<i32>,

    /// Load balancer IP of the gateway server service (LoadBalancer only)
    #[arg(long)]
    pub server_load_balancer_ip: Option<String>,

    /// Tunnel MTU
    #[arg(long, default_value_t = cluster::DEFAULT_MTU)]
    pub mtu: i32,

    /// Gateway server template name
    #[arg(long, default_value = cluster::DEFAULT_SERVER_TEMPLATE)]
    pub server_template_name: String,

    /// Gateway server template namespace (defaults to the Liqo namespace)
    #[arg(long)]
    pub server_template_namespace: Option<String>,

    /// Gateway client template name
    #[arg(long, default_value = cluster::DEFAULT_CLIENT_TEMPLATE)]
    pub client_template_name: String,

    /// Gateway client template namespace (defaults to the Liqo namespace)
    #[arg(long)]
    pub client_template_namespace: Option<String>,

    /// Do not check that the gateway templates exist
    #[arg(long)]
    pub skip_validation: bool,

    /// Do not exchange the tunnel public keys
    #[arg(long)]
    pub disable_sharing_keys: bool,
}

impl GatewayArgs {
    pub fn server_options(&self) -> GatewayServerOptions {
        GatewayServerOptions {
            service_type: self.server_service_type.clone(),
            port: self.server_port,
            node_port: self.server_node_port,
            load_balancer_ip: self.server_load_balancer_ip.clone(),
            mtu: self.mtu,
            template_name: self.server_template_name.clone(),
            template_namespace: self.server_template_namespace.clone(),
        }
    }

    pub fn client_options(&self) -> GatewayClientOptions {
        GatewayClientOptions {
            mtu: self.mtu,
            template_name: self.client_template_name.clone(),
            template_namespace: self.client_template_namespace.clone(),
        }
    }
}

/// Manage the network between the local and the remote cluster
#[derive(Args, Debug)]
pub struct NetworkArgs {
    #[command(subcommand)]
    pub command: NetworkCommand,
}

#[derive(Subcommand, Debug)]
pub enum NetworkCommand {
    /// Exchange the network configurations
    Init,
    /// Exchange configurations and create the gateways
    Connect {
        #[command(flatten)]
        gateway: GatewayArgs,

        /// Wait for the tunnel to be established
        #[arg(long)]
        wait: bool,
    },
    /// Delete the gateways, keeping the configurations
    Disconnect,
    /// Delete the gateways and the configurations
    Reset,
}

/// Identities and namespaces of a connected pair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peers {
    pub client_id: String,
    pub server_id: String,
    /// Namespace on the client cluster holding the resources towards the server
    pub client_namespace: String,
    /// Namespace on the server cluster holding the resources towards the client
    pub server_namespace: String,
}

/// Network setup between two clusters
pub struct Options<'a> {
    /// Cluster hosting the gateway client
    pub client: &'a Factory,
    /// Cluster hosting the gateway server
    pub server: &'a Factory,
    /// Requested network namespace on the client cluster (empty or `default`
    /// means the tenant namespace)
    pub client_namespace: String,
    /// Requested network namespace on the server cluster
    pub server_namespace: String,
    pub skip_validation: bool,
    pub disable_sharing_keys: bool,
    pub wait: bool,
    pub gateway_server: GatewayServerOptions,
    pub gateway_client: GatewayClientOptions,
}

impl<'a> Options<'a> {
    /// Defaults for a client/server pair, networking in the tenant namespaces
    pub fn new(client: &'a Factory, server: &'a Factory) -> Self {
        Self {
            client,
            server,
            client_namespace: String::new(),
            server_namespace: String::new(),
            skip_validation: false,
            disable_sharing_keys: false,
            wait: false,
            gateway_server: GatewayServerOptions::default(),
            gateway_client: GatewayClientOptions::default(),
        }
    }

    fn labels(&self) -> (&'static str, &'static str) {
        (self.client.scope_label(), self.server.scope_label())
    }

    async fn peers(
        &self,
        ctx: &OpContext,
        client: &Cluster<'_>,
        server: &Cluster<'_>,
        create: bool,
    ) -> Result<Peers> {
        let (c, s) = self.labels();
        let (client_id, server_id) = tokio::try_join!(
            async { client.local_cluster_id().await.in_phase("read cluster ID", c) },
            async { server.local_cluster_id().await.in_phase("read cluster ID", s) },
        )?;

        let (client_namespace, server_namespace) = if create {
            tokio::try_join!(
                async {
                    client
                        .ensure_network_namespace(ctx, &self.client_namespace, &server_id)
                        .await
                        .in_phase("resolve network namespace", c)
                },
                async {
                    server
                        .ensure_network_namespace(ctx, &self.server_namespace, &client_id)
                        .await
                        .in_phase("resolve network namespace", s)
                },
            )?
        } else {
            tokio::try_join!(
                async {
                    client
                        .network_namespace(&self.client_namespace, &server_id)
                        .await
                        .in_phase("resolve network namespace", c)
                },
                async {
                    server
                        .network_namespace(&self.server_namespace, &client_id)
                        .await
                        .in_phase("resolve network namespace", s)
                },
            )?
        };

        Ok(Peers {
            client_id,
            server_id,
            client_namespace,
            server_namespace,
        })
    }

    /// Exchange the Configurations and wait until both clusters have
    /// computed the remapped CIDRs
    pub async fn run_init(&self, ctx: &OpContext) -> Result<Peers> {
        let client = Cluster::new(self.client);
        let server = Cluster::new(self.server);
        self.init_with(ctx, &client, &server).await
    }

    async fn init_with(&self, ctx: &OpContext, client: &Cluster<'_>, server: &Cluster<'_>) -> Result<Peers> {
        let (c, s) = self.labels();
        let peers = self.peers(ctx, client, server, true).await?;

        let client_conf = client
            .forge_configuration(&peers.server_namespace)
            .await
            .in_phase("forge configuration", c)?;
        let server_conf = server
            .forge_configuration(&peers.client_namespace)
            .await
            .in_phase("forge configuration", s)?;
        server
            .setup_configuration(ctx, &peers.client_id, &client_conf)
            .await
            .in_phase("apply configuration", s)?;
        client
            .setup_configuration(ctx, &peers.server_id, &server_conf)
            .await
            .in_phase("apply configuration", c)?;

        tokio::try_join!(
            async {
                client
                    .wait_configuration(ctx, &peers.server_id, &peers.client_namespace)
                    .await
                    .in_phase("wait for configuration", c)
            },
            async {
                server
                    .wait_configuration(ctx, &peers.client_id, &peers.server_namespace)
                    .await
                    .in_phase("wait for configuration", s)
            },
        )?;
        info!(client = %peers.client_id, server = %peers.server_id, "Network initialized");
        Ok(peers)
    }

    /// Initialize, then create the gateways and exchange their keys.
    ///
    /// A pair that already has both gateways with the requested endpoint is
    /// left untouched.
    pub async fn run_connect(&self, ctx: &OpContext) -> Result<()> {
        let (c, s) = self.labels();
        let client = Cluster::new(self.client);
        let server = Cluster::new(self.server);
        let peers = self.init_with(ctx, &client, &server).await?;

        if !self.skip_validation {
            client
                .check_gateway_template(
                    GatewayRole::Client,
                    &self.gateway_client.template_name,
                    self.gateway_client.template_namespace.as_deref(),
                )
                .await
                .in_phase("validate gateway template", c)?;
            server
                .check_gateway_template(
                    GatewayRole::Server,
                    &self.gateway_server.template_name,
                    self.gateway_server.template_namespace.as_deref(),
                )
                .await
                .in_phase("validate gateway template", s)?;
        }

        if self.already_connected(&client, &server, &peers).await? {
            info!(
                client = %peers.client_id,
                server = %peers.server_id,
                "Gateways already in place, nothing to do"
            );
            return Ok(());
        }

        let (gateway_server, endpoint) = server
            .ensure_gateway_server(ctx, &peers.client_id, &peers.server_namespace, &self.gateway_server)
            .await
            .in_phase("ensure gateway server", s)?;
        let gateway_client = client
            .ensure_gateway_client(
                ctx,
                &peers.server_id,
                &peers.client_namespace,
                &endpoint,
                &self.gateway_client,
            )
            .await
            .in_phase("ensure gateway client", c)?;

        if !self.disable_sharing_keys {
            let server_name = gateway_server.metadata.name.clone().unwrap_or_default();
            let client_name = gateway_client.metadata.name.clone().unwrap_or_default();
            let (server_key, client_key) = tokio::try_join!(
                async {
                    server
                        .gateway_public_key(
                            ctx,
                            GatewayRole::Server,
                            &peers.client_id,
                            &peers.server_namespace,
                            &server_name,
                        )
                        .await
                        .in_phase("get gateway public key", s)
                },
                async {
                    client
                        .gateway_public_key(
                            ctx,
                            GatewayRole::Client,
                            &peers.server_id,
                            &peers.client_namespace,
                            &client_name,
                        )
                        .await
                        .in_phase("get gateway public key", c)
                },
            )?;
            client
                .ensure_public_key(
                    ctx,
                    &peers.server_id,
                    &peers.client_namespace,
                    &server_key,
                    gateway_owner(&gateway_client),
                )
                .await
                .in_phase("ensure public key", c)?;
            server
                .ensure_public_key(
                    ctx,
                    &peers.client_id,
                    &peers.server_namespace,
                    &client_key,
                    gateway_owner(&gateway_server),
                )
                .await
                .in_phase("ensure public key", s)?;
        }

        if self.wait {
            tokio::try_join!(
                async {
                    client
                        .wait_connection(ctx, &peers.server_id, &peers.client_namespace)
                        .await
                        .in_phase("wait for connection", c)
                },
                async {
                    server
                        .wait_connection(ctx, &peers.client_id, &peers.server_namespace)
                        .await
                        .in_phase("wait for connection", s)
                },
            )?;
        }

        info!(client = %peers.client_id, server = %peers.server_id, "Network connected");
        Ok(())
    }

    async fn already_connected(&self, client: &Cluster<'_>, server: &Cluster<'_>, peers: &Peers) -> Result<bool> {
        let (c, s) = self.labels();
        let Some(existing) = server
            .gateway_server(&peers.client_id, &peers.server_namespace)
            .await
            .in_phase("check gateway server", s)?
        else {
            return Ok(false);
        };
        let forged =
            server.forge_gateway_server(&peers.client_id, &peers.server_namespace, &self.gateway_server);
        if existing.spec.endpoint != forged.spec.endpoint {
            return Ok(false);
        }
        let client_exists = client
            .gateway_client(&peers.server_id, &peers.client_namespace)
            .await
            .in_phase("check gateway client", c)?
            .is_some();
        Ok(client_exists)
    }

    /// Delete the gateways on both clusters, keeping the Configurations so
    /// the address remapping survives a reconnect
    pub async fn run_disconnect(&self, ctx: &OpContext) -> Result<Peers> {
        let (c, s) = self.labels();
        ctx.ensure_live("network disconnect")?;
        let client = Cluster::new(self.client);
        let server = Cluster::new(self.server);
        let peers = self.peers(ctx, &client, &server, false).await?;

        let deleted_client = client
            .delete_gateways(ctx, &peers.server_id, &peers.client_namespace)
            .await
            .in_phase("delete gateways", c)?;
        let deleted_server = server
            .delete_gateways(ctx, &peers.client_id, &peers.server_namespace)
            .await
            .in_phase("delete gateways", s)?;
        info!(
            client = %peers.client_id,
            server = %peers.server_id,
            deleted = deleted_client + deleted_server,
            "Network disconnected"
        );
        Ok(peers)
    }

    /// Disconnect, then delete the Configurations on both clusters
    pub async fn run_reset(&self, ctx: &OpContext) -> Result<()> {
        let (c, s) = self.labels();
        let peers = self.run_disconnect(ctx).await?;
        let client = Cluster::new(self.client);
        let server = Cluster::new(self.server);
        client
            .delete_configuration(ctx, &peers.server_id)
            .await
            .in_phase("delete configuration", c)?;
        server
            .delete_configuration(ctx, &peers.client_id)
            .await
            .in_phase("delete configuration", s)?;
        info!(client = %peers.client_id, server = %peers.server_id, "Network reset");
        Ok(())
    }
}

/// Run a network subcommand
pub async fn run(args: NetworkArgs, global: &GlobalArgs, cancel: CancellationToken) -> Result<()> {
    let ctx = super::op_context(global, cancel)?;
    let local = Factory::connect(&global.local()).await?;
    let remote = Factory::connect(&global.remote()?).await?;

    let mut options = Options::new(&local, &remote);
    options.client_namespace = local.namespace().to_string();
    options.server_namespace = remote.namespace().to_string();

    match args.command {
        NetworkCommand::Init => options.run_init(&ctx).await.map(|_| ()),
        NetworkCommand::Connect { gateway, wait } => {
            options.skip_validation = gateway.skip_validation;
            options.disable_sharing_keys = gateway.disable_sharing_keys;
            options.wait = wait;
            options.gateway_server = gateway.server_options();
            options.gateway_client = gateway.client_options();
            options.run_connect(&ctx).await
        }
        NetworkCommand::Disconnect => options.run_disconnect(&ctx).await.map(|_| ()),
        NetworkCommand::Reset => options.run_reset(&ctx).await,
    }
}
