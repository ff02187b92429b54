//! liqoctl library: peering orchestration between Liqo clusters

pub mod commands;
pub mod config;
pub mod error;
pub mod factory;
pub mod getters;
pub mod wait;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use config::GlobalArgs;

/// liqoctl - Peer Kubernetes clusters with Liqo
#[derive(Parser, Debug)]
#[command(name = "liqoctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Peer the local cluster with a remote provider
    Peer(commands::peer::PeerArgs),
    /// Disable the peering with a remote provider
    Unpeer(commands::unpeer::UnpeerArgs),
    /// Authenticate the local cluster with a remote provider
    Authenticate(commands::authenticate::AuthenticateArgs),
    /// Remove the authentication with a remote provider
    Unauthenticate(commands::unauthenticate::UnauthenticateArgs),
    /// Manage the network between two clusters
    Network(commands::network::NetworkArgs),
    /// Forced operations for unreachable clusters
    Force(commands::force_unpeer::ForceArgs),
    /// Manage the Tenant of a consumer cluster
    Tenant(commands::tenant::TenantArgs),
}

impl Cli {
    /// Run the CLI command; Ctrl-C cancels it
    pub async fn run(self) -> Result<()> {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                on_signal.cancel();
            }
        });

        let global = &self.global;
        match self.command {
            Commands::Peer(args) => commands::peer::run(args, global, cancel).await,
            Commands::Unpeer(args) => commands::unpeer::run(args, global, cancel).await,
            Commands::Authenticate(args) => commands::authenticate::run(args, global, cancel).await,
            Commands::Unauthenticate(args) => {
                commands::unauthenticate::run(args, global, cancel).await
            }
            Commands::Network(args) => commands::network::run(args, global, cancel).await,
            Commands::Force(args) => commands::force_unpeer::run(args, global, cancel).await,
            Commands::Tenant(args) => commands::tenant::run(args, global, cancel).await,
        }
    }
}
