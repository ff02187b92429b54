//! Connection settings for the local and remote clusters.
//!
//! The kubeconfig resolution chain (highest priority first):
//! 1. Explicit `--kubeconfig` / `--remote-kubeconfig` flag
//! 2. `LIQOCTL_KUBECONFIG` / `LIQOCTL_REMOTE_KUBECONFIG` environment variable
//! 3. Local cluster only: kube defaults (`KUBECONFIG` env / `~/.kube/config`)
//!
//! The remote cluster has no implicit default; a command that needs it fails
//! unless a remote kubeconfig or context is given.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use liqo_common::DEFAULT_LIQO_NAMESPACE;

use crate::commands::parse_duration;
use crate::{Error, Result};

const LOCAL_KUBECONFIG_ENV: &str = "LIQOCTL_KUBECONFIG";
const REMOTE_KUBECONFIG_ENV: &str = "LIQOCTL_REMOTE_KUBECONFIG";

/// Which side of a two-cluster command a connection belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterScope {
    Local,
    Remote,
}

impl ClusterScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl std::fmt::Display for ClusterScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved settings for connecting to one cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub scope: ClusterScope,
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    /// Target namespace; `None` uses the kubeconfig context's namespace
    pub namespace: Option<String>,
    pub liqo_namespace: String,
}

/// Flags shared by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Kubeconfig of the local cluster
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context of the local cluster
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Target namespace in the local cluster
    #[arg(long, short = 'n', global = true)]
    pub namespace: Option<String>,

    /// Namespace where Liqo runs in the local cluster
    #[arg(long, global = true, default_value = DEFAULT_LIQO_NAMESPACE)]
    pub liqo_namespace: String,

    /// Kubeconfig of the remote cluster
    #[arg(long, global = true)]
    pub remote_kubeconfig: Option<PathBuf>,

    /// Kubeconfig context of the remote cluster
    #[arg(long, global = true)]
    pub remote_context: Option<String>,

    /// Target namespace in the remote cluster
    #[arg(long, global = true)]
    pub remote_namespace: Option<String>,

    /// Namespace where Liqo runs in the remote cluster
    #[arg(long, global = true, default_value = DEFAULT_LIQO_NAMESPACE)]
    pub remote_liqo_namespace: String,

    /// Overall deadline for the command (e.g. 30s, 2m, 1h)
    #[arg(long, global = true, env = "LIQOCTL_TIMEOUT", default_value = "2m")]
    pub timeout: String,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    /// Settings for the local cluster
    pub fn local(&self) -> ConnectionOptions {
        ConnectionOptions {
            scope: ClusterScope::Local,
            kubeconfig: resolve_kubeconfig(self.kubeconfig.as_deref(), LOCAL_KUBECONFIG_ENV),
            context: self.context.clone(),
            namespace: self.namespace.clone(),
            liqo_namespace: self.liqo_namespace.clone(),
        }
    }

    /// Settings for the remote cluster; fails if none were given
    pub fn remote(&self) -> Result<ConnectionOptions> {
        let kubeconfig =
            resolve_kubeconfig(self.remote_kubeconfig.as_deref(), REMOTE_KUBECONFIG_ENV);
        if kubeconfig.is_none() && self.remote_context.is_none() {
            return Err(Error::validation(format!(
                "this command needs the remote cluster: set --remote-kubeconfig, \
                 --remote-context or {}",
                REMOTE_KUBECONFIG_ENV
            )));
        }
        Ok(ConnectionOptions {
            scope: ClusterScope::Remote,
            kubeconfig,
            context: self.remote_context.clone(),
            namespace: self.remote_namespace.clone(),
            liqo_namespace: self.remote_liqo_namespace.clone(),
        })
    }

    /// Parsed `--timeout`
    pub fn timeout(&self) -> Result<Duration> {
        parse_duration(&self.timeout)
    }
}

/// Resolve a kubeconfig path using the priority chain.
///
/// Returns `None` to fall back to kube defaults.
pub fn resolve_kubeconfig(explicit: Option<&Path>, env_var: &str) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    match std::env::var(env_var) {
        Ok(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        global: GlobalArgs,
    }

    #[test]
    fn explicit_kubeconfig_wins() {
        let result = resolve_kubeconfig(Some(Path::new("/explicit/path")), "LIQOCTL_TEST_UNSET");
        assert_eq!(result, Some(PathBuf::from("/explicit/path")));
        assert_eq!(resolve_kubeconfig(None, "LIQOCTL_TEST_UNSET"), None);
    }

    #[test]
    fn defaults_and_remote_requirement() {
        let cli = TestCli::parse_from(["liqoctl"]);
        let local = cli.global.local();
        assert_eq!(local.scope, ClusterScope::Local);
        assert_eq!(local.liqo_namespace, "liqo");
        assert!(cli.global.timeout().is_ok());

        let cli = TestCli::parse_from([
            "liqoctl",
            "--remote-context",
            "provider",
            "--remote-liqo-namespace",
            "liqo-system",
        ]);
        let remote = cli.global.remote().unwrap();
        assert_eq!(remote.scope, ClusterScope::Remote);
        assert_eq!(remote.context.as_deref(), Some("provider"));
        assert_eq!(remote.liqo_namespace, "liqo-system");
    }
}
