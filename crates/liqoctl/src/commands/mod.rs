//! CLI commands

use std::future::Future;
use std::time::Duration;

use liqo_common::OpContext;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::GlobalArgs;
use crate::factory::Factory;
use crate::{Error, Result};

pub mod authenticate;
pub mod force_unpeer;
pub mod network;
pub mod peer;
pub mod resource_slice;
pub mod tenant;
pub mod unauthenticate;
pub mod unpeer;

/// Parse a human-friendly duration string.
///
/// Supports `Nh` (hours), `Nm` (minutes), `Ns` (seconds) and raw seconds.
/// Examples: "1h", "30m", "90s", "120".
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || {
        Error::validation(format!(
            "invalid duration '{}', expected e.g. 1h, 30m, 90s",
            s
        ))
    };
    let (digits, unit) = if let Some(hours) = s.strip_suffix('h') {
        (hours, 3600)
    } else if let Some(minutes) = s.strip_suffix('m') {
        (minutes, 60)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1)
    } else {
        (s, 1)
    };
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    n.checked_mul(unit)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

/// Build the single operation context of a command from `--timeout`
pub fn op_context(global: &GlobalArgs, cancel: CancellationToken) -> Result<OpContext> {
    let timeout = global.timeout()?;
    debug!(timeout = ?timeout, "Operation deadline set");
    Ok(OpContext::with_deadline(Instant::now() + timeout, cancel))
}

/// Namespace hosting the networking resources towards a peer.
///
/// An empty or `default` request means the tenant namespace of the peer,
/// obtained through `tenant_namespace` only in that case; anything else is
/// used as given.
pub async fn resolve_network_namespace<F, Fut>(
    requested: &str,
    tenant_namespace: F,
) -> liqo_common::Result<String>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = liqo_common::Result<String>>,
{
    match requested {
        "" | "default" => tenant_namespace().await,
        other => Ok(other.to_string()),
    }
}

/// Name of the tenant namespace for `remote_cluster_id` if one exists,
/// falling back to the conventional name. Used by teardown paths that must
/// not create anything.
pub async fn existing_tenant_namespace(
    factory: &Factory,
    remote_cluster_id: &str,
) -> liqo_common::Result<String> {
    let existing = factory.tenant_namespaces().get(remote_cluster_id).await?;
    Ok(existing
        .and_then(|ns| ns.metadata.name)
        .unwrap_or_else(|| liqo_common::tenant_namespace::tenant_namespace_name(remote_cluster_id)))
}
