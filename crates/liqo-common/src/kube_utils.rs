//! Shared Kubernetes utilities: client construction, labels, secret fields
//! and the deadline-bound polling primitive every wait is built on.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::trace;

use crate::{Error, OpContext, Result, REMOTE_CLUSTER_ID_LABEL};

/// Interval between polling attempts of every wait
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Load a client configuration.
///
/// With a path, reads that kubeconfig; otherwise infers from the environment
/// (`KUBECONFIG`, `~/.kube/config`, in-cluster). `context` selects a named
/// kubeconfig context instead of the current one.
pub async fn load_config(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Config> {
    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "load_config",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "load_config",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None if context.is_some() => Config::from_kubeconfig(&options).await.map_err(|e| {
            Error::internal_with_context(
                "load_config",
                format!("failed to load kubeconfig: {}", e),
            )
        })?,
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("load_config", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Ok(config)
}

/// Create a kube client from a loaded configuration
pub fn create_client(config: Config) -> Result<Client> {
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Render an equality-based label selector (`k1=v1,k2=v2`)
pub fn label_selector<'a>(labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    labels
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Selector for every object belonging to a peer
pub fn remote_cluster_selector(cluster_id: &str) -> String {
    label_selector([(REMOTE_CLUSTER_ID_LABEL, cluster_id)])
}

/// Label map carrying the remote cluster ID plus any extra labels
pub fn remote_cluster_labels(cluster_id: &str, extra: &[(&str, &str)]) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([(REMOTE_CLUSTER_ID_LABEL.to_string(), cluster_id.to_string())]);
    for (k, v) in extra {
        labels.insert((*k).to_string(), (*v).to_string());
    }
    labels
}

/// Add `labels` to an object's labels, overwriting clashing keys
pub fn merge_labels(target: &mut Option<BTreeMap<String, String>>, labels: &BTreeMap<String, String>) {
    target
        .get_or_insert_with(Default::default)
        .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
}

/// Raw bytes of one data field of a Secret
pub fn secret_data(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|ByteString(b)| b.clone())
}

/// Poll `check` until it yields a value, the deadline passes, or the
/// context is cancelled.
///
/// The first check runs immediately, then every `interval`. A check returning
/// `Ok(None)` or a not-found error keeps polling; any other error stops the
/// wait at once. Each check is itself bounded by the context, so a hanging
/// API call cannot outlive the deadline. An already expired context returns
/// [`Error::Timeout`] without running any check.
pub async fn poll_until<T, F, Fut>(
    ctx: &OpContext,
    interval: Duration,
    condition: &str,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    loop {
        ctx.ensure_live(condition)?;
        match ctx.run(condition, check()).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => trace!(condition = %condition, "Condition not yet met"),
            Err(e) if e.is_not_found() => {
                trace!(condition = %condition, error = %e, "Resource not there yet")
            }
            Err(e) => return Err(e),
        }

        ctx.run(condition, async {
            tokio::time::sleep(interval).await;
            Ok(())
        })
        .await?;
    }
}
